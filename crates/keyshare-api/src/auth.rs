use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::error;

use keyshare_db::Database;
use keyshare_db::queries::tokens;
use keyshare_gateway::dispatcher::Dispatcher;
use keyshare_service::authorities::AuthorityService;
use keyshare_service::categories::CategoryService;
use keyshare_service::groups::GroupService;
use keyshare_service::keys::KeyService;
use keyshare_service::users::UserService;
use keyshare_service::{ServiceError, ServiceResult};
use keyshare_types::api::{LoginRequest, LoginResponse};
use keyshare_types::models::Claims;

use crate::error::status_of;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub users: UserService,
    pub keys: KeyService,
    pub categories: CategoryService,
    pub groups: GroupService,
    pub authorities: AuthorityService,
}

/// Token lifetime: 24 hours, matching the original deployment's sessions.
const TOKEN_TTL_SECS: i64 = 60 * 60 * 24;

pub fn create_token(jwt_secret: &str, user_id: i64, login: &str) -> ServiceResult<String> {
    let claims = Claims {
        sub: user_id,
        login: login.to_string(),
        exp: (chrono::Utc::now().timestamp() + TOKEN_TTL_SECS) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| ServiceError::Storage(anyhow::anyhow!("token creation failed: {}", e)))
}

/// Verifies credentials and issues a bearer token. The token is recorded in
/// the access-token store so it can be revoked before its expiry.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let users = state.users.clone();
    let db = state.db.clone();
    let jwt_secret = state.jwt_secret.clone();

    let response = tokio::task::spawn_blocking(move || {
        let user = users.authenticate(&req.login, &req.password)?;
        let token = create_token(&jwt_secret, user.id, &user.login)?;
        db.with_conn(|conn| tokens::insert(conn, &token, &user.login))
            .map_err(ServiceError::from_db)?;
        Ok::<_, ServiceError>(LoginResponse {
            user_id: user.id,
            login: user.login,
            token,
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|err| match err {
        // Bad credentials are a failed authentication, not a forbidden
        // resource.
        ServiceError::Forbidden => StatusCode::UNAUTHORIZED,
        other => status_of(other),
    })?;

    Ok(Json(response))
}
