use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::error;

use keyshare_db::queries::{tokens, users};
use keyshare_service::Actor;
use keyshare_types::models::{Claims, ROLE_ADMIN};

use crate::auth::AppState;

/// Extract and validate the bearer token, then resolve the acting identity.
///
/// A signature-valid token is still rejected when it is absent from the
/// access-token store (revoked) or its user no longer exists or is
/// deactivated. The resolved `Actor` is inserted as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let claims = token_data.claims;

    let db = state.db.clone();
    let actor = tokio::task::spawn_blocking(move || {
        db.with_conn(|conn| {
            if !tokens::exists(conn, &token)? {
                return Ok(None);
            }
            let Some(user) = users::find_by_login(conn, &claims.login)? else {
                return Ok(None);
            };
            if !user.activated || user.id != claims.sub {
                return Ok(None);
            }
            let admin = users::has_authority(conn, user.id, ROLE_ADMIN)?;
            Ok(Some(Actor::new(user.id, user.login, admin)))
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("auth lookup failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Gate for admin-only routes.
pub fn require_admin(actor: &Actor) -> Result<(), StatusCode> {
    if actor.admin {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}
