use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use keyshare_api::auth::{self, AppState, AppStateInner};
use keyshare_api::middleware::require_auth;
use keyshare_api::{authorities, categories, groups, keys, users};
use keyshare_db::queries::{tokens, users as user_queries};
use keyshare_gateway::connection;
use keyshare_gateway::dispatcher::Dispatcher;
use keyshare_service::authorities::AuthorityService;
use keyshare_service::categories::CategoryService;
use keyshare_service::groups::GroupService;
use keyshare_service::keys::KeyService;
use keyshare_service::users::UserService;
use keyshare_service::HashidCodec;
use keyshare_types::models::Claims;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshare=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("KEYSHARE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let hashid_salt =
        std::env::var("KEYSHARE_HASHID_SALT").unwrap_or_else(|_| "dev-salt-change-me".into());
    let db_path = std::env::var("KEYSHARE_DB_PATH").unwrap_or_else(|_| "keyshare.db".into());
    let host = std::env::var("KEYSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("KEYSHARE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let root_login = std::env::var("KEYSHARE_ROOT_LOGIN").unwrap_or_else(|_| "root".into());
    let root_email =
        std::env::var("KEYSHARE_ROOT_EMAIL").unwrap_or_else(|_| "root@localhost".into());
    let root_password =
        std::env::var("KEYSHARE_ROOT_PASSWORD").unwrap_or_else(|_| "root-change-me".into());

    // Init database
    let db = Arc::new(keyshare_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let codec = HashidCodec::new(&hashid_salt)?;
    let dispatcher = Dispatcher::new();
    let user_service = UserService::new(db.clone(), root_login.clone());
    user_service.bootstrap_root(&root_email, &root_password)?;

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        users: user_service,
        keys: KeyService::new(db.clone(), codec.clone(), dispatcher.clone()),
        categories: CategoryService::new(db.clone(), codec.clone()),
        groups: GroupService::new(db.clone()),
        authorities: AuthorityService::new(db.clone()),
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/users/activate", get(users::activate))
        .route("/api/users/reset_password/request", post(users::request_reset))
        .route("/api/users/reset_password/confirm", post(users::confirm_reset))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/users", get(users::get_all))
        .route("/api/users/register", post(users::register))
        .route("/api/users/deactivate", get(users::deactivate))
        .route("/api/users/publickey", put(users::set_public_key))
        .route("/api/users/{login}", get(users::get))
        .route("/api/users/{login}", put(users::update))
        .route("/api/users/{login}", delete(users::delete))
        .route("/api/users/{login}/authorities", put(users::update_authorities))
        .route("/api/keys", get(keys::get_all))
        .route("/api/keys", post(keys::create))
        .route("/api/keys", delete(keys::delete_all))
        .route("/api/keys/{id}", get(keys::get))
        .route("/api/keys/{id}", put(keys::update))
        .route("/api/keys/{id}", delete(keys::delete))
        .route("/api/keys/{id}/password", get(keys::get_encrypted_password))
        .route("/api/keys/{id}/subscribers", get(keys::get_subscribers))
        .route("/api/categories", get(categories::get_all))
        .route("/api/categories", post(categories::create))
        .route("/api/categories/{id}", get(categories::get))
        .route("/api/categories/{id}/children", get(categories::get_children))
        .route("/api/categories/{id}", delete(categories::delete))
        .route("/api/categories/{id}/move", put(categories::move_category))
        .route("/api/categories/{id}/responsible", put(categories::set_responsible))
        .route("/api/categories/{id}/groups/{group_id}", put(categories::add_group))
        .route("/api/categories/{id}/groups/{group_id}", delete(categories::remove_group))
        .route("/api/categories/{id}/keys/{key_id}", put(categories::add_key))
        .route("/api/categories/{id}/keys/{key_id}", delete(categories::remove_key))
        .route("/api/groups", get(groups::get_all))
        .route("/api/groups", post(groups::create))
        .route("/api/groups/{id}", get(groups::get))
        .route("/api/groups/{id}", delete(groups::delete))
        .route("/api/groups/{id}/users", post(groups::add_user))
        .route("/api/groups/{id}/users/{login}", delete(groups::remove_user))
        .route("/api/authorities", get(authorities::get_all))
        .route("/api/authorities/{name}", get(authorities::get))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Keyshare server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

/// WebSocket clients cannot set an Authorization header from the browser, so
/// the gateway takes the bearer token as a query parameter and validates it
/// before the upgrade completes.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token_data = decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let claims = token_data.claims;

    let db = state.db.clone();
    let token = query.token.clone();
    let login = claims.login.clone();
    let authorized = tokio::task::spawn_blocking(move || {
        db.with_conn(|conn| {
            Ok(tokens::exists(conn, &token)?
                && user_queries::find_by_login(conn, &login)?
                    .is_some_and(|user| user.activated && user.id == claims.sub))
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("gateway auth lookup failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let dispatcher = state.dispatcher.clone();
    let login = claims.login;
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, login)))
}
