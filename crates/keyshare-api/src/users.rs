use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use keyshare_service::Actor;
use keyshare_types::api::{
    ActivateRequest, AuthoritiesUpdateRequest, PublicKeyRequest, RegisterRequest, RegisterResponse,
    ResetConfirmRequest, ResetKeyResponse, ResetRequest, UserUpdateRequest,
};

use crate::auth::AppState;
use crate::error::run_blocking;
use crate::middleware::require_admin;

pub async fn register(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    if req.email.is_empty() || req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let users = state.users.clone();
    let (user, activation_key) = run_blocking(move || users.register(&req)).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            activation_key,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub login: String,
}

/// Public: redeeming the activation key is the out-of-band half of
/// registration, so no bearer token exists yet.
pub async fn activate(
    State(state): State<AppState>,
    Query(req): Query<ActivateRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let users = state.users.clone();
    let user = run_blocking(move || users.activate(&req.activation_key)).await?;
    Ok(Json(user))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<LoginQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    let user = run_blocking(move || users.deactivate(&actor, &query.login)).await?;
    Ok(Json(user))
}

pub async fn request_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let users = state.users.clone();
    let reset_key = run_blocking(move || users.request_reset(&req.email)).await?;
    Ok(Json(ResetKeyResponse { reset_key }))
}

pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetConfirmRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let users = state.users.clone();
    run_blocking(move || users.reset_password(&req.reset_key, &req.password)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(login): Path<String>,
    Json(req): Json<UserUpdateRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    let user = run_blocking(move || users.update(&actor, &login, &req)).await?;
    Ok(Json(user))
}

pub async fn update_authorities(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(login): Path<String>,
    Json(req): Json<AuthoritiesUpdateRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    let user = run_blocking(move || users.update_authorities(&actor, &login, &req.authorities)).await?;
    Ok(Json(user))
}

/// Self-service: stores the caller's public key material, making them
/// eligible to receive encrypted copies.
pub async fn set_public_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<PublicKeyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let users = state.users.clone();
    let user = run_blocking(move || users.set_public_key(&actor, &req.public_key)).await?;
    Ok(Json(user))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(login): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    let user = run_blocking(move || users.get(&actor, &login)).await?;
    Ok(Json(user))
}

pub async fn get_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    let users = run_blocking(move || users.get_all(&actor)).await?;
    Ok(Json(users))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(login): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let users = state.users.clone();
    run_blocking(move || users.delete(&actor, &login)).await?;
    Ok(StatusCode::NO_CONTENT)
}
