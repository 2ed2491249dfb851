use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use keyshare_service::Actor;
use keyshare_types::api::KeyPayload;

use crate::auth::AppState;
use crate::error::run_blocking;
use crate::middleware::require_admin;

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<KeyPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    if payload.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let keys = state.keys.clone();
    let key = run_blocking(move || keys.create(&actor, &payload)).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(payload): Json<KeyPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    if payload.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let keys = state.keys.clone();
    let key = run_blocking(move || keys.update(&actor, &id, &payload)).await?;
    Ok(Json(key))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let keys = state.keys.clone();
    run_blocking(move || keys.delete(&actor, &id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let keys = state.keys.clone();
    run_blocking(move || keys.delete_all(&actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let keys = state.keys.clone();
    let key = run_blocking(move || keys.get(&actor, &id)).await?;
    Ok(Json(key))
}

pub async fn get_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    let keys = state.keys.clone();
    let keys = run_blocking(move || keys.get_all(&actor)).await?;
    Ok(Json(keys))
}

pub async fn get_encrypted_password(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let keys = state.keys.clone();
    let copy = run_blocking(move || keys.get_encrypted_password(&actor, &id)).await?;
    Ok(Json(copy))
}

pub async fn get_subscribers(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let keys = state.keys.clone();
    let subscribers = run_blocking(move || keys.get_subscribers(&actor, &id)).await?;
    Ok(Json(subscribers))
}
