use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use keyshare_service::Actor;
use keyshare_types::api::{GroupPayload, GroupUserPayload};

use crate::auth::AppState;
use crate::error::run_blocking;
use crate::middleware::require_admin;

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<GroupPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    if payload.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let groups = state.groups.clone();
    let group = run_blocking(move || groups.create(&actor, &payload)).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let groups = state.groups.clone();
    let group = run_blocking(move || groups.get(&actor, id)).await?;
    Ok(Json(group))
}

pub async fn get_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let groups = state.groups.clone();
    let groups = run_blocking(move || groups.get_all(&actor)).await?;
    Ok(Json(groups))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let groups = state.groups.clone();
    run_blocking(move || groups.delete(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<i64>,
    Json(payload): Json<GroupUserPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let groups = state.groups.clone();
    let group = run_blocking(move || groups.add_user(&actor, id, &payload.login)).await?;
    Ok(Json(group))
}

pub async fn remove_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, login)): Path<(i64, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let groups = state.groups.clone();
    let group = run_blocking(move || groups.remove_user(&actor, id, &login)).await?;
    Ok(Json(group))
}
