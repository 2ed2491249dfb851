use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use keyshare_service::Actor;
use keyshare_types::api::{CategoryMovePayload, CategoryPayload, ResponsiblePayload};

use crate::auth::AppState;
use crate::error::run_blocking;
use crate::middleware::require_admin;

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CategoryPayload>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    if payload.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.create(&actor, &payload)).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.get(&actor, &id)).await?;
    Ok(Json(category))
}

pub async fn get_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    let categories = state.categories.clone();
    let categories = run_blocking(move || categories.get_all(&actor)).await?;
    Ok(Json(categories))
}

pub async fn get_children(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let categories = state.categories.clone();
    let children = run_blocking(move || categories.get_children(&actor, &id)).await?;
    Ok(Json(children))
}

pub async fn move_category(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(payload): Json<CategoryMovePayload>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.move_category(&actor, &id, &payload)).await?;
    Ok(Json(category))
}

pub async fn add_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, key_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.add_key(&actor, &id, &key_id)).await?;
    Ok(Json(category))
}

pub async fn remove_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, key_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.remove_key(&actor, &id, &key_id)).await?;
    Ok(Json(category))
}

pub async fn add_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, group_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.add_group(&actor, &id, group_id)).await?;
    Ok(Json(category))
}

pub async fn remove_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, group_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category = run_blocking(move || categories.remove_group(&actor, &id, group_id)).await?;
    Ok(Json(category))
}

pub async fn set_responsible(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(payload): Json<ResponsiblePayload>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    let category =
        run_blocking(move || categories.set_responsible(&actor, &id, &payload.login)).await?;
    Ok(Json(category))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let categories = state.categories.clone();
    run_blocking(move || categories.delete(&actor, &id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
