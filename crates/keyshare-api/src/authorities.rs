use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use keyshare_service::Actor;

use crate::auth::AppState;
use crate::error::run_blocking;
use crate::middleware::require_admin;

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let authorities = state.authorities.clone();
    let authority = run_blocking(move || authorities.get(&name)).await?;
    Ok(Json(authority))
}

pub async fn get_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&actor)?;
    let authorities = state.authorities.clone();
    let authorities = run_blocking(move || authorities.get_all()).await?;
    Ok(Json(authorities))
}
