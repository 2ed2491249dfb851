use axum::http::StatusCode;
use tracing::error;

use keyshare_service::{ServiceError, ServiceResult};

/// Maps the service taxonomy onto HTTP statuses.
pub fn status_of(err: ServiceError) -> StatusCode {
    match err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::AccessDenied | ServiceError::Forbidden => StatusCode::FORBIDDEN,
        ServiceError::InvalidId => StatusCode::BAD_REQUEST,
        ServiceError::Storage(e) => {
            error!("storage error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Run a blocking service call off the async runtime and map its error.
pub async fn run_blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(status_of)
}
