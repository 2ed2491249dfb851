use thiserror::Error;

/// Typed error taxonomy for the domain services. The HTTP layer maps these
/// to status codes; NotFound and InvalidId are client errors without retry.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    /// An encrypted-copy target lacks authorization for the key. Raised
    /// before any persistence so the whole mutation aborts.
    #[error("access denied")]
    AccessDenied,

    /// The acting user may not see the requested entity.
    #[error("forbidden")]
    Forbidden,

    /// An obfuscated external id failed to decode.
    #[error("invalid identifier")]
    InvalidId,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    /// Recovers a typed service error that crossed the storage boundary.
    /// Transaction closures return `anyhow::Result`, so domain errors raised
    /// inside them come back wrapped; anything else is a storage failure.
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(service_err) => service_err,
            Err(err) => ServiceError::Storage(err),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
