use serde::{Deserialize, Serialize};

/// JWT claims shared between keyshare-api (REST middleware) and
/// keyshare-gateway (WebSocket authentication). Canonical definition lives
/// here in keyshare-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Internal user id.
    pub sub: i64,
    pub login: String,
    pub exp: usize,
}

/// Role names granting coarse-grained permissions.
pub const ROLE_ADMIN: &str = "ROLE_ADMIN";
pub const ROLE_USER: &str = "ROLE_USER";
