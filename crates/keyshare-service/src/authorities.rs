use std::sync::Arc;

use keyshare_db::Database;
use keyshare_db::queries::users;
use keyshare_types::api::AuthorityResponse;

use crate::error::{ServiceError, ServiceResult};

/// Read-only access to the role table. Authorities are seeded by the
/// migrations and never mutated at runtime.
#[derive(Clone)]
pub struct AuthorityService {
    db: Arc<Database>,
}

impl AuthorityService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, name: &str) -> ServiceResult<AuthorityResponse> {
        self.db
            .with_conn(|conn| {
                if !users::authority_exists(conn, name)? {
                    return Err(ServiceError::NotFound("authority").into());
                }
                Ok(AuthorityResponse {
                    name: name.to_string(),
                })
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get_all(&self) -> ServiceResult<Vec<AuthorityResponse>> {
        self.db
            .with_conn(|conn| {
                Ok(users::list_authorities(conn)?
                    .into_iter()
                    .map(|name| AuthorityResponse { name })
                    .collect())
            })
            .map_err(ServiceError::from_db)
    }
}
