pub mod actor;
pub mod authorities;
pub mod categories;
pub mod error;
pub mod groups;
pub mod hashid;
pub mod keys;
pub mod users;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testutil;

pub use actor::Actor;
pub use error::{ServiceError, ServiceResult};
pub use hashid::HashidCodec;
