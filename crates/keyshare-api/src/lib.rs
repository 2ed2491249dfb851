pub mod auth;
pub mod authorities;
pub mod categories;
pub mod error;
pub mod groups;
pub mod keys;
pub mod middleware;
pub mod users;
