pub mod categories;
pub mod groups;
pub mod keys;
pub mod tokens;
pub mod users;
