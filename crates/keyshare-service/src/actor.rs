/// The authenticated identity a request acts as.
///
/// Every access-control decision takes the actor as an explicit argument;
/// there is no ambient "current user" context. The admin flag is resolved
/// once at authentication time from the authority table.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: i64,
    pub login: String,
    pub admin: bool,
}

impl Actor {
    pub fn new(id: i64, login: impl Into<String>, admin: bool) -> Self {
        Self {
            id,
            login: login.into(),
            admin,
        }
    }
}
