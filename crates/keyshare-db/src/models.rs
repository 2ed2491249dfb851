/// Database row types — these map directly to SQLite rows.
/// Distinct from keyshare-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub activated: bool,
    pub activation_key: Option<String>,
    pub reset_key: Option<String>,
    pub reset_date: Option<String>,
    pub public_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CategoryRow {
    pub id: i64,
    pub hashid: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub tree_level: i64,
    pub creator_id: i64,
    pub responsible_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct KeyRow {
    pub id: i64,
    pub hashid: String,
    pub name: String,
    pub login: String,
    pub notes: String,
    pub creator_id: i64,
    pub category_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct EncryptedCopyRow {
    pub id: i64,
    pub key_id: i64,
    pub owner_id: i64,
    pub payload: String,
}
