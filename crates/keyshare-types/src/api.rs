use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub login: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// The activation key is returned to the registering admin; handing it to
/// the user out of band is outside this backend's scope.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub activation_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdateRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    pub activation_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ResetKeyResponse {
    pub reset_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetConfirmRequest {
    pub reset_key: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub login: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub activated: bool,
    pub authorities: Vec<String>,
    pub groups: Vec<String>,
}

/// Login plus public key material, enough for another client to produce an
/// encrypted copy addressed to this user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct SubscriberInfo {
    pub login: String,
    pub public_key: String,
}

// -- Keys --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyPayload {
    pub name: String,
    pub login: String,
    #[serde(default)]
    pub notes: String,
    /// Obfuscated id of the category to place the key in.
    pub category_id: Option<String>,
    #[serde(default)]
    pub encrypted_passwords: Vec<EncryptedPasswordEntry>,
}

/// One per-user ciphertext in a key payload. The payload is opaque to the
/// server; only the named user's private key material can decrypt it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedPasswordEntry {
    pub login: String,
    pub encrypted_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyResponse {
    /// Obfuscated external id.
    pub id: String,
    pub name: String,
    pub login: String,
    pub notes: String,
    pub creator: String,
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EncryptedPasswordResponse {
    pub key_id: String,
    pub encrypted_password: String,
}

// -- Categories --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryPayload {
    pub name: String,
    /// Obfuscated id of the parent category; `None` creates a root.
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryMovePayload {
    /// New parent; `None` turns the category into a root.
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponsiblePayload {
    pub login: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryResponse {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub tree_level: i64,
    pub creator: String,
    pub responsible: Option<String>,
    pub groups: Vec<String>,
    pub keys: Vec<String>,
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupUserPayload {
    pub login: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupResponse {
    pub id: i64,
    pub name: String,
    pub users: Vec<String>,
}

// -- Authorities --

#[derive(Debug, Clone, Serialize)]
pub struct AuthorityResponse {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthoritiesUpdateRequest {
    pub authorities: Vec<String>,
}
