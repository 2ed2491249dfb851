use serde::{Deserialize, Serialize};

use crate::api::KeyResponse;

/// Events sent over the WebSocket gateway.
///
/// Key events are targeted: each accessor of the key receives their own copy
/// on their per-user channel. `KeyUpdated` and `KeyRemoved` are distinct
/// variants so clients can tell a mutation from a removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { login: String },

    /// A key visible to the recipient was created or updated.
    KeyUpdated { key: KeyJson },

    /// A key visible to the recipient was deleted.
    KeyRemoved { key: KeyJson },
}

/// Wire form of a key inside a gateway event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyJson {
    pub id: String,
    pub name: String,
    pub login: String,
    pub notes: String,
    pub creator: String,
    pub category_id: Option<String>,
}

impl From<&KeyResponse> for KeyJson {
    fn from(key: &KeyResponse) -> Self {
        Self {
            id: key.id.clone(),
            name: key.name.clone(),
            login: key.login.clone(),
            notes: key.notes.clone(),
            creator: key.creator.clone(),
            category_id: key.category_id.clone(),
        }
    }
}
