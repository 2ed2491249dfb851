//! Shared fixtures for the service tests: an in-memory database seeded
//! through the query layer directly.

use std::sync::Arc;

use keyshare_db::Database;
use keyshare_db::models::UserRow;
use keyshare_db::queries::{categories, groups, users};
use keyshare_types::api::{EncryptedPasswordEntry, KeyPayload};
use keyshare_types::models::{ROLE_ADMIN, ROLE_USER};

use crate::actor::Actor;
use crate::hashid::HashidCodec;

pub fn test_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

pub fn test_codec() -> HashidCodec {
    HashidCodec::new("test-salt").unwrap()
}

pub fn seed_user(db: &Database, login: &str, admin: bool) -> Actor {
    let id = db
        .with_tx(|conn| {
            let id = users::insert(
                conn,
                login,
                &format!("{login}@example.com"),
                "$argon2$fixture",
                "",
                "",
                None,
            )?;
            users::set_activated(conn, id, true)?;
            users::add_authority(conn, id, ROLE_USER)?;
            if admin {
                users::add_authority(conn, id, ROLE_ADMIN)?;
            }
            Ok(id)
        })
        .unwrap();
    Actor::new(id, login, admin)
}

pub fn seed_group(db: &Database, name: &str, member_ids: &[i64]) -> i64 {
    db.with_tx(|conn| {
        let id = groups::insert(conn, name)?;
        for user_id in member_ids {
            groups::add_member(conn, id, *user_id)?;
        }
        Ok(id)
    })
    .unwrap()
}

pub fn seed_category(
    db: &Database,
    codec: &HashidCodec,
    name: &str,
    parent_id: Option<i64>,
    group_ids: &[i64],
    creator_id: i64,
) -> i64 {
    db.with_tx(|conn| {
        let level = match parent_id {
            Some(parent) => categories::find_by_id(conn, parent)?.unwrap().tree_level + 1,
            None => 0,
        };
        let id = categories::insert(conn, name, parent_id, level, creator_id)?;
        categories::set_hashid(conn, id, &codec.encode(id))?;
        for group_id in group_ids {
            categories::add_group(conn, id, *group_id)?;
        }
        Ok(id)
    })
    .unwrap()
}

pub fn user_row(db: &Database, id: i64) -> UserRow {
    db.with_conn(|conn| Ok(users::find_by_id(conn, id)?.unwrap()))
        .unwrap()
}

pub fn key_payload(
    name: &str,
    category_hashid: Option<&str>,
    copies: &[(&str, &str)],
) -> KeyPayload {
    KeyPayload {
        name: name.to_string(),
        login: "service-account".to_string(),
        notes: String::new(),
        category_id: category_hashid.map(str::to_string),
        encrypted_passwords: copies
            .iter()
            .map(|(login, payload)| EncryptedPasswordEntry {
                login: login.to_string(),
                encrypted_password: payload.to_string(),
            })
            .collect(),
    }
}
