//! The visibility resolver: who may see which key.
//!
//! All checks recompute from the live group/category state on every call.
//! There is no cached ACL — group and category membership mutate frequently,
//! and reads must stay consistent with the latest committed state.

use std::collections::HashMap;
use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;

use keyshare_db::models::{KeyRow, UserRow};
use keyshare_db::queries::{categories, groups, users};
use keyshare_types::models::ROLE_ADMIN;

pub fn is_admin(conn: &Connection, user_id: i64) -> Result<bool> {
    users::has_authority(conn, user_id, ROLE_ADMIN)
}

/// True iff the user is ADMIN; or the key sits in a category whose
/// authorized-group set intersects the user's groups; or the key has no
/// category and the user created it.
pub fn can_access(conn: &Connection, user: &UserRow, key: &KeyRow) -> Result<bool> {
    if is_admin(conn, user.id)? {
        return Ok(true);
    }
    match key.category_id {
        Some(category_id) => {
            let authorized: HashSet<i64> =
                categories::group_ids_of(conn, category_id)?.into_iter().collect();
            let member_of = groups::groups_of_user(conn, user.id)?;
            Ok(member_of.iter().any(|g| authorized.contains(g)))
        }
        None => Ok(key.creator_id == user.id),
    }
}

/// Every user that should have access to the key: the members of the key's
/// category's authorized groups, plus all ADMIN users. Used both for read
/// filtering and for encrypted-copy fan-out.
pub fn accessors_of(conn: &Connection, key: &KeyRow) -> Result<Vec<UserRow>> {
    let mut accessors: HashMap<i64, UserRow> = HashMap::new();

    if let Some(category_id) = key.category_id {
        for group_id in categories::group_ids_of(conn, category_id)? {
            for user_id in groups::member_ids(conn, group_id)? {
                if let Some(user) = users::find_by_id(conn, user_id)? {
                    accessors.insert(user.id, user);
                }
            }
        }
    }

    for admin in users::with_authority(conn, ROLE_ADMIN)? {
        accessors.insert(admin.id, admin);
    }

    let mut accessors: Vec<UserRow> = accessors.into_values().collect();
    accessors.sort_by_key(|u| u.id);
    Ok(accessors)
}

/// Whether a user may be the target of an encrypted copy for a key placed in
/// the given category. ADMIN targets always qualify; otherwise the target
/// needs a group authorized on the category. An uncategorized key is visible
/// only to its creator, so only the creator may hold a copy of one.
pub fn copy_target_allowed(
    conn: &Connection,
    target: &UserRow,
    category_id: Option<i64>,
    creator_id: i64,
) -> Result<bool> {
    if is_admin(conn, target.id)? {
        return Ok(true);
    }
    match category_id {
        Some(category_id) => {
            let authorized: HashSet<i64> =
                categories::group_ids_of(conn, category_id)?.into_iter().collect();
            let member_of = groups::groups_of_user(conn, target.id)?;
            Ok(member_of.iter().any(|g| authorized.contains(g)))
        }
        None => Ok(target.id == creator_id),
    }
}
