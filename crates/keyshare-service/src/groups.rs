use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

use keyshare_db::Database;
use keyshare_db::models::GroupRow;
use keyshare_db::queries::{groups, users};
use keyshare_types::api::{GroupPayload, GroupResponse};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::keys::remove_obsolete_copies;

/// User-group directory. Membership is many-to-many; every membership change
/// is followed by the obsolete-copy pruning sweep for the affected users.
#[derive(Clone)]
pub struct GroupService {
    db: Arc<Database>,
}

impl GroupService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, _actor: &Actor, payload: &GroupPayload) -> ServiceResult<GroupResponse> {
        self.db
            .with_tx(|conn| {
                if groups::find_by_name(conn, &payload.name)?.is_some() {
                    return Err(ServiceError::Conflict(format!(
                        "group '{}' already exists",
                        payload.name
                    ))
                    .into());
                }
                let id = groups::insert(conn, &payload.name)?;
                debug!("Created group '{}' with ID {}", payload.name, id);
                let group = groups::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                group_response(conn, &group)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get(&self, _actor: &Actor, id: i64) -> ServiceResult<GroupResponse> {
        self.db
            .with_conn(|conn| {
                let group = groups::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                group_response(conn, &group)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get_all(&self, _actor: &Actor) -> ServiceResult<Vec<GroupResponse>> {
        self.db
            .with_conn(|conn| {
                groups::list_all(conn)?
                    .iter()
                    .map(|group| group_response(conn, group))
                    .collect()
            })
            .map_err(ServiceError::from_db)
    }

    /// Deletes a group: it is removed from every category's authorized set,
    /// memberships are dissolved, and every former member is swept for
    /// copies they are no longer entitled to.
    pub fn delete(&self, _actor: &Actor, id: i64) -> ServiceResult<()> {
        self.db
            .with_tx(|conn| {
                let group = groups::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                let member_ids = groups::member_ids(conn, group.id)?;
                groups::detach_from_categories(conn, group.id)?;
                groups::delete(conn, group.id)?;
                for user_id in member_ids {
                    if let Some(user) = users::find_by_id(conn, user_id)? {
                        remove_obsolete_copies(conn, &user)?;
                    }
                }
                debug!("Deleted group '{}'", group.name);
                Ok(())
            })
            .map_err(ServiceError::from_db)
    }

    pub fn add_user(&self, _actor: &Actor, id: i64, login: &str) -> ServiceResult<GroupResponse> {
        self.db
            .with_tx(|conn| {
                let group = groups::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                groups::add_member(conn, group.id, user.id)?;
                remove_obsolete_copies(conn, &user)?;
                debug!("Added user '{}' to group '{}'", user.login, group.name);
                group_response(conn, &group)
            })
            .map_err(ServiceError::from_db)
    }

    /// Removes a user from the group and immediately runs the pruning sweep:
    /// copies of keys the user could only see through this membership are
    /// deleted in the same transaction.
    pub fn remove_user(&self, _actor: &Actor, id: i64, login: &str) -> ServiceResult<GroupResponse> {
        self.db
            .with_tx(|conn| {
                let group = groups::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                groups::remove_member(conn, group.id, user.id)?;
                remove_obsolete_copies(conn, &user)?;
                debug!("Removed user '{}' from group '{}'", user.login, group.name);
                group_response(conn, &group)
            })
            .map_err(ServiceError::from_db)
    }
}

fn group_response(conn: &Connection, group: &GroupRow) -> Result<GroupResponse> {
    let mut logins = Vec::new();
    for user_id in groups::member_ids(conn, group.id)? {
        if let Some(user) = users::find_by_id(conn, user_id)? {
            logins.push(user.login);
        }
    }
    logins.sort();
    Ok(GroupResponse {
        id: group.id,
        name: group.name.clone(),
        users: logins,
    })
}
