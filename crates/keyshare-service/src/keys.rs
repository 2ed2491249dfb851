use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use keyshare_db::Database;
use keyshare_db::models::{KeyRow, UserRow};
use keyshare_db::queries::{categories, groups, keys, users};
use keyshare_gateway::dispatcher::Dispatcher;
use keyshare_types::api::{
    EncryptedPasswordEntry, EncryptedPasswordResponse, KeyPayload, KeyResponse, SubscriberInfo,
};
use keyshare_types::events::{GatewayEvent, KeyJson};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::hashid::HashidCodec;
use crate::visibility;

/// Key lifecycle: create/update/delete with per-user encrypted copies,
/// visibility-filtered reads, and the obsolete-copy pruning sweep.
#[derive(Clone)]
pub struct KeyService {
    db: Arc<Database>,
    codec: HashidCodec,
    dispatcher: Dispatcher,
}

impl KeyService {
    pub fn new(db: Arc<Database>, codec: HashidCodec, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            codec,
            dispatcher,
        }
    }

    /// Creates a new key with one encrypted copy per payload entry.
    ///
    /// Every copy target must already have access to the key through the
    /// payload's category (or be ADMIN, or be the creator for an
    /// uncategorized key); otherwise the whole request is rejected before
    /// anything is written. All writes happen in one transaction.
    pub fn create(&self, actor: &Actor, payload: &KeyPayload) -> ServiceResult<KeyResponse> {
        let category_id = self.decode_category(payload.category_id.as_deref())?;

        let (response, accessor_logins) = self
            .db
            .with_tx(|conn| {
                if let Some(id) = category_id {
                    categories::find_by_id(conn, id)?
                        .ok_or(ServiceError::NotFound("category"))?;
                }

                let targets =
                    resolve_copy_targets(conn, actor, &payload.encrypted_passwords, category_id, actor.id)?;

                let key_id = keys::insert(
                    conn,
                    &payload.name,
                    &payload.login,
                    &payload.notes,
                    actor.id,
                    category_id,
                )?;
                keys::set_hashid(conn, key_id, &self.codec.encode(key_id))?;

                for (target, entry) in &targets {
                    keys::insert_copy(conn, key_id, target.id, &entry.encrypted_password)?;
                    debug!(
                        "Created encrypted copy of key {} for user '{}'",
                        key_id, target.login
                    );
                }

                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                let accessor_logins = accessor_logins_of(conn, &key)?;
                Ok((key_response(conn, &self.codec, &key)?, accessor_logins))
            })
            .map_err(ServiceError::from_db)?;

        debug!("Created new key '{}'", response.id);
        self.send_updates(&response, &accessor_logins);
        Ok(response)
    }

    /// Updates a key, fully replacing its encrypted-copy set.
    ///
    /// Copy targets are re-validated against the key's category exactly as in
    /// create; a failure aborts without partial mutation. The old copies are
    /// removed and the payload's inserted inside one transaction, so a
    /// mid-sequence failure cannot leave the key with a partial copy set.
    pub fn update(
        &self,
        actor: &Actor,
        hashid: &str,
        payload: &KeyPayload,
    ) -> ServiceResult<KeyResponse> {
        let key_id = self.codec.decode(hashid)?;

        let (response, accessor_logins) = self
            .db
            .with_tx(|conn| {
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;

                let targets = resolve_copy_targets(
                    conn,
                    actor,
                    &payload.encrypted_passwords,
                    key.category_id,
                    key.creator_id,
                )?;

                keys::update_fields(conn, key.id, &payload.name, &payload.login, &payload.notes)?;

                // Full replace semantics, never a merge with the old set.
                keys::delete_copies_of_key(conn, key.id)?;
                for (target, entry) in &targets {
                    keys::insert_copy(conn, key.id, target.id, &entry.encrypted_password)?;
                }

                let key = keys::find_by_id(conn, key.id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                let accessor_logins = accessor_logins_of(conn, &key)?;
                Ok((key_response(conn, &self.codec, &key)?, accessor_logins))
            })
            .map_err(ServiceError::from_db)?;

        debug!("Updated key '{}'", response.id);
        self.send_updates(&response, &accessor_logins);
        Ok(response)
    }

    /// Deletes a key, cascading to every encrypted copy referencing it.
    /// Former accessors are notified on the removal channel.
    pub fn delete(&self, _actor: &Actor, hashid: &str) -> ServiceResult<()> {
        let key_id = self.codec.decode(hashid)?;

        let (response, accessor_logins) = self
            .db
            .with_tx(|conn| {
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                let accessor_logins = accessor_logins_of(conn, &key)?;
                let response = key_response(conn, &self.codec, &key)?;
                keys::delete_copies_of_key(conn, key.id)?;
                keys::delete(conn, key.id)?;
                Ok((response, accessor_logins))
            })
            .map_err(ServiceError::from_db)?;

        debug!("Deleted key '{}'", response.id);
        self.send_removal_updates(&response, &accessor_logins);
        Ok(())
    }

    pub fn delete_all(&self, _actor: &Actor) -> ServiceResult<()> {
        let removed = self
            .db
            .with_tx(|conn| {
                let mut removed = Vec::new();
                for key in keys::list_all(conn)? {
                    let accessor_logins = accessor_logins_of(conn, &key)?;
                    let response = key_response(conn, &self.codec, &key)?;
                    keys::delete_copies_of_key(conn, key.id)?;
                    keys::delete(conn, key.id)?;
                    removed.push((response, accessor_logins));
                }
                Ok(removed)
            })
            .map_err(ServiceError::from_db)?;

        debug!("Deleted all keys");
        for (response, accessor_logins) in &removed {
            self.send_removal_updates(response, accessor_logins);
        }
        Ok(())
    }

    /// Gets a key if the actor is authorized to see it; Forbidden otherwise.
    pub fn get(&self, actor: &Actor, hashid: &str) -> ServiceResult<KeyResponse> {
        let key_id = self.codec.decode(hashid)?;
        self.db
            .with_conn(|conn| {
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                if !actor.admin {
                    let user = users::find_by_id(conn, actor.id)?
                        .ok_or(ServiceError::NotFound("user"))?;
                    if !visibility::can_access(conn, &user, &key)? {
                        return Err(ServiceError::Forbidden.into());
                    }
                }
                key_response(conn, &self.codec, &key)
            })
            .map_err(ServiceError::from_db)
    }

    /// All keys the actor may see: everything for ADMIN; otherwise the keys
    /// of categories authorized for one of the actor's groups, plus
    /// uncategorized keys the actor created.
    pub fn get_all(&self, actor: &Actor) -> ServiceResult<Vec<KeyResponse>> {
        self.db
            .with_conn(|conn| {
                let mut visible: HashMap<i64, KeyRow> = HashMap::new();
                if actor.admin {
                    for key in keys::list_all(conn)? {
                        visible.insert(key.id, key);
                    }
                } else {
                    for category in categories::authorized_for_user(conn, actor.id)? {
                        for key in keys::by_category(conn, category.id)? {
                            visible.insert(key.id, key);
                        }
                    }
                    for key in keys::by_creator(conn, actor.id)? {
                        if key.category_id.is_none() {
                            visible.insert(key.id, key);
                        }
                    }
                }

                let mut rows: Vec<KeyRow> = visible.into_values().collect();
                rows.sort_by_key(|k| k.id);
                rows.iter()
                    .map(|key| key_response(conn, &self.codec, key))
                    .collect()
            })
            .map_err(ServiceError::from_db)
    }

    /// The actor's own encrypted copy of the key.
    pub fn get_encrypted_password(
        &self,
        actor: &Actor,
        hashid: &str,
    ) -> ServiceResult<EncryptedPasswordResponse> {
        let key_id = self.codec.decode(hashid)?;
        self.db
            .with_conn(|conn| {
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                let user = users::find_by_id(conn, actor.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                if !visibility::can_access(conn, &user, &key)? {
                    return Err(ServiceError::Forbidden.into());
                }
                let copy = keys::find_copy(conn, key.id, actor.id)?
                    .ok_or(ServiceError::NotFound("encrypted password"))?;
                Ok(EncryptedPasswordResponse {
                    key_id: key.hashid.clone(),
                    encrypted_password: copy.payload,
                })
            })
            .map_err(ServiceError::from_db)
    }

    /// Accessors of the key that can receive encrypted copies, i.e. those
    /// with uploaded public key material.
    pub fn get_subscribers(&self, actor: &Actor, hashid: &str) -> ServiceResult<Vec<SubscriberInfo>> {
        let key_id = self.codec.decode(hashid)?;
        self.db
            .with_conn(|conn| {
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                if !actor.admin {
                    let user = users::find_by_id(conn, actor.id)?
                        .ok_or(ServiceError::NotFound("user"))?;
                    if !visibility::can_access(conn, &user, &key)? {
                        return Err(ServiceError::Forbidden.into());
                    }
                }
                let mut subscribers: Vec<SubscriberInfo> = visibility::accessors_of(conn, &key)?
                    .into_iter()
                    .filter_map(|user| {
                        user.public_key.map(|public_key| SubscriberInfo {
                            login: user.login,
                            public_key,
                        })
                    })
                    .collect();
                subscribers.sort_by(|a, b| a.login.cmp(&b.login));
                Ok(subscribers)
            })
            .map_err(ServiceError::from_db)
    }

    fn decode_category(&self, hashid: Option<&str>) -> ServiceResult<Option<i64>> {
        hashid.map(|h| self.codec.decode(h)).transpose()
    }

    /// Sends out gateway messages to accessors for live updates.
    /// Fire-and-forget: fan-out failure never propagates to the caller.
    fn send_updates(&self, key: &KeyResponse, accessor_logins: &[String]) {
        for login in accessor_logins {
            self.dispatcher.send_to_user(
                login,
                GatewayEvent::KeyUpdated {
                    key: KeyJson::from(key),
                },
            );
        }
        debug!("Sent out updates for key '{}'", key.id);
    }

    /// Sends out gateway messages to former accessors for live removals.
    fn send_removal_updates(&self, key: &KeyResponse, accessor_logins: &[String]) {
        for login in accessor_logins {
            self.dispatcher.send_to_user(
                login,
                GatewayEvent::KeyRemoved {
                    key: KeyJson::from(key),
                },
            );
        }
        debug!("Sent out removal updates for key '{}'", key.id);
    }
}

/// Validates and resolves every encrypted-copy entry of a payload.
/// All-or-nothing: the first target without access fails the whole mutation.
fn resolve_copy_targets(
    conn: &Connection,
    actor: &Actor,
    entries: &[EncryptedPasswordEntry],
    category_id: Option<i64>,
    creator_id: i64,
) -> Result<Vec<(UserRow, EncryptedPasswordEntry)>> {
    let mut targets = Vec::with_capacity(entries.len());
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.login.as_str()) {
            return Err(ServiceError::Conflict(format!(
                "duplicate encrypted password entry for user '{}'",
                entry.login
            ))
            .into());
        }
        let target = users::find_by_login(conn, &entry.login)?
            .ok_or(ServiceError::NotFound("user"))?;
        if !visibility::copy_target_allowed(conn, &target, category_id, creator_id)? {
            info!(
                "User '{}' tried to add an encrypted password for user '{}' without access to the key",
                actor.login, target.login
            );
            return Err(ServiceError::AccessDenied.into());
        }
        targets.push((target, entry.clone()));
    }
    Ok(targets)
}

fn accessor_logins_of(conn: &Connection, key: &KeyRow) -> Result<Vec<String>> {
    Ok(visibility::accessors_of(conn, key)?
        .into_iter()
        .map(|user| user.login)
        .collect())
}

pub(crate) fn key_response(
    conn: &Connection,
    codec: &HashidCodec,
    key: &KeyRow,
) -> Result<KeyResponse> {
    let creator = users::find_by_id(conn, key.creator_id)?
        .map(|user| user.login)
        .unwrap_or_default();
    let category_id = match key.category_id {
        Some(id) => categories::find_by_id(conn, id)?.map(|c| c.hashid),
        None => None,
    };
    Ok(KeyResponse {
        id: key.hashid.clone(),
        name: key.name.clone(),
        login: key.login.clone(),
        notes: key.notes.clone(),
        creator,
        category_id,
        created_at: parse_timestamp(&key.created_at),
    })
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_default()
}

// -- Pruning --

/// Removes encrypted copies of a user that are obsolete because the key's
/// visibility to the user changed. Invoked synchronously after every
/// authorization-changing mutation; ADMIN users are never pruned.
///
/// A copy is obsolete when the key's category has an authorized-group set
/// (possibly empty) disjoint from the user's current groups, or when the key
/// has no category and the user is not its creator.
pub fn remove_obsolete_copies(conn: &Connection, user: &UserRow) -> Result<()> {
    if visibility::is_admin(conn, user.id)? {
        return Ok(());
    }
    let member_of: HashSet<i64> = groups::groups_of_user(conn, user.id)?.into_iter().collect();

    for copy in keys::copies_of_owner(conn, user.id)? {
        let Some(key) = keys::find_by_id(conn, copy.key_id)? else {
            continue;
        };
        let obsolete = match key.category_id {
            Some(category_id) => categories::group_ids_of(conn, category_id)?
                .iter()
                .all(|g| !member_of.contains(g)),
            None => key.creator_id != user.id,
        };
        if obsolete {
            keys::delete_copy(conn, copy.id)?;
            debug!(
                "Removed obsolete encrypted copy of key {} owned by '{}'",
                key.id, user.login
            );
        }
    }
    Ok(())
}

/// Drops the copies of a single key whose owners no longer have access,
/// used after the key is attached to or detached from a category.
pub fn prune_copies_of_key(conn: &Connection, key: &KeyRow) -> Result<()> {
    for copy in keys::copies_of_key(conn, key.id)? {
        let Some(owner) = users::find_by_id(conn, copy.owner_id)? else {
            keys::delete_copy(conn, copy.id)?;
            continue;
        };
        if !visibility::can_access(conn, &owner, key)? {
            keys::delete_copy(conn, copy.id)?;
            debug!(
                "Removed encrypted copy of key {} owned by '{}' after category change",
                key.id, owner.login
            );
        }
    }
    Ok(())
}

/// Removes every encrypted copy a user owns. Used when the user is deleted.
pub fn remove_all_copies_for_user(conn: &Connection, user_id: i64) -> Result<()> {
    keys::delete_copies_of_owner(conn, user_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use keyshare_db::queries::groups as group_queries;

    use crate::testutil::{
        key_payload, seed_category, seed_group, seed_user, test_codec, test_db, user_row,
    };

    fn service(db: &Arc<Database>) -> (KeyService, Dispatcher) {
        let dispatcher = Dispatcher::new();
        (
            KeyService::new(db.clone(), test_codec(), dispatcher.clone()),
            dispatcher,
        )
    }

    #[test]
    fn create_assigns_obfuscated_id_and_copies() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(
                &alice,
                &key_payload("db", Some(&category_hashid), &[("alice", "ct-alice")]),
            )
            .unwrap();

        // External id decodes back to the row id but is not the raw number.
        let internal = codec.decode(&created.id).unwrap();
        assert_ne!(created.id, internal.to_string());

        db.with_conn(|conn| {
            let copies = keys::copies_of_key(conn, internal)?;
            assert_eq!(copies.len(), 1);
            assert_eq!(copies[0].owner_id, alice.id);
            assert_eq!(copies[0].payload, "ct-alice");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_rejects_unauthorized_copy_target_atomically() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        // bob is not in any authorized group: the whole create must fail.
        let result = service.create(
            &alice,
            &key_payload(
                "db",
                Some(&category_hashid),
                &[("alice", "ct-alice"), ("bob", "ct-bob")],
            ),
        );
        assert!(matches!(result, Err(ServiceError::AccessDenied)));

        // No key row and no copy rows exist afterwards.
        db.with_conn(|conn| {
            assert!(keys::list_all(conn)?.is_empty());
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            assert!(keys::copies_of_owner(conn, bob.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_rejects_duplicate_copy_targets() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let result = service.create(
            &alice,
            &key_payload(
                "db",
                Some(&category_hashid),
                &[("alice", "ct-1"), ("alice", "ct-2")],
            ),
        );
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        db.with_conn(|conn| {
            assert!(keys::list_all(conn)?.is_empty());
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn update_replaces_copy_set_fully() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id, bob.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(
                &alice,
                &key_payload(
                    "db",
                    Some(&category_hashid),
                    &[("alice", "ct-alice"), ("bob", "ct-bob")],
                ),
            )
            .unwrap();

        service
            .update(
                &alice,
                &created.id,
                &key_payload("db", Some(&category_hashid), &[("bob", "ct-bob-2")]),
            )
            .unwrap();

        // Exactly the new payload's owners, never a union with the old.
        let key_id = codec.decode(&created.id).unwrap();
        db.with_conn(|conn| {
            let copies = keys::copies_of_key(conn, key_id)?;
            assert_eq!(copies.len(), 1);
            assert_eq!(copies[0].owner_id, bob.id);
            assert_eq!(copies[0].payload, "ct-bob-2");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn update_with_unauthorized_target_leaves_old_copies_untouched() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let _eve = seed_user(&db, "eve", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(
                &alice,
                &key_payload("db", Some(&category_hashid), &[("alice", "ct-alice")]),
            )
            .unwrap();

        let result = service.update(
            &alice,
            &created.id,
            &key_payload("db", Some(&category_hashid), &[("eve", "ct-eve")]),
        );
        assert!(matches!(result, Err(ServiceError::AccessDenied)));

        let key_id = codec.decode(&created.id).unwrap();
        db.with_conn(|conn| {
            let copies = keys::copies_of_key(conn, key_id)?;
            assert_eq!(copies.len(), 1);
            assert_eq!(copies[0].owner_id, alice.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_cascades_to_every_copy() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id, bob.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(
                &alice,
                &key_payload(
                    "db",
                    Some(&category_hashid),
                    &[("alice", "ct-alice"), ("bob", "ct-bob")],
                ),
            )
            .unwrap();

        service.delete(&alice, &created.id).unwrap();

        db.with_conn(|conn| {
            assert!(keys::list_all(conn)?.is_empty());
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            assert!(keys::copies_of_owner(conn, bob.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn get_all_hides_foreign_uncategorized_keys() {
        let db = test_db();
        let (service, _) = service(&db);
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);

        let created = service
            .create(&alice, &key_payload("personal", None, &[]))
            .unwrap();

        let for_alice = service.get_all(&alice).unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].id, created.id);

        let for_bob = service.get_all(&bob).unwrap();
        assert!(for_bob.is_empty());
    }

    #[test]
    fn get_is_forbidden_for_outsiders() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(&alice, &key_payload("db", Some(&category_hashid), &[]))
            .unwrap();

        assert!(service.get(&alice, &created.id).is_ok());
        assert!(service.get(&admin, &created.id).is_ok());
        assert!(matches!(
            service.get(&bob, &created.id),
            Err(ServiceError::Forbidden)
        ));
    }

    #[test]
    fn create_notifies_every_accessor() {
        let db = test_db();
        let (service, dispatcher) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id, bob.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let (_conn_id, mut bob_rx) = dispatcher.register_user_channel("bob");

        let created = service
            .create(&alice, &key_payload("db", Some(&category_hashid), &[]))
            .unwrap();

        match bob_rx.try_recv() {
            Ok(GatewayEvent::KeyUpdated { key }) => assert_eq!(key.id, created.id),
            other => panic!("expected KeyUpdated, got {:?}", other),
        }
    }

    #[test]
    fn delete_notifies_on_removal_channel() {
        let db = test_db();
        let (service, dispatcher) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(&alice, &key_payload("db", Some(&category_hashid), &[]))
            .unwrap();

        let (_conn_id, mut alice_rx) = dispatcher.register_user_channel("alice");
        service.delete(&alice, &created.id).unwrap();

        match alice_rx.try_recv() {
            Ok(GatewayEvent::KeyRemoved { key }) => assert_eq!(key.id, created.id),
            other => panic!("expected KeyRemoved, got {:?}", other),
        }
    }

    #[test]
    fn pruning_deletes_copy_when_groups_become_disjoint() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        service
            .create(
                &alice,
                &key_payload("db", Some(&category_hashid), &[("alice", "ct-alice")]),
            )
            .unwrap();

        db.with_tx(|conn| {
            group_queries::remove_member(conn, group, alice.id)?;
            let alice_row = users::find_by_id(conn, alice.id)?.unwrap();
            remove_obsolete_copies(conn, &alice_row)?;
            Ok(())
        })
        .unwrap();

        db.with_conn(|conn| {
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn pruning_keeps_creator_copy_of_uncategorized_key() {
        let db = test_db();
        let (service, _) = service(&db);
        let alice = seed_user(&db, "alice", false);

        service
            .create(&alice, &key_payload("personal", None, &[("alice", "ct")]))
            .unwrap();

        db.with_tx(|conn| {
            let alice_row = users::find_by_id(conn, alice.id)?.unwrap();
            remove_obsolete_copies(conn, &alice_row)?;
            Ok(())
        })
        .unwrap();

        db.with_conn(|conn| {
            assert_eq!(keys::copies_of_owner(conn, alice.id)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn pruning_never_touches_admins() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        service
            .create(
                &alice,
                &key_payload("db", Some(&category_hashid), &[("admin", "ct-admin")]),
            )
            .unwrap();

        db.with_tx(|conn| {
            let admin_row = users::find_by_id(conn, admin.id)?.unwrap();
            remove_obsolete_copies(conn, &admin_row)?;
            Ok(())
        })
        .unwrap();

        db.with_conn(|conn| {
            assert_eq!(keys::copies_of_owner(conn, admin.id)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn encrypted_password_lookup_requires_access_and_copy() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id, bob.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        let created = service
            .create(
                &alice,
                &key_payload("db", Some(&category_hashid), &[("alice", "ct-alice")]),
            )
            .unwrap();

        let copy = service.get_encrypted_password(&alice, &created.id).unwrap();
        assert_eq!(copy.encrypted_password, "ct-alice");

        // bob can see the key but owns no copy of it.
        assert!(matches!(
            service.get_encrypted_password(&bob, &created.id),
            Err(ServiceError::NotFound("encrypted password"))
        ));
    }

    #[test]
    fn subscribers_require_public_key_material() {
        let db = test_db();
        let (service, _) = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", false);
        let bob = seed_user(&db, "bob", false);
        let group = seed_group(&db, "dev", &[alice.id, bob.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let category_hashid = codec.encode(category);

        db.with_conn(|conn| users::set_public_key(conn, bob.id, "pk-bob"))
            .unwrap();

        let created = service
            .create(&alice, &key_payload("db", Some(&category_hashid), &[]))
            .unwrap();

        let subscribers = service.get_subscribers(&alice, &created.id).unwrap();
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].login, "bob");
    }

    // user_row is exercised here to keep the fixture honest.
    #[test]
    fn fixture_user_row_matches_seeded_login() {
        let db = test_db();
        let alice = seed_user(&db, "alice", false);
        assert_eq!(user_row(&db, alice.id).login, "alice");
    }
}
