use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

use keyshare_db::Database;
use keyshare_db::models::CategoryRow;
use keyshare_db::queries::{categories, groups, keys, users};
use keyshare_types::api::{CategoryMovePayload, CategoryPayload, CategoryResponse};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::hashid::HashidCodec;
use crate::keys::{prune_copies_of_key, remove_obsolete_copies};

/// Category tree maintenance: hierarchical grouping nodes that scope which
/// groups may access contained keys.
///
/// Invariant: a node's tree level is its parent's level plus one; roots sit
/// at level zero. Cycles are ruled out by construction — every reparenting
/// checks the target against the moved node's own subtree.
#[derive(Clone)]
pub struct CategoryService {
    db: Arc<Database>,
    codec: HashidCodec,
}

impl CategoryService {
    pub fn new(db: Arc<Database>, codec: HashidCodec) -> Self {
        Self { db, codec }
    }

    pub fn create(&self, actor: &Actor, payload: &CategoryPayload) -> ServiceResult<CategoryResponse> {
        let parent_id = payload
            .parent_id
            .as_deref()
            .map(|h| self.codec.decode(h))
            .transpose()?;

        self.db
            .with_tx(|conn| {
                let tree_level = match parent_id {
                    Some(id) => {
                        let parent = categories::find_by_id(conn, id)?
                            .ok_or(ServiceError::NotFound("category"))?;
                        parent.tree_level + 1
                    }
                    None => 0,
                };
                let id = categories::insert(conn, &payload.name, parent_id, tree_level, actor.id)?;
                categories::set_hashid(conn, id, &self.codec.encode(id))?;
                debug!("Created category {} at level {}", id, tree_level);
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get(&self, actor: &Actor, hashid: &str) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_conn(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                if !actor.admin {
                    let authorized = categories::authorized_for_user(conn, actor.id)?;
                    if !authorized.iter().any(|c| c.id == id) {
                        return Err(ServiceError::Forbidden.into());
                    }
                }
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get_all(&self, actor: &Actor) -> ServiceResult<Vec<CategoryResponse>> {
        self.db
            .with_conn(|conn| {
                let rows = if actor.admin {
                    categories::list_all(conn)?
                } else {
                    categories::authorized_for_user(conn, actor.id)?
                };
                rows.iter()
                    .map(|category| category_response(conn, &self.codec, category))
                    .collect()
            })
            .map_err(ServiceError::from_db)
    }

    /// The direct children of a category, visibility-filtered like get_all.
    pub fn get_children(&self, actor: &Actor, hashid: &str) -> ServiceResult<Vec<CategoryResponse>> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_conn(|conn| {
                categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                let visible: Vec<i64> = if actor.admin {
                    categories::child_ids(conn, id)?
                } else {
                    let authorized = categories::authorized_for_user(conn, actor.id)?;
                    categories::child_ids(conn, id)?
                        .into_iter()
                        .filter(|child| authorized.iter().any(|c| c.id == *child))
                        .collect()
                };
                visible
                    .into_iter()
                    .filter_map(|child| categories::find_by_id(conn, child).transpose())
                    .map(|row| category_response(conn, &self.codec, &row?))
                    .collect()
            })
            .map_err(ServiceError::from_db)
    }

    /// Reparents a category. The whole subtree's levels are recomputed, and
    /// a move beneath the node's own subtree is rejected.
    pub fn move_category(
        &self,
        _actor: &Actor,
        hashid: &str,
        payload: &CategoryMovePayload,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        let new_parent_id = payload
            .parent_id
            .as_deref()
            .map(|h| self.codec.decode(h))
            .transpose()?;

        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;

                let tree_level = match new_parent_id {
                    Some(parent_id) => {
                        if parent_id == id || is_descendant(conn, id, parent_id)? {
                            return Err(ServiceError::Conflict(
                                "cannot move a category beneath its own subtree".into(),
                            )
                            .into());
                        }
                        let parent = categories::find_by_id(conn, parent_id)?
                            .ok_or(ServiceError::NotFound("category"))?;
                        parent.tree_level + 1
                    }
                    None => 0,
                };

                categories::set_parent_and_level(conn, category.id, new_parent_id, tree_level)?;
                fix_subtree_levels(conn, category.id, tree_level)?;
                debug!("Moved category {} to level {}", category.id, tree_level);

                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    /// Attaches a key to the category, detaching it from any previous one.
    /// Copies of users who lose access through the move are pruned.
    pub fn add_key(
        &self,
        _actor: &Actor,
        hashid: &str,
        key_hashid: &str,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        let key_id = self.codec.decode(key_hashid)?;

        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                keys::set_category(conn, key.id, Some(category.id))?;
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                prune_copies_of_key(conn, &key)?;
                debug!("Added key {} to category {}", key.id, category.id);
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    /// Detaches a key from the category, leaving it uncategorized. Only the
    /// creator (and ADMIN users) keep their copies afterwards.
    pub fn remove_key(
        &self,
        _actor: &Actor,
        hashid: &str,
        key_hashid: &str,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        let key_id = self.codec.decode(key_hashid)?;

        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                if key.category_id != Some(category.id) {
                    return Err(ServiceError::NotFound("key").into());
                }
                keys::set_category(conn, key.id, None)?;
                let key = keys::find_by_id(conn, key_id)?
                    .ok_or(ServiceError::NotFound("key"))?;
                prune_copies_of_key(conn, &key)?;
                debug!("Removed key {} from category {}", key.id, category.id);
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn add_group(
        &self,
        _actor: &Actor,
        hashid: &str,
        group_id: i64,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                groups::find_by_id(conn, group_id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                categories::add_group(conn, category.id, group_id)?;
                debug!("Authorized group {} on category {}", group_id, category.id);
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    /// Revokes a group's authorization. Every member of the group is swept
    /// for encrypted copies they are no longer entitled to.
    pub fn remove_group(
        &self,
        _actor: &Actor,
        hashid: &str,
        group_id: i64,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                groups::find_by_id(conn, group_id)?
                    .ok_or(ServiceError::NotFound("group"))?;
                categories::remove_group(conn, category.id, group_id)?;
                for user_id in groups::member_ids(conn, group_id)? {
                    if let Some(user) = users::find_by_id(conn, user_id)? {
                        remove_obsolete_copies(conn, &user)?;
                    }
                }
                debug!("Revoked group {} on category {}", group_id, category.id);
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn set_responsible(
        &self,
        _actor: &Actor,
        hashid: &str,
        login: &str,
    ) -> ServiceResult<CategoryResponse> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                categories::set_responsible(conn, category.id, Some(user.id))?;
                debug!("Set responsible '{}' on category {}", user.login, category.id);
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;
                category_response(conn, &self.codec, &category)
            })
            .map_err(ServiceError::from_db)
    }

    /// Deletes a category. Children are orphaned to the deleted node's
    /// parent (becoming roots when there is none) with their subtree levels
    /// recomputed; contained keys become uncategorized and lose all copies
    /// except the creator's and admins'.
    pub fn delete(&self, _actor: &Actor, hashid: &str) -> ServiceResult<()> {
        let id = self.codec.decode(hashid)?;
        self.db
            .with_tx(|conn| {
                let category = categories::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("category"))?;

                let orphan_level = match category.parent_id {
                    Some(parent_id) => {
                        categories::find_by_id(conn, parent_id)?
                            .ok_or(ServiceError::NotFound("category"))?
                            .tree_level
                            + 1
                    }
                    None => 0,
                };
                for child_id in categories::child_ids(conn, category.id)? {
                    categories::set_parent_and_level(
                        conn,
                        child_id,
                        category.parent_id,
                        orphan_level,
                    )?;
                    fix_subtree_levels(conn, child_id, orphan_level)?;
                }

                for key in keys::by_category(conn, category.id)? {
                    keys::set_category(conn, key.id, None)?;
                    let Some(key) = keys::find_by_id(conn, key.id)? else {
                        continue;
                    };
                    prune_copies_of_key(conn, &key)?;
                }

                categories::delete(conn, category.id)?;
                debug!("Deleted category {}", category.id);
                Ok(())
            })
            .map_err(ServiceError::from_db)
    }
}

/// True if `candidate` lies in the subtree rooted at `root`.
fn is_descendant(conn: &Connection, root: i64, candidate: i64) -> Result<bool> {
    let mut stack = categories::child_ids(conn, root)?;
    while let Some(id) = stack.pop() {
        if id == candidate {
            return Ok(true);
        }
        stack.extend(categories::child_ids(conn, id)?);
    }
    Ok(false)
}

/// Recomputes tree levels for the whole subtree below `root`, which already
/// sits at `root_level`.
fn fix_subtree_levels(conn: &Connection, root: i64, root_level: i64) -> Result<()> {
    let mut stack: Vec<(i64, i64)> = categories::child_ids(conn, root)?
        .into_iter()
        .map(|id| (id, root_level + 1))
        .collect();
    while let Some((id, level)) = stack.pop() {
        categories::set_level(conn, id, level)?;
        stack.extend(
            categories::child_ids(conn, id)?
                .into_iter()
                .map(|child| (child, level + 1)),
        );
    }
    Ok(())
}

pub(crate) fn category_response(
    conn: &Connection,
    codec: &HashidCodec,
    category: &CategoryRow,
) -> Result<CategoryResponse> {
    let parent_id = match category.parent_id {
        Some(id) => categories::find_by_id(conn, id)?.map(|c| c.hashid),
        None => None,
    };
    let children = categories::child_ids(conn, category.id)?
        .into_iter()
        .map(|id| codec.encode(id))
        .collect();
    let creator = users::find_by_id(conn, category.creator_id)?
        .map(|user| user.login)
        .unwrap_or_default();
    let responsible = match category.responsible_id {
        Some(id) => users::find_by_id(conn, id)?.map(|user| user.login),
        None => None,
    };
    let mut group_names = Vec::new();
    for group_id in categories::group_ids_of(conn, category.id)? {
        if let Some(group) = groups::find_by_id(conn, group_id)? {
            group_names.push(group.name);
        }
    }
    group_names.sort();
    let key_hashids = keys::by_category(conn, category.id)?
        .into_iter()
        .map(|key| key.hashid)
        .collect();

    Ok(CategoryResponse {
        id: category.hashid.clone(),
        name: category.name.clone(),
        parent_id,
        children,
        tree_level: category.tree_level,
        creator,
        responsible,
        groups: group_names,
        keys: key_hashids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::{seed_category, seed_group, seed_user, test_codec, test_db};

    fn service(db: &Arc<Database>) -> CategoryService {
        CategoryService::new(db.clone(), test_codec())
    }

    fn seed_key(db: &Database, codec: &HashidCodec, creator_id: i64, category_id: Option<i64>) -> i64 {
        db.with_tx(|conn| {
            let id = keys::insert(conn, "db", "svc", "", creator_id, category_id)?;
            keys::set_hashid(conn, id, &codec.encode(id))?;
            Ok(id)
        })
        .unwrap()
    }

    #[test]
    fn child_sits_one_level_below_parent() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", true);
        let root = seed_category(&db, &codec, "root", None, &[], alice.id);

        let child = service
            .create(
                &alice,
                &CategoryPayload {
                    name: "child".into(),
                    parent_id: Some(codec.encode(root)),
                },
            )
            .unwrap();

        assert_eq!(child.tree_level, 1);
        assert_eq!(child.parent_id, Some(codec.encode(root)));
    }

    #[test]
    fn move_recomputes_levels_for_the_whole_subtree() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", true);
        let a = seed_category(&db, &codec, "a", None, &[], alice.id);
        let b = seed_category(&db, &codec, "b", Some(a), &[], alice.id);
        let c = seed_category(&db, &codec, "c", Some(b), &[], alice.id);

        // Promote b to a root: its subtree shifts up by one level.
        let moved = service
            .move_category(
                &alice,
                &codec.encode(b),
                &CategoryMovePayload { parent_id: None },
            )
            .unwrap();
        assert_eq!(moved.tree_level, 0);

        db.with_conn(|conn| {
            assert_eq!(categories::find_by_id(conn, c)?.unwrap().tree_level, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn move_beneath_own_subtree_is_rejected() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let alice = seed_user(&db, "alice", true);
        let a = seed_category(&db, &codec, "a", None, &[], alice.id);
        let b = seed_category(&db, &codec, "b", Some(a), &[], alice.id);
        let c = seed_category(&db, &codec, "c", Some(b), &[], alice.id);

        let result = service.move_category(
            &alice,
            &codec.encode(a),
            &CategoryMovePayload {
                parent_id: Some(codec.encode(c)),
            },
        );
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        let self_move = service.move_category(
            &alice,
            &codec.encode(a),
            &CategoryMovePayload {
                parent_id: Some(codec.encode(a)),
            },
        );
        assert!(matches!(self_move, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn children_listing_respects_authorization() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let root = seed_category(&db, &codec, "root", None, &[], admin.id);
        let visible = seed_category(&db, &codec, "infra", Some(root), &[group], admin.id);
        let _hidden = seed_category(&db, &codec, "hr", Some(root), &[], admin.id);

        let for_admin = service.get_children(&admin, &codec.encode(root)).unwrap();
        assert_eq!(for_admin.len(), 2);

        let for_alice = service.get_children(&alice, &codec.encode(root)).unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].id, codec.encode(visible));
    }

    #[test]
    fn get_all_filters_to_authorized_categories() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let visible = seed_category(&db, &codec, "infra", None, &[group], admin.id);
        let _hidden = seed_category(&db, &codec, "hr", None, &[], admin.id);

        let for_alice = service.get_all(&alice).unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].id, codec.encode(visible));

        assert_eq!(service.get_all(&admin).unwrap().len(), 2);
    }

    #[test]
    fn removing_key_from_category_prunes_member_copies() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], admin.id);
        let key = seed_key(&db, &codec, admin.id, Some(category));
        db.with_conn(|conn| keys::insert_copy(conn, key, alice.id, "ct-alice"))
            .unwrap();

        service
            .remove_key(&admin, &codec.encode(category), &codec.encode(key))
            .unwrap();

        db.with_conn(|conn| {
            assert!(keys::find_by_id(conn, key)?.unwrap().category_id.is_none());
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn removing_key_not_in_category_is_not_found() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let category = seed_category(&db, &codec, "infra", None, &[], admin.id);
        let key = seed_key(&db, &codec, admin.id, None);

        let result = service.remove_key(&admin, &codec.encode(category), &codec.encode(key));
        assert!(matches!(result, Err(ServiceError::NotFound("key"))));
    }

    #[test]
    fn revoking_group_prunes_former_member_copies() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], admin.id);
        let key = seed_key(&db, &codec, admin.id, Some(category));
        db.with_conn(|conn| keys::insert_copy(conn, key, alice.id, "ct-alice"))
            .unwrap();

        service
            .remove_group(&admin, &codec.encode(category), group)
            .unwrap();

        db.with_conn(|conn| {
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_orphans_children_to_grandparent_and_uncategorizes_keys() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let grandparent = seed_category(&db, &codec, "root", None, &[], admin.id);
        let doomed = seed_category(&db, &codec, "doomed", Some(grandparent), &[group], admin.id);
        let child = seed_category(&db, &codec, "child", Some(doomed), &[], admin.id);
        let key = seed_key(&db, &codec, admin.id, Some(doomed));
        db.with_conn(|conn| keys::insert_copy(conn, key, alice.id, "ct-alice"))
            .unwrap();

        service.delete(&admin, &codec.encode(doomed)).unwrap();

        db.with_conn(|conn| {
            assert!(categories::find_by_id(conn, doomed)?.is_none());
            let orphan = categories::find_by_id(conn, child)?.unwrap();
            assert_eq!(orphan.parent_id, Some(grandparent));
            assert_eq!(orphan.tree_level, 1);
            assert!(keys::find_by_id(conn, key)?.unwrap().category_id.is_none());
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn responsible_is_reported_by_login() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let admin = seed_user(&db, "admin", true);
        let _alice = seed_user(&db, "alice", false);
        let category = seed_category(&db, &codec, "infra", None, &[], admin.id);

        let updated = service
            .set_responsible(&admin, &codec.encode(category), "alice")
            .unwrap();
        assert_eq!(updated.responsible.as_deref(), Some("alice"));
    }
}
