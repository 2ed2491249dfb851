use std::sync::Arc;

use anyhow::Result;
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use rusqlite::Connection;
use tracing::debug;

use keyshare_db::Database;
use keyshare_db::models::UserRow;
use keyshare_db::queries::{categories, groups, keys, tokens, users};
use keyshare_types::api::{RegisterRequest, UserResponse, UserUpdateRequest};
use keyshare_types::models::{ROLE_ADMIN, ROLE_USER};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::keys::{remove_all_copies_for_user, remove_obsolete_copies};

/// User directory: registration, activation, credential and authority
/// management, and deletion with reference dissolution.
#[derive(Clone)]
pub struct UserService {
    db: Arc<Database>,
    /// Orphaned categories and keys are reassigned to this user when their
    /// creator is deleted.
    root_login: String,
}

impl UserService {
    pub fn new(db: Arc<Database>, root_login: impl Into<String>) -> Self {
        Self {
            db,
            root_login: root_login.into(),
        }
    }

    /// Creates the root admin account on first startup.
    pub fn bootstrap_root(&self, email: &str, password: &str) -> ServiceResult<()> {
        let password_hash = hash_password(password)?;
        self.db
            .with_tx(|conn| {
                if users::find_by_login(conn, &self.root_login)?.is_some() {
                    return Ok(());
                }
                let id = users::insert(conn, &self.root_login, email, &password_hash, "", "", None)?;
                users::set_activated(conn, id, true)?;
                users::add_authority(conn, id, ROLE_ADMIN)?;
                users::add_authority(conn, id, ROLE_USER)?;
                debug!("Bootstrapped root user '{}'", self.root_login);
                Ok(())
            })
            .map_err(ServiceError::from_db)
    }

    /// Registers a new user. The login is derived from the email local part;
    /// the account starts deactivated and must redeem the activation key.
    pub fn register(&self, payload: &RegisterRequest) -> ServiceResult<(UserResponse, String)> {
        let email = payload.email.to_lowercase();
        let login = login_from_email(&email)?;
        let password_hash = hash_password(&payload.password)?;
        let activation_key = random_key();

        self.db
            .with_tx(|conn| {
                if users::find_by_email(conn, &email)?.is_some() {
                    return Err(
                        ServiceError::Conflict(format!("email '{}' already exists", email)).into(),
                    );
                }
                if users::find_by_login(conn, &login)?.is_some() {
                    return Err(
                        ServiceError::Conflict(format!("login '{}' already exists", login)).into(),
                    );
                }
                let id = users::insert(
                    conn,
                    &login,
                    &email,
                    &password_hash,
                    &payload.first_name,
                    &payload.last_name,
                    Some(&activation_key),
                )?;
                users::add_authority(conn, id, ROLE_USER)?;
                debug!("Created new user '{}'", login);
                let user = users::find_by_id(conn, id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                Ok((user_response(conn, &user)?, activation_key.clone()))
            })
            .map_err(ServiceError::from_db)
    }

    pub fn activate(&self, activation_key: &str) -> ServiceResult<UserResponse> {
        self.db
            .with_tx(|conn| {
                let user = users::find_by_activation_key(conn, activation_key)?
                    .ok_or(ServiceError::NotFound("activation key"))?;
                users::set_activated(conn, user.id, true)?;
                users::set_activation_key(conn, user.id, None)?;
                debug!("Activated user '{}'", user.login);
                let user = users::find_by_id(conn, user.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    /// Soft-deactivates a user: a fresh activation key is issued and every
    /// stored access token for the login is revoked.
    pub fn deactivate(&self, _actor: &Actor, login: &str) -> ServiceResult<UserResponse> {
        self.db
            .with_tx(|conn| {
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                users::set_activated(conn, user.id, false)?;
                users::set_activation_key(conn, user.id, Some(&random_key()))?;
                revoke_tokens(conn, &user.login)?;
                debug!("Deactivated user '{}'", user.login);
                let user = users::find_by_id(conn, user.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    /// Updates profile fields. An email change re-derives the login,
    /// deactivates the account, and revokes its tokens.
    pub fn update(
        &self,
        _actor: &Actor,
        login: &str,
        payload: &UserUpdateRequest,
    ) -> ServiceResult<UserResponse> {
        let email = payload.email.to_lowercase();
        self.db
            .with_tx(|conn| {
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                let mut new_login = user.login.clone();
                if user.email != email {
                    if users::find_by_email(conn, &email)?.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "email '{}' already exists",
                            email
                        ))
                        .into());
                    }
                    new_login = login_from_email(&email)?;
                    users::set_activated(conn, user.id, false)?;
                    users::set_activation_key(conn, user.id, Some(&random_key()))?;
                    revoke_tokens(conn, &user.login)?;
                }
                users::update_profile(
                    conn,
                    user.id,
                    &new_login,
                    &email,
                    &payload.first_name,
                    &payload.last_name,
                )?;
                debug!("Updated user '{}'", new_login);
                let user = users::find_by_id(conn, user.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    /// Replaces the user's authority set. Tokens are revoked, and the
    /// pruning sweep runs in the same transaction — dropping ADMIN can strip
    /// visibility the user's copies depended on.
    pub fn update_authorities(
        &self,
        _actor: &Actor,
        login: &str,
        names: &[String],
    ) -> ServiceResult<UserResponse> {
        self.db
            .with_tx(|conn| {
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                for name in names {
                    if !users::authority_exists(conn, name)? {
                        return Err(ServiceError::NotFound("authority").into());
                    }
                }
                users::remove_all_authorities(conn, user.id)?;
                for name in names {
                    users::add_authority(conn, user.id, name)?;
                }
                revoke_tokens(conn, &user.login)?;
                remove_obsolete_copies(conn, &user)?;
                debug!("Updated authorities of user '{}': {:?}", user.login, names);
                let user = users::find_by_id(conn, user.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    /// Issues a password reset key. Conflict when one is already
    /// outstanding; NotFound for an unknown or deactivated email.
    pub fn request_reset(&self, email: &str) -> ServiceResult<String> {
        self.db
            .with_tx(|conn| {
                let user = users::find_by_email(conn, &email.to_lowercase())?
                    .filter(|user| user.activated)
                    .ok_or(ServiceError::NotFound("user"))?;
                if user.reset_key.is_some() {
                    return Err(ServiceError::Conflict(
                        "password reset key has already been generated".into(),
                    )
                    .into());
                }
                let reset_key = random_key();
                let now = Utc::now().to_rfc3339();
                users::set_reset_key(conn, user.id, Some(&reset_key), Some(&now))?;
                debug!("Generated reset key for user '{}'", user.login);
                Ok(reset_key)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn reset_password(&self, reset_key: &str, new_password: &str) -> ServiceResult<()> {
        let password_hash = hash_password(new_password)?;
        self.db
            .with_tx(|conn| {
                let user = users::find_by_reset_key(conn, reset_key)?
                    .ok_or(ServiceError::NotFound("reset key"))?;
                users::set_password(conn, user.id, &password_hash)?;
                users::set_reset_key(conn, user.id, None, None)?;
                debug!("Reset password for user '{}'", user.login);
                Ok(())
            })
            .map_err(ServiceError::from_db)
    }

    /// Stores the actor's public key material, making them eligible to
    /// receive encrypted copies.
    pub fn set_public_key(&self, actor: &Actor, public_key: &str) -> ServiceResult<UserResponse> {
        self.db
            .with_tx(|conn| {
                users::set_public_key(conn, actor.id, public_key)?;
                let user = users::find_by_id(conn, actor.id)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get(&self, _actor: &Actor, login: &str) -> ServiceResult<UserResponse> {
        self.db
            .with_conn(|conn| {
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                user_response(conn, &user)
            })
            .map_err(ServiceError::from_db)
    }

    pub fn get_all(&self, _actor: &Actor) -> ServiceResult<Vec<UserResponse>> {
        self.db
            .with_conn(|conn| {
                users::list_all(conn)?
                    .iter()
                    .map(|user| user_response(conn, user))
                    .collect()
            })
            .map_err(ServiceError::from_db)
    }

    /// Hard-deletes a user after dissolving every reference: created
    /// categories and keys are reassigned to the root user, responsible
    /// slots cleared, group memberships removed, owned copies deleted, and
    /// tokens revoked.
    pub fn delete(&self, _actor: &Actor, login: &str) -> ServiceResult<()> {
        if login == self.root_login {
            return Err(ServiceError::Conflict(
                "the root user cannot be deleted".into(),
            ));
        }
        self.db
            .with_tx(|conn| {
                let user = users::find_by_login(conn, login)?
                    .ok_or(ServiceError::NotFound("user"))?;
                let root = users::find_by_login(conn, &self.root_login)?
                    .ok_or(ServiceError::NotFound("root user"))?;

                for category_id in categories::ids_created_by(conn, user.id)? {
                    categories::set_creator(conn, category_id, root.id)?;
                }
                for category_id in categories::ids_responsible_of(conn, user.id)? {
                    categories::set_responsible(conn, category_id, None)?;
                }
                groups::remove_user_everywhere(conn, user.id)?;
                for key in keys::by_creator(conn, user.id)? {
                    keys::set_creator(conn, key.id, root.id)?;
                }
                remove_all_copies_for_user(conn, user.id)?;
                revoke_tokens(conn, &user.login)?;
                users::delete(conn, user.id)?;
                debug!("Deleted user '{}'", user.login);
                Ok(())
            })
            .map_err(ServiceError::from_db)
    }

    /// Verifies credentials for login. Forbidden on a bad password or a
    /// deactivated account; the HTTP layer maps this to 401.
    pub fn authenticate(&self, login: &str, password: &str) -> ServiceResult<UserRow> {
        let user = self
            .db
            .with_conn(|conn| {
                users::find_by_login(conn, login)?
                    .filter(|user| user.activated)
                    .ok_or_else(|| ServiceError::Forbidden.into())
            })
            .map_err(ServiceError::from_db)?;
        verify_password(password, &user.password)?;
        Ok(user)
    }

    /// True when the user holds ROLE_ADMIN. Used at authentication time to
    /// build the Actor.
    pub fn is_admin(&self, user_id: i64) -> ServiceResult<bool> {
        self.db
            .with_conn(|conn| crate::visibility::is_admin(conn, user_id))
            .map_err(ServiceError::from_db)
    }
}

fn revoke_tokens(conn: &Connection, login: &str) -> Result<()> {
    tokens::delete_by_login(conn, login)?;
    debug!("Removed access tokens of user '{}'", login);
    Ok(())
}

pub(crate) fn user_response(conn: &Connection, user: &UserRow) -> Result<UserResponse> {
    let authorities = users::authorities_of(conn, user.id)?;
    let mut group_names = Vec::new();
    for group_id in groups::groups_of_user(conn, user.id)? {
        if let Some(group) = groups::find_by_id(conn, group_id)? {
            group_names.push(group.name);
        }
    }
    group_names.sort();
    Ok(UserResponse {
        login: user.login.clone(),
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        activated: user.activated,
        authorities,
        groups: group_names,
    })
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> ServiceResult<()> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ServiceError::Forbidden)
}

fn login_from_email(email: &str) -> ServiceResult<String> {
    let local = email
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::Conflict(format!("invalid email '{}'", email)))?;
    Ok(local.to_lowercase())
}

fn random_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::{seed_category, seed_group, seed_user, test_codec, test_db};

    fn service(db: &Arc<Database>) -> UserService {
        UserService::new(db.clone(), "root")
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "secret-password".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
        }
    }

    #[test]
    fn register_derives_login_from_email_local_part() {
        let db = test_db();
        let service = service(&db);

        let (user, activation_key) = service
            .register(&register_request("Alice.Smith@Example.COM"))
            .unwrap();

        assert_eq!(user.login, "alice.smith");
        assert_eq!(user.email, "alice.smith@example.com");
        assert!(!user.activated);
        assert_eq!(activation_key.len(), 20);
    }

    #[test]
    fn register_rejects_duplicate_email_and_login() {
        let db = test_db();
        let service = service(&db);

        service.register(&register_request("alice@example.com")).unwrap();
        assert!(matches!(
            service.register(&register_request("alice@example.com")),
            Err(ServiceError::Conflict(_))
        ));
        // Different domain, same local part: the derived login collides.
        assert!(matches!(
            service.register(&register_request("alice@other.org")),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn activation_consumes_the_key() {
        let db = test_db();
        let service = service(&db);
        let (_, activation_key) = service
            .register(&register_request("alice@example.com"))
            .unwrap();

        let user = service.activate(&activation_key).unwrap();
        assert!(user.activated);

        assert!(matches!(
            service.activate(&activation_key),
            Err(ServiceError::NotFound("activation key"))
        ));
    }

    #[test]
    fn deactivate_revokes_stored_tokens() {
        let db = test_db();
        let service = service(&db);
        let admin = seed_user(&db, "admin", true);
        let _alice = seed_user(&db, "alice", false);
        let _bob = seed_user(&db, "bob", false);
        db.with_conn(|conn| {
            tokens::insert(conn, "tok-1", "alice")?;
            tokens::insert(conn, "tok-2", "alice")?;
            tokens::insert(conn, "tok-bob", "bob")
        })
        .unwrap();

        let user = service.deactivate(&admin, "alice").unwrap();
        assert!(!user.activated);

        // Every token of the login goes, other users' tokens stay.
        db.with_conn(|conn| {
            assert!(!tokens::exists(conn, "tok-1")?);
            assert!(!tokens::exists(conn, "tok-2")?);
            assert!(tokens::exists(conn, "tok-bob")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn email_change_deactivates_and_rederives_login() {
        let db = test_db();
        let service = service(&db);
        let admin = seed_user(&db, "admin", true);
        let _alice = seed_user(&db, "alice", false);
        db.with_conn(|conn| tokens::insert(conn, "tok-1", "alice"))
            .unwrap();

        let updated = service
            .update(
                &admin,
                "alice",
                &UserUpdateRequest {
                    email: "alice.b@example.com".into(),
                    first_name: "Alice".into(),
                    last_name: "B".into(),
                },
            )
            .unwrap();

        assert_eq!(updated.login, "alice.b");
        assert!(!updated.activated);
        db.with_conn(|conn| {
            assert!(!tokens::exists(conn, "tok-1")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn dropping_admin_authority_prunes_copies() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let root = seed_user(&db, "root", true);
        let bob = seed_user(&db, "bob", true);
        let group = seed_group(&db, "dev", &[]);
        let category = seed_category(&db, &codec, "infra", None, &[group], root.id);
        db.with_tx(|conn| {
            let id = keys::insert(conn, "db", "svc", "", root.id, Some(category))?;
            keys::insert_copy(conn, id, bob.id, "ct-bob")?;
            Ok(())
        })
        .unwrap();

        // bob's copy existed only through ROLE_ADMIN.
        service
            .update_authorities(&root, "bob", &[ROLE_USER.to_string()])
            .unwrap();

        db.with_conn(|conn| {
            assert!(keys::copies_of_owner(conn, bob.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn update_authorities_rejects_unknown_names() {
        let db = test_db();
        let service = service(&db);
        let root = seed_user(&db, "root", true);
        let _bob = seed_user(&db, "bob", false);

        assert!(matches!(
            service.update_authorities(&root, "bob", &["ROLE_WIZARD".to_string()]),
            Err(ServiceError::NotFound("authority"))
        ));
    }

    #[test]
    fn reset_key_is_single_use_and_not_reissued_while_outstanding() {
        let db = test_db();
        let service = service(&db);
        let _alice = seed_user(&db, "alice", false);

        let reset_key = service.request_reset("alice@example.com").unwrap();
        assert!(matches!(
            service.request_reset("alice@example.com"),
            Err(ServiceError::Conflict(_))
        ));

        service.reset_password(&reset_key, "new-password").unwrap();
        assert!(matches!(
            service.reset_password(&reset_key, "other"),
            Err(ServiceError::NotFound("reset key"))
        ));

        // The outstanding-key slot is free again after the reset.
        service.request_reset("alice@example.com").unwrap();
    }

    #[test]
    fn delete_dissolves_references_to_the_root_user() {
        let db = test_db();
        let service = service(&db);
        let codec = test_codec();
        let root = seed_user(&db, "root", true);
        let alice = seed_user(&db, "alice", false);
        let group = seed_group(&db, "dev", &[alice.id]);
        let category = seed_category(&db, &codec, "infra", None, &[group], alice.id);
        let key = db
            .with_tx(|conn| {
                categories::set_responsible(conn, category, Some(alice.id))?;
                let id = keys::insert(conn, "db", "svc", "", alice.id, Some(category))?;
                keys::insert_copy(conn, id, alice.id, "ct-alice")?;
                tokens::insert(conn, "tok-1", "alice")?;
                Ok(id)
            })
            .unwrap();

        service.delete(&root, "alice").unwrap();

        db.with_conn(|conn| {
            assert!(users::find_by_login(conn, "alice")?.is_none());
            let category = categories::find_by_id(conn, category)?.unwrap();
            assert_eq!(category.creator_id, root.id);
            assert_eq!(category.responsible_id, None);
            assert_eq!(keys::find_by_id(conn, key)?.unwrap().creator_id, root.id);
            assert!(keys::copies_of_owner(conn, alice.id)?.is_empty());
            assert!(groups::member_ids(conn, group)?.is_empty());
            assert!(!tokens::exists(conn, "tok-1")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn root_user_cannot_be_deleted() {
        let db = test_db();
        let service = service(&db);
        let root = seed_user(&db, "root", true);

        assert!(matches!(
            service.delete(&root, "root"),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn authenticate_verifies_password_and_activation() {
        let db = test_db();
        let service = service(&db);
        service.bootstrap_root("root@example.com", "root-password").unwrap();

        assert!(service.authenticate("root", "root-password").is_ok());
        assert!(matches!(
            service.authenticate("root", "wrong"),
            Err(ServiceError::Forbidden)
        ));
        assert!(matches!(
            service.authenticate("nobody", "root-password"),
            Err(ServiceError::Forbidden)
        ));

        let (_, _) = service.register(&register_request("alice@example.com")).unwrap();
        // Not yet activated.
        assert!(matches!(
            service.authenticate("alice", "secret-password"),
            Err(ServiceError::Forbidden)
        ));
    }

    #[test]
    fn bootstrap_root_is_idempotent() {
        let db = test_db();
        let service = service(&db);
        service.bootstrap_root("root@example.com", "pw").unwrap();
        service.bootstrap_root("root@example.com", "pw").unwrap();

        db.with_conn(|conn| {
            assert_eq!(users::list_all(conn)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn login_derivation_rejects_empty_local_part() {
        assert!(login_from_email("@example.com").is_err());
        assert_eq!(login_from_email("Bob@example.com").unwrap(), "bob");
    }
}
