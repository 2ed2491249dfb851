use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            login           TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            first_name      TEXT NOT NULL DEFAULT '',
            last_name       TEXT NOT NULL DEFAULT '',
            activated       INTEGER NOT NULL DEFAULT 0,
            activation_key  TEXT,
            reset_key       TEXT,
            reset_date      TEXT,
            public_key      TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS authorities (
            name        TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS user_authorities (
            user_id         INTEGER NOT NULL REFERENCES users(id),
            authority_name  TEXT NOT NULL REFERENCES authorities(name),
            PRIMARY KEY (user_id, authority_name)
        );

        CREATE TABLE IF NOT EXISTS user_groups (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_group_members (
            group_id    INTEGER NOT NULL REFERENCES user_groups(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            hashid          TEXT,
            name            TEXT NOT NULL,
            parent_id       INTEGER REFERENCES categories(id),
            tree_level      INTEGER NOT NULL DEFAULT 0,
            creator_id      INTEGER NOT NULL REFERENCES users(id),
            responsible_id  INTEGER REFERENCES users(id),
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_categories_parent
            ON categories(parent_id);

        CREATE TABLE IF NOT EXISTS category_groups (
            category_id INTEGER NOT NULL REFERENCES categories(id),
            group_id    INTEGER NOT NULL REFERENCES user_groups(id),
            PRIMARY KEY (category_id, group_id)
        );

        CREATE TABLE IF NOT EXISTS keys (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            hashid      TEXT,
            name        TEXT NOT NULL,
            login       TEXT NOT NULL DEFAULT '',
            notes       TEXT NOT NULL DEFAULT '',
            creator_id  INTEGER NOT NULL REFERENCES users(id),
            category_id INTEGER REFERENCES categories(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_keys_category
            ON keys(category_id);

        CREATE TABLE IF NOT EXISTS encrypted_copies (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            key_id      INTEGER NOT NULL REFERENCES keys(id),
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            payload     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (key_id, owner_id)
        );

        CREATE INDEX IF NOT EXISTS idx_copies_owner
            ON encrypted_copies(owner_id);

        CREATE TABLE IF NOT EXISTS access_tokens (
            token       TEXT PRIMARY KEY,
            user_login  TEXT NOT NULL,
            issued_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_tokens_login
            ON access_tokens(user_login);

        -- Seed the role table
        INSERT OR IGNORE INTO authorities (name) VALUES ('ROLE_ADMIN');
        INSERT OR IGNORE INTO authorities (name) VALUES ('ROLE_USER');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
