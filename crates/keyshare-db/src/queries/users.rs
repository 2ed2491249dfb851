use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::UserRow;

const USER_COLUMNS: &str = "id, login, email, password, first_name, last_name, activated, \
     activation_key, reset_key, reset_date, public_key, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        login: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        activated: row.get(6)?,
        activation_key: row.get(7)?,
        reset_key: row.get(8)?,
        reset_date: row.get(9)?,
        public_key: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn insert(
    conn: &Connection,
    login: &str,
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
    activation_key: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (login, email, password, first_name, last_name, activation_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![login, email, password_hash, first_name, last_name, activation_key],
    )?;
    Ok(conn.last_insert_rowid())
}

fn find_by_column(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row([value], row_to_user).optional()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row([id], row_to_user).optional()?)
}

pub fn find_by_login(conn: &Connection, login: &str) -> Result<Option<UserRow>> {
    find_by_column(conn, "login", login)
}

pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    find_by_column(conn, "email", email)
}

pub fn find_by_activation_key(conn: &Connection, key: &str) -> Result<Option<UserRow>> {
    find_by_column(conn, "activation_key", key)
}

pub fn find_by_reset_key(conn: &Connection, key: &str) -> Result<Option<UserRow>> {
    find_by_column(conn, "reset_key", key)
}

pub fn list_all(conn: &Connection) -> Result<Vec<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn update_profile(
    conn: &Connection,
    id: i64,
    login: &str,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE users SET login = ?2, email = ?3, first_name = ?4, last_name = ?5 WHERE id = ?1",
        params![id, login, email, first_name, last_name],
    )?;
    Ok(())
}

pub fn set_password(conn: &Connection, id: i64, password_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET password = ?2 WHERE id = ?1",
        params![id, password_hash],
    )?;
    Ok(())
}

pub fn set_activated(conn: &Connection, id: i64, activated: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET activated = ?2 WHERE id = ?1",
        params![id, activated],
    )?;
    Ok(())
}

pub fn set_activation_key(conn: &Connection, id: i64, key: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE users SET activation_key = ?2 WHERE id = ?1",
        params![id, key],
    )?;
    Ok(())
}

pub fn set_reset_key(
    conn: &Connection,
    id: i64,
    key: Option<&str>,
    date: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE users SET reset_key = ?2, reset_date = ?3 WHERE id = ?1",
        params![id, key, date],
    )?;
    Ok(())
}

pub fn set_public_key(conn: &Connection, id: i64, public_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET public_key = ?2 WHERE id = ?1",
        params![id, public_key],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM user_authorities WHERE user_id = ?1", [id])?;
    conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    Ok(())
}

// -- Authorities --

pub fn authorities_of(conn: &Connection, user_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT authority_name FROM user_authorities WHERE user_id = ?1 ORDER BY authority_name",
    )?;
    let names = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

pub fn has_authority(conn: &Connection, user_id: i64, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_authorities WHERE user_id = ?1 AND authority_name = ?2",
        params![user_id, name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn add_authority(conn: &Connection, user_id: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_authorities (user_id, authority_name) VALUES (?1, ?2)",
        params![user_id, name],
    )?;
    Ok(())
}

pub fn remove_all_authorities(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute("DELETE FROM user_authorities WHERE user_id = ?1", [user_id])?;
    Ok(())
}

pub fn with_authority(conn: &Connection, name: &str) -> Result<Vec<UserRow>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE id IN (SELECT user_id FROM user_authorities WHERE authority_name = ?1)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([name], row_to_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn authority_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM authorities WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_authorities(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM authorities ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
