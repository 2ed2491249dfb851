use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{EncryptedCopyRow, KeyRow};

const KEY_COLUMNS: &str = "id, hashid, name, login, notes, creator_id, category_id, created_at";

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyRow> {
    Ok(KeyRow {
        id: row.get(0)?,
        hashid: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        name: row.get(2)?,
        login: row.get(3)?,
        notes: row.get(4)?,
        creator_id: row.get(5)?,
        category_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn insert(
    conn: &Connection,
    name: &str,
    login: &str,
    notes: &str,
    creator_id: i64,
    category_id: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO keys (name, login, notes, creator_id, category_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![name, login, notes, creator_id, category_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_hashid(conn: &Connection, id: i64, hashid: &str) -> Result<()> {
    conn.execute(
        "UPDATE keys SET hashid = ?2 WHERE id = ?1",
        params![id, hashid],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<KeyRow>> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row([id], row_to_key).optional()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<KeyRow>> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_key)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn by_category(conn: &Connection, category_id: i64) -> Result<Vec<KeyRow>> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE category_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([category_id], row_to_key)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn by_creator(conn: &Connection, creator_id: i64) -> Result<Vec<KeyRow>> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE creator_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([creator_id], row_to_key)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn update_fields(
    conn: &Connection,
    id: i64,
    name: &str,
    login: &str,
    notes: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE keys SET name = ?2, login = ?3, notes = ?4 WHERE id = ?1",
        params![id, name, login, notes],
    )?;
    Ok(())
}

pub fn set_category(conn: &Connection, id: i64, category_id: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE keys SET category_id = ?2 WHERE id = ?1",
        params![id, category_id],
    )?;
    Ok(())
}

pub fn set_creator(conn: &Connection, id: i64, creator_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE keys SET creator_id = ?2 WHERE id = ?1",
        params![id, creator_id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM keys WHERE id = ?1", [id])?;
    Ok(())
}

// -- Encrypted copies --

fn row_to_copy(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncryptedCopyRow> {
    Ok(EncryptedCopyRow {
        id: row.get(0)?,
        key_id: row.get(1)?,
        owner_id: row.get(2)?,
        payload: row.get(3)?,
    })
}

pub fn insert_copy(conn: &Connection, key_id: i64, owner_id: i64, payload: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO encrypted_copies (key_id, owner_id, payload) VALUES (?1, ?2, ?3)",
        params![key_id, owner_id, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn copies_of_key(conn: &Connection, key_id: i64) -> Result<Vec<EncryptedCopyRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, key_id, owner_id, payload FROM encrypted_copies WHERE key_id = ?1",
    )?;
    let rows = stmt
        .query_map([key_id], row_to_copy)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn copies_of_owner(conn: &Connection, owner_id: i64) -> Result<Vec<EncryptedCopyRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, key_id, owner_id, payload FROM encrypted_copies WHERE owner_id = ?1",
    )?;
    let rows = stmt
        .query_map([owner_id], row_to_copy)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn find_copy(conn: &Connection, key_id: i64, owner_id: i64) -> Result<Option<EncryptedCopyRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, key_id, owner_id, payload FROM encrypted_copies
         WHERE key_id = ?1 AND owner_id = ?2",
    )?;
    Ok(stmt
        .query_row(params![key_id, owner_id], row_to_copy)
        .optional()?)
}

pub fn delete_copy(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM encrypted_copies WHERE id = ?1", [id])?;
    Ok(())
}

pub fn delete_copies_of_key(conn: &Connection, key_id: i64) -> Result<()> {
    conn.execute("DELETE FROM encrypted_copies WHERE key_id = ?1", [key_id])?;
    Ok(())
}

pub fn delete_copies_of_owner(conn: &Connection, owner_id: i64) -> Result<()> {
    conn.execute("DELETE FROM encrypted_copies WHERE owner_id = ?1", [owner_id])?;
    Ok(())
}
