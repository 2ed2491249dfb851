use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::CategoryRow;

const CATEGORY_COLUMNS: &str =
    "id, hashid, name, parent_id, tree_level, creator_id, responsible_id";

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryRow> {
    Ok(CategoryRow {
        id: row.get(0)?,
        hashid: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        name: row.get(2)?,
        parent_id: row.get(3)?,
        tree_level: row.get(4)?,
        creator_id: row.get(5)?,
        responsible_id: row.get(6)?,
    })
}

pub fn insert(
    conn: &Connection,
    name: &str,
    parent_id: Option<i64>,
    tree_level: i64,
    creator_id: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO categories (name, parent_id, tree_level, creator_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, parent_id, tree_level, creator_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_hashid(conn: &Connection, id: i64, hashid: &str) -> Result<()> {
    conn.execute(
        "UPDATE categories SET hashid = ?2 WHERE id = ?1",
        params![id, hashid],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<CategoryRow>> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row([id], row_to_category).optional()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<CategoryRow>> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_category)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn child_ids(conn: &Connection, parent_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM categories WHERE parent_id = ?1")?;
    let ids = stmt
        .query_map([parent_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn set_parent_and_level(
    conn: &Connection,
    id: i64,
    parent_id: Option<i64>,
    tree_level: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE categories SET parent_id = ?2, tree_level = ?3 WHERE id = ?1",
        params![id, parent_id, tree_level],
    )?;
    Ok(())
}

pub fn set_level(conn: &Connection, id: i64, tree_level: i64) -> Result<()> {
    conn.execute(
        "UPDATE categories SET tree_level = ?2 WHERE id = ?1",
        params![id, tree_level],
    )?;
    Ok(())
}

pub fn set_responsible(conn: &Connection, id: i64, responsible_id: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE categories SET responsible_id = ?2 WHERE id = ?1",
        params![id, responsible_id],
    )?;
    Ok(())
}

pub fn set_creator(conn: &Connection, id: i64, creator_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE categories SET creator_id = ?2 WHERE id = ?1",
        params![id, creator_id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM category_groups WHERE category_id = ?1", [id])?;
    conn.execute("DELETE FROM categories WHERE id = ?1", [id])?;
    Ok(())
}

// -- Authorized groups --

pub fn group_ids_of(conn: &Connection, category_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT group_id FROM category_groups WHERE category_id = ?1")?;
    let ids = stmt
        .query_map([category_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn add_group(conn: &Connection, category_id: i64, group_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO category_groups (category_id, group_id) VALUES (?1, ?2)",
        params![category_id, group_id],
    )?;
    Ok(())
}

pub fn remove_group(conn: &Connection, category_id: i64, group_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM category_groups WHERE category_id = ?1 AND group_id = ?2",
        params![category_id, group_id],
    )?;
    Ok(())
}

/// Categories authorized for at least one of the user's groups.
pub fn authorized_for_user(conn: &Connection, user_id: i64) -> Result<Vec<CategoryRow>> {
    let sql = format!(
        "SELECT DISTINCT {CATEGORY_COLUMNS} FROM categories
         WHERE id IN (
             SELECT cg.category_id FROM category_groups cg
             JOIN user_group_members ugm ON ugm.group_id = cg.group_id
             WHERE ugm.user_id = ?1
         )
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], row_to_category)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn ids_created_by(conn: &Connection, creator_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM categories WHERE creator_id = ?1")?;
    let ids = stmt
        .query_map([creator_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn ids_responsible_of(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM categories WHERE responsible_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}
