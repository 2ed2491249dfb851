use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::GroupRow;

pub fn insert(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO user_groups (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<GroupRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM user_groups WHERE id = ?1")?;
    Ok(stmt
        .query_row([id], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?)
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<GroupRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM user_groups WHERE name = ?1")?;
    Ok(stmt
        .query_row([name], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<GroupRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM user_groups ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM user_group_members WHERE group_id = ?1", [id])?;
    conn.execute("DELETE FROM user_groups WHERE id = ?1", [id])?;
    Ok(())
}

pub fn add_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_group_members (group_id, user_id) VALUES (?1, ?2)",
        params![group_id, user_id],
    )?;
    Ok(())
}

pub fn remove_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM user_group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
    )?;
    Ok(())
}

pub fn member_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM user_group_members WHERE group_id = ?1")?;
    let ids = stmt
        .query_map([group_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn groups_of_user(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT group_id FROM user_group_members WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn remove_user_everywhere(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute("DELETE FROM user_group_members WHERE user_id = ?1", [user_id])?;
    Ok(())
}

/// Removes the group from every category's authorized set.
pub fn detach_from_categories(conn: &Connection, group_id: i64) -> Result<()> {
    conn.execute("DELETE FROM category_groups WHERE group_id = ?1", [group_id])?;
    Ok(())
}
