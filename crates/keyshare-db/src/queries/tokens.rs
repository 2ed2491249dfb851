use anyhow::Result;
use rusqlite::{Connection, params};

pub fn insert(conn: &Connection, token: &str, login: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO access_tokens (token, user_login) VALUES (?1, ?2)",
        params![token, login],
    )?;
    Ok(())
}

pub fn exists(conn: &Connection, token: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM access_tokens WHERE token = ?1",
        [token],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn delete_by_login(conn: &Connection, login: &str) -> Result<()> {
    conn.execute("DELETE FROM access_tokens WHERE user_login = ?1", [login])?;
    Ok(())
}
