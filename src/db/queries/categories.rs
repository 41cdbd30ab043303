use rusqlite::{params, Connection};
use tracing::debug;

use crate::models::Category;

pub fn list_categories(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, created_at FROM categories WHERE user_id = ? ORDER BY name",
    )?;

    let categories = stmt
        .query_map([user_id], |row| {
            Ok(Category {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(categories)
}

pub fn list_category_names(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    Ok(list_categories(conn, user_id)?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

pub fn category_exists(conn: &Connection, user_id: &str, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE user_id = ? AND name = ?)",
        params![user_id, name],
        |row| row.get(0),
    )
}

pub fn create_category(conn: &Connection, user_id: &str, name: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO categories (user_id, name) VALUES (?, ?)",
        params![user_id, name],
    )?;
    let id = conn.last_insert_rowid();
    debug!(category_id = id, name, "Created category");
    Ok(id)
}

pub fn delete_category(conn: &Connection, user_id: &str, id: i64) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM categories WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    Ok(rows > 0)
}
