use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::models::{NewUser, User};

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Insert a user and return the generated id.
pub fn create_user(conn: &Connection, user: &NewUser) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users (id, email, full_name, password_hash) VALUES (?, ?, ?, ?)",
        params![id, user.email, user.full_name, user.password_hash],
    )?;
    debug!(user_id = %id, "Created user");
    Ok(id)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, email, full_name, password_hash, created_at FROM users WHERE email = ?",
        [email],
        row_to_user,
    )
    .optional()
}

pub fn get_user(conn: &Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, email, full_name, password_hash, created_at FROM users WHERE id = ?",
        [id],
        row_to_user,
    )
    .optional()
}
