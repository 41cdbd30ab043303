use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, trace};

use crate::models::{NewTransaction, Transaction};

const SELECT_COLUMNS: &str = "SELECT id, user_id, amount_cents, title, date, is_income,
        category_name, split_with, is_impulse, is_recurring, recurrence,
        last_generated_date, created_at, updated_at
     FROM transactions";

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let recurrence: Option<String> = row.get(10)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount_cents: row.get(2)?,
        title: row.get(3)?,
        date: row.get(4)?,
        is_income: row.get(5)?,
        category_name: row.get(6)?,
        split_with: row.get(7)?,
        is_impulse: row.get(8)?,
        is_recurring: row.get(9)?,
        recurrence: recurrence.and_then(|r| r.parse().ok()),
        last_generated_date: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Every recurring template across all users. Ordering is unspecified.
pub fn list_templates(conn: &Connection) -> rusqlite::Result<Vec<Transaction>> {
    let sql = format!(
        "{} WHERE is_recurring = 1 AND recurrence IS NOT NULL",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let templates = stmt
        .query_map([], row_to_transaction)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    debug!(count = templates.len(), "Listed recurring templates");
    Ok(templates)
}

pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> rusqlite::Result<Vec<Transaction>> {
    let sql = format!(
        "{} WHERE user_id = ? ORDER BY date DESC, id DESC LIMIT ?",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(params![user_id, limit.unwrap_or(-1)], row_to_transaction)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    debug!(user_id, count = transactions.len(), "Listed transactions");
    Ok(transactions)
}

pub fn get_transaction(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> rusqlite::Result<Option<Transaction>> {
    trace!(transaction_id = id, "Fetching transaction");
    let sql = format!("{} WHERE id = ? AND user_id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, params![id, user_id], row_to_transaction)
        .optional()
}

/// Current checkpoint of a template. The outer `None` means the template no
/// longer exists (or is no longer recurring).
pub fn get_checkpoint(conn: &Connection, id: i64) -> rusqlite::Result<Option<Option<NaiveDate>>> {
    conn.query_row(
        "SELECT last_generated_date FROM transactions WHERE id = ? AND is_recurring = 1",
        [id],
        |row| row.get(0),
    )
    .optional()
}

pub fn create_transaction(conn: &Connection, tx: &NewTransaction) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO transactions (user_id, amount_cents, title, date, is_income,
         category_name, split_with, is_impulse, is_recurring, recurrence)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            tx.user_id,
            tx.amount_cents,
            tx.title,
            tx.date,
            tx.is_income,
            tx.category_name,
            tx.split_with,
            tx.is_impulse,
            tx.is_recurring,
            tx.recurrence.map(|r| r.as_str()),
        ],
    )?;

    let id = conn.last_insert_rowid();
    debug!(
        transaction_id = id,
        amount_cents = tx.amount_cents,
        recurring = tx.is_recurring,
        "Created transaction"
    );
    Ok(id)
}

/// Overwrite the editable fields of a transaction owned by `user_id`.
/// The checkpoint is left alone; turning recurrence off clears it.
pub fn update_transaction(
    conn: &Connection,
    user_id: &str,
    id: i64,
    tx: &NewTransaction,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE transactions SET amount_cents = ?, title = ?, date = ?, is_income = ?,
         category_name = ?, split_with = ?, is_impulse = ?, is_recurring = ?, recurrence = ?,
         last_generated_date = CASE WHEN ? THEN last_generated_date ELSE NULL END,
         updated_at = datetime('now')
         WHERE id = ? AND user_id = ?",
        params![
            tx.amount_cents,
            tx.title,
            tx.date,
            tx.is_income,
            tx.category_name,
            tx.split_with,
            tx.is_impulse,
            tx.is_recurring,
            tx.recurrence.map(|r| r.as_str()),
            tx.is_recurring,
            id,
            user_id,
        ],
    )?;

    if rows > 0 {
        debug!(transaction_id = id, "Updated transaction");
    }
    Ok(rows > 0)
}

pub fn delete_transaction(conn: &Connection, user_id: &str, id: i64) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM transactions WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    if rows > 0 {
        debug!(transaction_id = id, "Deleted transaction");
    }
    Ok(rows > 0)
}

/// Move a template's checkpoint to `new`, but only if it still holds
/// `expected`. Returns `false` when another writer got there first.
pub fn update_checkpoint(
    conn: &Connection,
    id: i64,
    expected: Option<NaiveDate>,
    new: NaiveDate,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE transactions SET last_generated_date = ?, updated_at = datetime('now')
         WHERE id = ? AND is_recurring = 1 AND last_generated_date IS ?",
        params![new, id, expected],
    )?;
    trace!(template_id = id, updated = rows, "Checkpoint update");
    Ok(rows == 1)
}

/// `(title, category)` pairs of the user's most recent categorized expenses.
pub fn recent_categorized(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT title, category_name FROM transactions
         WHERE user_id = ? AND is_income = 0 AND category_name IS NOT NULL
         ORDER BY created_at DESC, id DESC
         LIMIT ?",
    )?;
    let pairs = stmt
        .query_map(params![user_id, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pairs)
}
