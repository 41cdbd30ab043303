use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to read migration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Apply every `*.sql` file in `migrations_dir` that is not yet recorded in
/// `_schema_migrations`, in file-name order. Each file runs inside its own
/// transaction together with its bookkeeping row.
///
/// Returns the number of migrations applied by this call.
pub fn run_migrations(conn: &Connection, migrations_dir: &Path) -> Result<usize, MigrationError> {
    tracing::debug!(dir = %migrations_dir.display(), "Checking for database migrations");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let files = migration_files(migrations_dir).map_err(|source| MigrationError::Io {
        path: migrations_dir.to_path_buf(),
        source,
    })?;
    tracing::debug!(count = files.len(), "Found migration files");

    let mut applied = 0;
    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let already_applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM _schema_migrations WHERE name = ?)",
            [&name],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }

        let sql = fs::read_to_string(&path).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(migration = %name, "Applying migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&sql)?;
        tx.execute("INSERT INTO _schema_migrations (name) VALUES (?)", [&name])?;
        tx.commit()?;
        applied += 1;
    }

    if applied > 0 {
        tracing::info!(count = applied, "Migrations applied successfully");
    } else {
        tracing::debug!("Schema is up to date");
    }

    Ok(applied)
}

fn migration_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    files.sort();
    Ok(files)
}
