use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries::transactions;
use crate::db::DbPool;
use crate::error::StoreError;
use crate::models::{NewTransaction, Transaction};
use crate::services::materializer::TransactionStore;

/// [`TransactionStore`] over the application's SQLite pool. Every call
/// checks out its own connection.
#[derive(Clone)]
pub struct SqliteTransactionStore {
    pool: DbPool,
}

impl SqliteTransactionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TransactionStore for SqliteTransactionStore {
    fn find_templates(&self) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.pool.get()?;
        ConnectionStore { conn: &conn }.find_templates()
    }

    fn current_checkpoint(&self, template_id: i64) -> Result<Option<NaiveDate>, StoreError> {
        let conn = self.pool.get()?;
        ConnectionStore { conn: &conn }.current_checkpoint(template_id)
    }

    fn insert(&self, record: &NewTransaction) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        ConnectionStore { conn: &conn }.insert(record)
    }

    fn update_checkpoint(
        &self,
        template_id: i64,
        expected: Option<NaiveDate>,
        new: NaiveDate,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        ConnectionStore { conn: &conn }.update_checkpoint(template_id, expected, new)
    }

    /// Runs `unit` inside an `IMMEDIATE` transaction, so writers in other
    /// processes sharing the database file queue behind it.
    fn atomically(
        &self,
        unit: &mut dyn FnMut(&dyn TransactionStore) -> Result<i64, StoreError>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = unit(&ConnectionStore { conn: &tx })?;
        tx.commit()?;
        Ok(id)
    }
}

/// Store bound to a single connection, and to its open transaction if any.
struct ConnectionStore<'c> {
    conn: &'c Connection,
}

impl TransactionStore for ConnectionStore<'_> {
    fn find_templates(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(transactions::list_templates(self.conn)?)
    }

    fn current_checkpoint(&self, template_id: i64) -> Result<Option<NaiveDate>, StoreError> {
        transactions::get_checkpoint(self.conn, template_id)?
            .ok_or(StoreError::TemplateNotFound(template_id))
    }

    fn insert(&self, record: &NewTransaction) -> Result<i64, StoreError> {
        Ok(transactions::create_transaction(self.conn, record)?)
    }

    fn update_checkpoint(
        &self,
        template_id: i64,
        expected: Option<NaiveDate>,
        new: NaiveDate,
    ) -> Result<(), StoreError> {
        if transactions::update_checkpoint(self.conn, template_id, expected, new)? {
            Ok(())
        } else {
            Err(StoreError::StaleCheckpoint(template_id))
        }
    }

    fn atomically(
        &self,
        unit: &mut dyn FnMut(&dyn TransactionStore) -> Result<i64, StoreError>,
    ) -> Result<i64, StoreError> {
        unit(self)
    }
}
