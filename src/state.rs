use crate::config::Config;
use crate::db::{DbPool, SqliteTransactionStore};
use crate::services::materializer::TemplateLocks;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Server-side session store mapping session tokens to user ids.
pub type SessionStore = Arc<Mutex<HashMap<String, String>>>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    /// Shared by every materialization run in this process.
    pub template_locks: TemplateLocks,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            sessions: SessionStore::default(),
            template_locks: TemplateLocks::new(),
        }
    }

    pub fn transaction_store(&self) -> SqliteTransactionStore {
        SqliteTransactionStore::new(self.db.clone())
    }

    /// Open a session for `user_id` and return its random token.
    pub fn start_session(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.clone(), user_id.to_string());
        token
    }

    pub fn session_user(&self, token: &str) -> Option<String> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    pub fn end_session(&self, token: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }
}
