//! Database layer: the persistence collaborator for the engine.
//!
//! Every public engine operation runs inside a single `IMMEDIATE` SQLite
//! transaction, so its reads and writes are atomic with respect to other
//! writers. Events produced by the operation are delivered after commit.

pub mod cascade;
pub mod deps;
pub mod schedule;
pub mod state_transitions;
pub mod tasks;
pub mod workflow;

use crate::events::{self, EventNotifier, TaskEvent};
use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection and an optional event notifier.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    notifier: Option<Arc<dyn EventNotifier>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets the UI read while the background executor writes.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            notifier: None,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Attach a notifier that receives every committed mutation.
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.lock();
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for migration in report.applied_migrations() {
            tracing::debug!(migration = %migration, "applied migration");
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a read-only function with exclusive access to the connection.
    pub fn with_conn<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute `f` inside an immediate transaction.
    ///
    /// Commits when `f` succeeds and then dispatches the events it recorded.
    /// On error the transaction rolls back and the events are dropped.
    pub(crate) fn with_tx<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>, &mut Vec<TaskEvent>) -> std::result::Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut pending = Vec::new();
        let value = {
            let mut conn = self.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx, &mut pending)?;
            tx.commit()?;
            value
        };

        // Lock is released: notifiers may call back into the database.
        events::dispatch(self.notifier.as_ref(), pending);

        Ok(value)
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
