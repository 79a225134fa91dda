pub(crate) mod components;
pub(crate) mod pages;
mod schema;
pub(crate) mod versions;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::error::{PageError, Result};
use crate::providers::{Collaborators, IdentityProvider, TemplateCatalog};

pub use components::generate_key;
pub use versions::{ReconcileReport, RestoreResult};

pub(crate) use pages::require_live_page;

/// Handle to the page store.
///
/// Cloning is cheap and shares the underlying connection. Every write runs in
/// a single immediate transaction, so readers never observe a half-applied
/// operation and a failed operation leaves nothing behind.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    collaborators: Collaborators,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(crate::config::default_database_path()?)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collaborators: Collaborators::default(),
        })
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        schema::run_migrations(&conn)
    }

    /// A handle sharing this connection that stamps audit fields with the
    /// given identity.
    pub fn acting_as(&self, identity: impl IdentityProvider + 'static) -> Self {
        Self {
            conn: self.conn.clone(),
            collaborators: Collaborators {
                identity: Arc::new(identity),
                templates: self.collaborators.templates.clone(),
            },
        }
    }

    pub fn with_templates(mut self, templates: impl TemplateCatalog + 'static) -> Self {
        self.collaborators.templates = Arc::new(templates);
        self
    }

    pub fn current_user(&self) -> String {
        self.collaborators.identity.current_user()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PageError::Internal("database lock poisoned".to_string()))
    }

    /// Run `f` inside one write transaction. The transaction commits only if
    /// `f` succeeds; on error it is dropped and rolled back.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &Collaborators) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx, &self.collaborators)?;
        tx.commit()?;
        Ok(out)
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            collaborators: self.collaborators.clone(),
        }
    }
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_uuid(row, idx).map(Some),
        None => Ok(None),
    }
}

fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_datetime(row, idx).map(Some),
        None => Ok(None),
    }
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
