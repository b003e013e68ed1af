//! SQLite-backed store.
//!
//! Schema:
//! - `vens(id, name UNIQUE, ven_id, registration_id)` - one row per name.
//!   Rows with a NULL `ven_id` are provisioned names that may still be
//!   claimed by a registration.
//! - `samples(id, ven_id, report_resource_id, time, value)` - append-only,
//!   `id` preserves arrival order.
//!
//! rusqlite is blocking, so every call runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{ResourceIdentity, Sample};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vens (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        ven_id TEXT,
        registration_id TEXT
    );
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ven_id TEXT NOT NULL,
        report_resource_id TEXT NOT NULL,
        time TEXT NOT NULL,
        value REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_samples_ven ON samples (ven_id, id);
";

/// Durable store in a single SQLite file
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Store: Opened SQLite database at {}", path.display());

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve a name without assigning ids
    pub async fn provision(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO vens (name, ven_id, registration_id) VALUES (?1, NULL, NULL)",
                params![name],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourceIdentity> {
    let registration_id: Option<String> = row.get(2)?;
    Ok(ResourceIdentity {
        name: row.get(0)?,
        resource_id: row.get(1)?,
        registration_id: registration_id.unwrap_or_default(),
    })
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad sample time {:?}: {}", raw, e)))
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceIdentity>, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            let identity = conn
                .query_row(
                    "SELECT name, ven_id, registration_id FROM vens
                     WHERE name = ?1 AND ven_id IS NOT NULL",
                    params![name],
                    identity_from_row,
                )
                .optional()?;
            Ok(identity)
        })
        .await
    }

    async fn get_by_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceIdentity>, StoreError> {
        let resource_id = resource_id.to_string();
        self.blocking(move |conn| {
            let identity = conn
                .query_row(
                    "SELECT name, ven_id, registration_id FROM vens WHERE ven_id = ?1",
                    params![resource_id],
                    identity_from_row,
                )
                .optional()?;
            Ok(identity)
        })
        .await
    }

    async fn put(&self, identity: &ResourceIdentity) -> Result<(), StoreError> {
        let identity = identity.clone();
        self.blocking(move |conn| {
            // A provisioned row (NULL ven_id) is claimed, an assigned one is left alone
            let changed = conn.execute(
                "INSERT INTO vens (name, ven_id, registration_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE
                 SET ven_id = excluded.ven_id, registration_id = excluded.registration_id
                 WHERE vens.ven_id IS NULL",
                params![identity.name, identity.resource_id, identity.registration_id],
            )?;
            if changed == 0 {
                return Err(StoreError::Duplicate(identity.name));
            }
            debug!("Store: Saved identity {} -> {}", identity.name, identity.resource_id);
            Ok(())
        })
        .await
    }

    async fn list_identities(&self) -> Result<Vec<ResourceIdentity>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT name, ven_id, registration_id FROM vens
                 WHERE ven_id IS NOT NULL ORDER BY id",
            )?;
            let rows = stmt.query_map([], identity_from_row)?;
            let mut identities = Vec::new();
            for row in rows {
                identities.push(row?);
            }
            Ok(identities)
        })
        .await
    }

    async fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        let sample = sample.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO samples (ven_id, report_resource_id, time, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sample.resource_id,
                    sample.report_resource_id,
                    sample.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    sample.value
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_by_resource(&self, resource_id: &str) -> Result<Vec<Sample>, StoreError> {
        let resource_id = resource_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ven_id, report_resource_id, time, value FROM samples
                 WHERE ven_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![resource_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;

            let mut samples = Vec::new();
            for row in rows {
                let (resource_id, report_resource_id, time, value) = row?;
                samples.push(Sample {
                    resource_id,
                    report_resource_id,
                    timestamp: parse_time(&time)?,
                    value,
                });
            }
            Ok(samples)
        })
        .await
    }
}
