use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

use super::{decide, FeatureStore, UpsertOutcome};
use crate::domain::{EntityId, FeatureVector};
use crate::error::Result;

/// Online store in a single SQLite file, one row per entity
pub struct SqliteFeatureStore {
    conn: Mutex<Connection>,
}

impl SqliteFeatureStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %db_path.display(), "Opened online feature store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entity_features (
                entity_id   INTEGER PRIMARY KEY,
                year        INTEGER NOT NULL,
                payload     TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl FeatureStore for SqliteFeatureStore {
    async fn upsert(&self, vector: FeatureVector) -> Result<UpsertOutcome> {
        let payload = serde_json::to_string(&vector)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT payload FROM entity_features WHERE entity_id = ?1",
                params![vector.entity_id() as i64],
                |row| row.get(0),
            )
            .optional()?;
        let existing: Option<FeatureVector> = match existing {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };

        let outcome = match (&existing, decide(existing.as_ref(), &vector)) {
            // Stored payloads went through JSON once; compare in that form too
            (Some(current), UpsertOutcome::Replaced)
                if current.year() == vector.year() && serde_json::to_string(current)? == payload =>
            {
                UpsertOutcome::Unchanged
            }
            (_, outcome) => outcome,
        };

        if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Replaced) {
            tx.execute(
                "INSERT INTO entity_features (entity_id, year, payload, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_id) DO UPDATE SET year=excluded.year, payload=excluded.payload, updated_at=excluded.updated_at",
                params![
                    vector.entity_id() as i64,
                    vector.year(),
                    payload,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    async fn get(&self, entity_id: EntityId) -> Result<Option<FeatureVector>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM entity_features WHERE entity_id = ?1",
                params![entity_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn snapshot(&self) -> Result<Vec<FeatureVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM entity_features ORDER BY entity_id")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut vectors = Vec::with_capacity(payloads.len());
        for text in payloads {
            vectors.push(serde_json::from_str(&text)?);
        }
        Ok(vectors)
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entity_features", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
