// src/store.rs

use crate::models::{ChunkRecord, ProgressSnapshot, TaskId};
use bytes::Bytes;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A persisted progress snapshot and whether its bytes reached disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub snapshot: ProgressSnapshot,
    pub saved: bool,
}

/// Metadata of a stored chunk record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    pub id: TaskId,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
}

/// Durable progress records and chunk records, in one SQLite database.
///
/// Progress records are small and rewritten often. Chunk records are written
/// once per finished transfer and live until the bytes are saved or discarded.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Connection>,
}

impl TaskStore {
    /// Opens (or creates) the database file and its tables.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).await?;
        Self::with_connection(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn: Arc::new(conn) };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS progress (
                        id          INTEGER PRIMARY KEY,
                        snapshot    TEXT NOT NULL,
                        saved       INTEGER NOT NULL DEFAULT 0
                    );
                    CREATE TABLE IF NOT EXISTS chunk_records (
                        id          INTEGER PRIMARY KEY,
                        filename    TEXT NOT NULL,
                        mime_type   TEXT NOT NULL,
                        total_bytes INTEGER NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS chunks (
                        record_id   INTEGER NOT NULL,
                        ordinal     INTEGER NOT NULL,
                        data        BLOB NOT NULL,
                        PRIMARY KEY (record_id, ordinal)
                    );",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Inserts or replaces the progress snapshot for its task, keeping the saved flag.
    pub async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), StoreError> {
        let data = serde_json::to_string(snapshot)?;
        let id = snapshot.id as i64;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO progress (id, snapshot) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot",
                    params![id, data],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load_progress(&self, id: TaskId) -> Result<Option<ProgressRecord>, StoreError> {
        let key = id as i64;
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT snapshot, saved FROM progress WHERE id = ?1",
                        params![key],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(data, saved)| {
            Ok(ProgressRecord { snapshot: serde_json::from_str(&data)?, saved })
        })
        .transpose()
    }

    /// All progress records, oldest task first.
    pub async fn list_progress(&self) -> Result<Vec<ProgressRecord>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT snapshot, saved FROM progress ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(data, saved)| {
                Ok(ProgressRecord { snapshot: serde_json::from_str(&data)?, saved })
            })
            .collect()
    }

    pub async fn mark_saved(&self, id: TaskId) -> Result<(), StoreError> {
        let key = id as i64;
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE progress SET saved = 1 WHERE id = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_progress(&self, id: TaskId) -> Result<(), StoreError> {
        let key = id as i64;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM progress WHERE id = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Writes a chunk record and all of its chunks in one transaction.
    pub async fn put_chunks(&self, record: &ChunkRecord) -> Result<(), StoreError> {
        let key = record.id as i64;
        let filename = record.filename.clone();
        let mime_type = record.mime_type.clone();
        let total_bytes = record.total_bytes as i64;
        let chunks = record.chunks.clone();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunks WHERE record_id = ?1", params![key])?;
                tx.execute(
                    "INSERT OR REPLACE INTO chunk_records (id, filename, mime_type, total_bytes)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, filename, mime_type, total_bytes],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO chunks (record_id, ordinal, data) VALUES (?1, ?2, ?3)",
                    )?;
                    for (ordinal, chunk) in chunks.iter().enumerate() {
                        stmt.execute(params![key, ordinal as i64, chunk.as_ref()])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_chunks(&self, id: TaskId) -> Result<Option<ChunkRecord>, StoreError> {
        let key = id as i64;
        let record = self
            .conn
            .call(move |conn| {
                let header = conn
                    .query_row(
                        "SELECT filename, mime_type, total_bytes FROM chunk_records WHERE id = ?1",
                        params![key],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                let Some((filename, mime_type, total_bytes)) = header else {
                    return Ok(None);
                };

                let mut stmt =
                    conn.prepare("SELECT data FROM chunks WHERE record_id = ?1 ORDER BY ordinal")?;
                let chunks = stmt
                    .query_map(params![key], |row| row.get::<_, Vec<u8>>(0).map(Bytes::from))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;

                Ok(Some(ChunkRecord {
                    id,
                    filename,
                    mime_type,
                    total_bytes: total_bytes as u64,
                    chunks,
                }))
            })
            .await?;
        Ok(record)
    }

    /// Chunk record metadata without loading its bytes.
    pub async fn chunk_info(&self, id: TaskId) -> Result<Option<ChunkInfo>, StoreError> {
        let key = id as i64;
        let info = self
            .conn
            .call(move |conn| {
                let info = conn
                    .query_row(
                        "SELECT filename, mime_type, total_bytes FROM chunk_records WHERE id = ?1",
                        params![key],
                        |row| {
                            Ok(ChunkInfo {
                                id,
                                filename: row.get(0)?,
                                mime_type: row.get(1)?,
                                total_bytes: row.get::<_, i64>(2)? as u64,
                            })
                        },
                    )
                    .optional()?;
                Ok(info)
            })
            .await?;
        Ok(info)
    }

    pub async fn delete_chunks(&self, id: TaskId) -> Result<(), StoreError> {
        let key = id as i64;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunks WHERE record_id = ?1", params![key])?;
                tx.execute("DELETE FROM chunk_records WHERE id = ?1", params![key])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_chunk_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM chunk_records ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids.into_iter().map(|id| id as TaskId).collect())
    }
}
