use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::{AppError, AppResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS vectors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    dimension INTEGER NOT NULL CHECK (dimension > 0),
    embedding BLOB NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS vectors_identity_idx ON vectors(identity_id, id);
";

const LATEST_VECTORS: &str = "
SELECT i.name, v.dimension, v.embedding, v.metadata, v.created_at
FROM identities i
JOIN vectors v ON v.id = (
    SELECT MAX(id) FROM vectors WHERE identity_id = i.id
)
ORDER BY v.id ASC";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureMetadata {
    pub captures: usize,
    pub dimension: usize,
    pub source: String,
}

/// The authoritative vector of one identity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentityVector {
    pub name: String,
    pub vector: Vec<f64>,
    pub metadata: Option<CaptureMetadata>,
    pub created_at: DateTime<Utc>,
}

/// One historic vector row of an identity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredVector {
    pub id: i64,
    pub dimension: usize,
    pub metadata: Option<CaptureMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreHealth {
    pub sqlite_version: String,
    pub identities_table: bool,
    pub vectors_table: bool,
    pub identities: usize,
    pub vectors: usize,
}

pub trait VectorStore: Send + Sync {
    /// Inserts the identity if absent and appends a new authoritative vector,
    /// atomically. Returns the creation time as persisted.
    fn put(
        &self,
        name: &str,
        vector: &[f64],
        metadata: &CaptureMetadata,
    ) -> AppResult<DateTime<Utc>>;
    fn get_all(&self) -> AppResult<Vec<IdentityVector>>;
    fn delete(&self, name: &str) -> AppResult<()>;
    fn history(&self, name: &str) -> AppResult<Vec<StoredVector>>;
    fn health(&self) -> AppResult<StoreHealth>;
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteVectorStore {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, busy_timeout: Duration) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| AppError::StorePath {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("opened vector store");
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: ":memory:".into(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn identity_id(tx: &Transaction<'_>, name: &str) -> AppResult<Option<i64>> {
        let id = tx
            .query_row(
                "SELECT id FROM identities WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl VectorStore for SqliteVectorStore {
    #[instrument(skip_all, fields(name = %name, dimension = vector.len()))]
    fn put(
        &self,
        name: &str,
        vector: &[f64],
        metadata: &CaptureMetadata,
    ) -> AppResult<DateTime<Utc>> {
        let now = timestamp_now();
        let stored_at = parse_timestamp(name, &now)?;
        let blob = encode_vector(vector)?;
        let metadata_json = serde_json::to_string(metadata)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO identities (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, now],
        )?;
        let identity_id = Self::identity_id(&tx, name)?.ok_or_else(|| AppError::IdentityNotFound {
            name: name.to_string(),
        })?;
        tx.execute(
            "INSERT INTO vectors (identity_id, dimension, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![identity_id, vector.len() as i64, blob, metadata_json, now],
        )?;
        tx.commit()?;
        debug!("stored vector");
        Ok(stored_at)
    }

    fn get_all(&self) -> AppResult<Vec<IdentityVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(LATEST_VECTORS)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (name, dimension, blob, metadata, created_at) = row?;
            let vector = decode_vector(&name, dimension, &blob)?;
            identities.push(IdentityVector {
                metadata: parse_metadata(metadata.as_deref()),
                created_at: parse_timestamp(&name, &created_at)?,
                name,
                vector,
            });
        }
        Ok(identities)
    }

    #[instrument(skip_all, fields(name = %name))]
    fn delete(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let identity_id = Self::identity_id(&tx, name)?.ok_or_else(|| AppError::IdentityNotFound {
            name: name.to_string(),
        })?;
        tx.execute(
            "DELETE FROM vectors WHERE identity_id = ?1",
            params![identity_id],
        )?;
        tx.execute("DELETE FROM identities WHERE id = ?1", params![identity_id])?;
        tx.commit()?;
        debug!("deleted identity");
        Ok(())
    }

    fn history(&self, name: &str) -> AppResult<Vec<StoredVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT v.id, v.dimension, v.metadata, v.created_at
             FROM vectors v JOIN identities i ON i.id = v.identity_id
             WHERE i.name = ?1
             ORDER BY v.id ASC",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (id, dimension, metadata, created_at) = row?;
            history.push(StoredVector {
                id,
                dimension: dimension.max(0) as usize,
                metadata: parse_metadata(metadata.as_deref()),
                created_at: parse_timestamp(name, &created_at)?,
            });
        }
        if history.is_empty() {
            return Err(AppError::IdentityNotFound {
                name: name.to_string(),
            });
        }
        Ok(history)
    }

    fn health(&self) -> AppResult<StoreHealth> {
        let conn = self.conn.lock();
        let sqlite_version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        let table_exists = |table: &str| -> AppResult<bool> {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        };
        let identities_table = table_exists("identities")?;
        let vectors_table = table_exists("vectors")?;
        let count = |sql: &str| -> AppResult<usize> {
            let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(value.max(0) as usize)
        };
        let identities = if identities_table {
            count("SELECT COUNT(*) FROM identities")?
        } else {
            0
        };
        let vectors = if vectors_table {
            count("SELECT COUNT(*) FROM vectors")?
        } else {
            0
        };

        Ok(StoreHealth {
            sqlite_version,
            identities_table,
            vectors_table,
            identities,
            vectors,
        })
    }
}

pub fn encode_vector(vector: &[f64]) -> AppResult<Vec<u8>> {
    let mut blob = Vec::with_capacity(vector.len() * 8);
    for value in vector {
        blob.write_f64::<LittleEndian>(*value)?;
    }
    Ok(blob)
}

pub fn decode_vector(name: &str, dimension: i64, blob: &[u8]) -> AppResult<Vec<f64>> {
    let expected = usize::try_from(dimension).unwrap_or(0) * 8;
    if dimension <= 0 || blob.len() != expected {
        return Err(AppError::CorruptVector {
            name: name.to_string(),
            message: format!(
                "dimension {dimension} does not match {} stored bytes",
                blob.len()
            ),
        });
    }

    let mut cursor = Cursor::new(blob);
    let mut vector = Vec::with_capacity(dimension as usize);
    for _ in 0..dimension {
        let value = cursor
            .read_f64::<LittleEndian>()
            .map_err(|err| AppError::CorruptVector {
                name: name.to_string(),
                message: err.to_string(),
            })?;
        vector.push(value);
    }
    Ok(vector)
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(name: &str, value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| AppError::CorruptVector {
            name: name.to_string(),
            message: format!("invalid timestamp '{value}': {err}"),
        })
}

fn parse_metadata(raw: Option<&str>) -> Option<CaptureMetadata> {
    raw.and_then(|text| serde_json::from_str(text).ok())
}
