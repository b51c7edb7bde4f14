//! Snapshot stores: one JSON file per trader, or a SQLite table.

use super::snapshot::PersistedSnapshot;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("persistence writer is closed")]
    Closed,
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which store backs the snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// Blocking snapshot storage. Only the persistence writer calls `save`.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError>;

    fn load(&self, trader_id: &str) -> Result<Option<PersistedSnapshot>, PersistenceError>;

    /// Every stored snapshot, ordered by trader id.
    fn list(&self) -> Result<Vec<PersistedSnapshot>, PersistenceError>;
}

const FILE_SUFFIX: &str = "_trader.json";

/// `{dir}/{trader_id}_trader.json`, replaced atomically on every save.
/// Whitespace and path separators in the id become `_`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, trader_id: &str) -> PathBuf {
        let stem: String = trader_id
            .chars()
            .map(|c| {
                if c.is_whitespace() || matches!(c, '/' | '\\' | ':') {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        self.dir.join(format!("{}{}", stem, FILE_SUFFIX))
    }

    fn read(path: &Path) -> Result<PersistedSnapshot, PersistenceError> {
        let content = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        let path = self.path_for(&snapshot.trader_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;

        let mut file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
        file.write_all(&body).map_err(|e| PersistenceError::io(&tmp, e))?;
        file.sync_all().map_err(|e| PersistenceError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(|e| PersistenceError::io(&path, e))?;

        debug!(trader = %snapshot.trader_id, path = %path.display(), "Snapshot written");
        Ok(())
    }

    fn load(&self, trader_id: &str) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        let path = self.path_for(trader_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn list(&self) -> Result<Vec<PersistedSnapshot>, PersistenceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&self.dir, e))?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FILE_SUFFIX));
            if is_snapshot {
                snapshots.push(Self::read(&path)?);
            }
        }
        snapshots.sort_by(|a, b| a.trader_id.cmp(&b.trader_id));
        Ok(snapshots)
    }
}

/// Snapshots as JSON documents in a `snapshots` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let conn = Connection::open(db_path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                trader_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );
            "#,
        )?;
        info!("Snapshot database initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }
}

impl SnapshotStore for SqliteStore {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        let content = serde_json::to_string(snapshot)?;
        self.conn()?.execute(
            r#"
            INSERT INTO snapshots (trader_id, content, saved_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(trader_id) DO UPDATE SET content = ?2, saved_at = ?3
            "#,
            params![snapshot.trader_id, content, Utc::now().to_rfc3339()],
        )?;
        debug!(trader = %snapshot.trader_id, "Snapshot saved to database");
        Ok(())
    }

    fn load(&self, trader_id: &str) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        let content: Option<String> = self
            .conn()?
            .query_row(
                "SELECT content FROM snapshots WHERE trader_id = ?1",
                params![trader_id],
                |row| row.get(0),
            )
            .optional()?;

        match content {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<PersistedSnapshot>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT content FROM snapshots ORDER BY trader_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut snapshots = Vec::new();
        for content in rows {
            snapshots.push(serde_json::from_str(&content?)?);
        }
        Ok(snapshots)
    }
}
