//! Crash-safe persistence of trader state.
//!
//! - `PersistedSnapshot`: serialized `TraderAccount`, decimals as strings
//! - `SnapshotStore`: JSON file per trader (default) or a SQLite table
//! - `PersistenceWriter`: the single task that performs every write

mod snapshot;
mod store;
mod writer;

pub use snapshot::PersistedSnapshot;
pub use store::{JsonFileStore, PersistenceError, SnapshotStore, SqliteStore, StoreBackend};
pub use writer::PersistenceWriter;

use crate::config::PersistenceConfig;
use std::sync::Arc;

/// Open the store selected by configuration.
pub fn open_store(config: &PersistenceConfig) -> Result<Arc<dyn SnapshotStore>, PersistenceError> {
    let store: Arc<dyn SnapshotStore> = match config.backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(&config.data_dir)?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::new(&config.sqlite_path)?),
    };
    Ok(store)
}
