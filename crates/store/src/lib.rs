//! Conversation store implementations for parley.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use parley_config::{AppConfig, StoreBackend};
use parley_core::error::StoreError;
use parley_core::store::ConversationStore;
use std::sync::Arc;

/// Open the store selected by `[store]` in the config.
///
/// For SQLite the parent directory of the database file is created first.
pub async fn open_from_config(config: &AppConfig) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory conversation store; nothing will survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => {
            let path = config.store.resolved_path();
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
            }
            let path = path
                .to_str()
                .ok_or_else(|| StoreError::Storage(format!("Non UTF-8 database path: {}", path.display())))?;
            Ok(Arc::new(SqliteStore::new(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(StoreError::Storage(
            "parley-store was built without the sqlite feature".into(),
        )),
    }
}
