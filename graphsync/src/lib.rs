pub mod catalog;
pub mod config;
pub mod controller;
pub mod equivalence;
pub mod errors;
pub mod fetch;
pub mod graph;
pub mod mapper;
pub mod models;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod sync;
pub mod upsert;

use crate::catalog::Catalog;
use crate::config::{StorageConfig, SyncConfig};
use crate::controller::SyncRunController;
use crate::errors::Result;
use crate::fetch::RemoteSource;
use crate::store::SqliteGraphStore;
use std::sync::Arc;

/// The main entry point for the `graphsync` library.
///
/// `GraphSync` owns the local side of the reconciliation engine:
/// - A SQLite-backed graph and time-series store (`SqliteGraphStore`) that the
///   engine converges towards the remote source of record.
/// - A metadata database (`Catalog`) holding per-stream cursors and run logs.
///
/// Scheduling lives in the `SyncRunController` built by [`GraphSync::controller`].
///
/// # Example
///
/// ```rust,no_run
/// use graphsync::{GraphSync, config::StorageConfig};
/// use tempfile::tempdir;
///
/// #[tokio::main]
/// async fn main() {
///     let dir = tempdir().unwrap();
///     let config = StorageConfig::new(dir.path());
///     let storage = GraphSync::new(config).await.unwrap();
///
///     // Seed storage.store, then build a controller around a RemoteSource.
/// }
/// ```
pub struct GraphSync {
    pub config: StorageConfig,
    pub catalog: Arc<Catalog>,
    pub store: Arc<SqliteGraphStore>,
}

impl GraphSync {
    /// Opens (or creates) the catalog and graph databases and their schemas.
    pub async fn new(config: StorageConfig) -> Result<Self> {
        for path in [&config.catalog_path, &config.graph_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let store = Arc::new(SqliteGraphStore::new(&config)?);
        store.initialize_schema()?;

        Ok(Self {
            config,
            catalog,
            store,
        })
    }

    /// Wires every stream of `sync_config` against this storage and `source`.
    pub fn controller(
        &self,
        sync_config: SyncConfig,
        source: Arc<dyn RemoteSource>,
    ) -> Result<SyncRunController> {
        SyncRunController::new(
            sync_config,
            Arc::clone(&self.catalog),
            self.store.clone(),
            self.store.clone(),
            source,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_graphsync_initialization() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("state"));

        let storage = GraphSync::new(config.clone()).await;
        assert!(storage.is_ok());

        assert!(config.catalog_path.exists());
        assert!(config.graph_path.exists());
    }
}
