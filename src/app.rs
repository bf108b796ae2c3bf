//! Application state: the store cell, the search index, and the fetcher.
//!
//! The store lives in an `RwLock` cell that doubles as the in-process
//! refresh mutex: tool operations take it shared and hold the guard for the
//! duration of one call, while the refresh coordinator takes it exclusively
//! for the brief close/rename/reopen window of the shadow-database swap.
//! The index is replaced by reference on rebuild; readers keep the `Arc`
//! they obtained at call start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::config::Config;
use crate::fetcher::{Fetcher, DEFAULT_TIMEOUT_SECS};
use crate::index::SearchIndex;
use crate::store::Store;

pub struct App {
    pub config: Config,
    store: Arc<RwLock<Store>>,
    index: RwLock<Arc<SearchIndex>>,
    pub fetcher: Fetcher,
}

impl App {
    /// Initialize the application: ensure the database exists, build the
    /// FTS index when enabled and missing, open the read-only handle, and
    /// build the in-memory index from the stored documents.
    pub async fn new(config: Config) -> Result<App> {
        if !config.db_path.exists() {
            let init_store = Store::open(&config.db_path, false)
                .await
                .context("failed to create database")?;
            init_store.close().await;
        }

        let mut store = Store::open(&config.db_path, true)
            .await
            .context("failed to open database read-only")?;

        if config.enable_fts {
            let has_fts = store.has_fts_index().await?;
            if !has_fts {
                store.close().await;
                let write_store = Store::open(&config.db_path, false)
                    .await
                    .context("failed to open database for FTS index creation")?;
                write_store.create_fts_index().await?;
                write_store.close().await;
                store = Store::open(&config.db_path, true).await?;
            }
        }

        let fetcher = Fetcher::new(
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            config.max_concurrent_fetches,
        )?;

        let app = App {
            index: RwLock::new(Arc::new(SearchIndex::empty(config.enable_fts))),
            store: Arc::new(RwLock::new(store)),
            fetcher,
            config,
        };

        app.rebuild_index().await?;
        let index = app.index().await;
        info!(
            documents = index.document_count(),
            chunks = index.chunk_count(),
            "index built"
        );

        Ok(app)
    }

    /// A shared handle on the current store, held for one call.
    pub async fn store(&self) -> OwnedRwLockReadGuard<Store> {
        self.store.clone().read_owned().await
    }

    /// Exclusive access to the store cell for the swap window.
    pub(crate) async fn store_for_swap(&self) -> OwnedRwLockWriteGuard<Store> {
        self.store.clone().write_owned().await
    }

    /// The current index snapshot.
    pub async fn index(&self) -> Arc<SearchIndex> {
        self.index.read().await.clone()
    }

    /// Rebuild the in-memory index from the current store and sync
    /// persisted chunk ids for the FTS candidate stage.
    pub async fn rebuild_index(&self) -> Result<()> {
        let new_index = {
            let store = self.store().await;
            let documents = store.get_all_documents().await?;
            let mut index = SearchIndex::build(
                &documents,
                DEFAULT_CHUNK_SIZE,
                DEFAULT_CHUNK_OVERLAP,
                self.config.enable_fts,
            );
            let stored = store.get_all_chunks().await?;
            index.sync_chunk_ids(&stored);
            index
        };

        *self.index.write().await = Arc::new(new_index);
        Ok(())
    }

    /// Close held resources. The app must not be used after.
    pub async fn close(&self) {
        self.store.read().await.close().await;
    }
}
