//! Streaming sync from a log source into a mirrored store.
//!
//! [`sync_to_store`] wires everything together: a registry built from config
//! plus the store's internal tables, a store (optionally hydrated from a
//! snapshot), a storage adapter and a [`SyncEngine`].
//!
//! # Example
//!
//! ```ignore
//! let source = Arc::new(MemoryLogSource::new());
//! let session = sync_to_store(
//!     SyncOptions::new(source.clone())
//!         .with_config(SyncConfig { start_sync: false, ..Default::default() })
//!         .with_tables(vec![score_table]),
//! )?;
//!
//! let changes = session.subscribe(SubscriptionFilter::changes());
//! session.start_sync()?;
//! ```

mod engine;
mod progress;
mod source;

pub use engine::{EngineStatus, SyncEngine};
pub use progress::ProgressTracker;
pub use source::{LogSource, LogSubscription, MemoryLogSource, StreamItem};

use crate::adapter::StorageAdapter;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::schema::{SchemaRegistry, Table};
use crate::snapshot::StoreSnapshot;
use crate::store::MirroredStore;
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionManager,
};
use crate::types::BlockNumber;
use std::path::Path;
use std::sync::Arc;

/// Inputs to [`sync_to_store`].
pub struct SyncOptions {
    pub config: SyncConfig,
    pub source: Arc<dyn LogSource>,
    /// Tables in addition to those declared in `config`.
    pub tables: Vec<Table>,
    /// Store to sync into. A fresh one is created when `None`.
    pub store: Option<Arc<MirroredStore>>,
}

impl SyncOptions {
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self {
            config: SyncConfig::default(),
            source,
            tables: Vec::new(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tables(mut self, tables: Vec<Table>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_store(mut self, store: Arc<MirroredStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// A running (or ready to run) sync.
pub struct SyncSession {
    registry: Arc<SchemaRegistry>,
    store: Arc<MirroredStore>,
    events: Arc<SubscriptionManager>,
    engine: SyncEngine,
    source: Arc<dyn LogSource>,
    start_block: BlockNumber,
    subscription_buffer: usize,
}

impl SyncSession {
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MirroredStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<SubscriptionManager> {
        &self.events
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Block the engine requests first.
    pub fn start_block(&self) -> BlockNumber {
        self.start_block
    }

    /// Channel subscription with the configured buffer size.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.events.subscribe(SubscriptionConfig {
            buffer_size: self.subscription_buffer,
            filter,
        })
    }

    /// Start the engine if it has not been started yet.
    pub fn start_sync(&self) -> Result<()> {
        self.engine.start(self.source.as_ref(), self.start_block)
    }

    pub fn stop_sync(&self) {
        self.engine.stop();
    }

    /// Persist the store's current contents.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        self.store.snapshot().save(path)
    }
}

/// Build a sync session from options, starting it unless `start_sync` is off.
pub fn sync_to_store(options: SyncOptions) -> Result<SyncSession> {
    let SyncOptions {
        config,
        source,
        tables,
        store,
    } = options;

    let registry = Arc::new(SchemaRegistry::with_store_tables()?);
    registry.register_all(config.build_tables()?)?;
    registry.register_all(tables)?;

    let store = store.unwrap_or_default();
    let mut start_block = config.start_block;

    if let Some(path) = &config.snapshot_path {
        if path.exists() {
            let snapshot = StoreSnapshot::load(path)?;
            store.hydrate(&snapshot, &registry)?;
            start_block = start_block.max(snapshot.resume_block());
        } else {
            tracing::debug!("no snapshot at {}, syncing from scratch", path.display());
        }
    }
    if let Some(latest) = store.latest_block() {
        start_block = start_block.max(latest.next());
    }

    let events = Arc::new(SubscriptionManager::new());
    let adapter = StorageAdapter::new(Arc::clone(&registry), Arc::clone(&store), Arc::clone(&events))
        .with_unknown_tables(config.unknown_tables);

    let session = SyncSession {
        registry,
        store,
        events,
        engine: SyncEngine::new(Arc::new(adapter)),
        source,
        start_block,
        subscription_buffer: config.subscription_buffer,
    };

    if config.start_sync {
        session.start_sync()?;
    }
    Ok(session)
}
