//! # Store Mirror
//!
//! A local, strongly typed mirror of a remote table store whose only source
//! of change is an append-only stream of block logs.
//!
//! ## Core Concepts
//!
//! - **Schemas**: Each table declares a key schema and a value schema
//! - **Codec**: Values travel packed as static data, a lengths word and dynamic data
//! - **Adapter**: Log entries (set, update, delete) are decoded and applied in order
//! - **Sync**: A worker thread follows a log source, reporting monotonic progress
//! - **Deploy**: A two-step world deployment over an abstract transaction transport
//!
//! ## Example
//!
//! ```ignore
//! use store_mirror::{sync_to_store, MemoryLogSource, SyncOptions, Schema, Table, TableId};
//!
//! let scores = Table::new(
//!     TableId::new("app", "Score"),
//!     Schema::parse(&[("id", "uint32")])?,
//!     Schema::parse(&[("name", "string"), ("score", "uint32")])?,
//! );
//!
//! let source = Arc::new(MemoryLogSource::new());
//! let session = sync_to_store(SyncOptions::new(source).with_tables(vec![scores.clone()]))?;
//!
//! let record = session
//!     .store()
//!     .get_record_by_key(&scores, &[FieldValue::Uint(1)])?;
//! ```

pub mod adapter;
pub mod codec;
pub mod config;
pub mod deploy;
pub mod error;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod types;

// Re-exports
pub use adapter::{ApplyOutcome, BlockOutcome, StorageAdapter};
pub use codec::{
    apply_log_patch, apply_patch, decode_key, decode_layout, decode_value, encode_key,
    encode_value, EncodedLengths, PackedLayout,
};
pub use config::{FieldDef, SyncConfig, TableDefinition, UnknownTablePolicy};
pub use deploy::{
    get_table_value, CancelHandle, ContractCall, DeployStage, Deployer, ReceiptLog,
    ReceiptStatus, TableReader, TransactionReceipt, TransactionTransport, TxHash, WorldDeploy,
};
pub use error::{MirrorError, Result};
pub use schema::{Field, FieldType, FieldValue, Schema, SchemaRegistry, StaticType, Table};
pub use snapshot::{SnapshotRecord, StoreSnapshot};
pub use store::{MirroredStore, StoredRecord};
pub use subscriptions::{
    ChangeEvent, DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager, SyncEvent,
};
pub use sync::{
    sync_to_store, EngineStatus, LogSource, LogSubscription, MemoryLogSource, ProgressTracker,
    StreamItem, SyncEngine, SyncOptions, SyncSession,
};
pub use types::*;
