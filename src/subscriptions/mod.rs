//! Subscription system for change and progress notifications.
//!
//! This module provides in-process subscriptions to sync events:
//! - Record changes (set, update, delete), in apply order
//! - Sync progress transitions
//! - Engine lifecycle (stopped, failed)
//!
//! Subscribers either receive events over a bounded channel (dropped when
//! they fall behind) or register a callback that runs synchronously.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//!
//! let handle = manager.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::tables(vec![TableId::new("app", "Score")]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(SyncEvent::Change(change)) => println!("changed: {:?}", change.key_values),
//!         Ok(SyncEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChangeEvent, DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SyncEvent,
};
