//! Event and subscription types.

use crate::schema::FieldValue;
use crate::types::{BlockNumber, SyncProgress, TableId};
use serde::{Deserialize, Serialize};

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Restrict change events to these tables (None = all tables).
    pub table_ids: Option<Vec<TableId>>,

    /// Include record change events.
    pub include_changes: bool,

    /// Include sync progress transitions.
    pub include_progress: bool,

    /// Include engine stop/failure events.
    pub include_lifecycle: bool,
}

impl SubscriptionFilter {
    /// Changes to every table.
    pub fn changes() -> Self {
        Self {
            include_changes: true,
            ..Default::default()
        }
    }

    /// Changes to specific tables.
    pub fn tables(table_ids: Vec<TableId>) -> Self {
        Self {
            table_ids: Some(table_ids),
            include_changes: true,
            ..Default::default()
        }
    }

    /// Progress transitions plus lifecycle events.
    pub fn progress() -> Self {
        Self {
            include_progress: true,
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Everything.
    pub fn all() -> Self {
        Self {
            include_changes: true,
            include_progress: true,
            include_lifecycle: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::Change(change) => {
                self.include_changes
                    && self
                        .table_ids
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&change.table_id))
            }
            SyncEvent::Progress(_) => self.include_progress,
            SyncEvent::Stopped | SyncEvent::Failed { .. } => self.include_lifecycle,
            SyncEvent::Dropped { .. } => false,
        }
    }
}

/// A successfully applied mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table_id: TableId,
    /// Encoded key bytes.
    pub key: Vec<u8>,
    /// Decoded key values.
    pub key_values: Vec<FieldValue>,
    pub block_number: BlockNumber,
    pub log_index: u32,
    /// New value, or `None` for a tombstone.
    pub value: Option<Vec<FieldValue>>,
    /// Value before this change, if the record existed.
    pub previous: Option<Vec<FieldValue>>,
}

impl ChangeEvent {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A record was set, updated or deleted.
    Change(ChangeEvent),

    /// Sync progress transitioned.
    Progress(SyncProgress),

    /// The engine stopped without error.
    Stopped,

    /// The engine halted on an error.
    Failed { error: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a channel subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<SyncEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SyncEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SyncEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SyncEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<SyncEvent> {
        self.receiver.try_iter().collect()
    }
}
