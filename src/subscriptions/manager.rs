//! Subscription manager for broadcasting sync events.

use crate::types::SyncProgress;
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    ChangeEvent, DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SyncEvent,
};

type Callback = Box<dyn FnMut(&SyncEvent) + Send>;

/// A registered callback. `active` flips off on unsubscribe.
struct CallbackSlot {
    active: AtomicBool,
    callback: Mutex<Callback>,
}

impl CallbackSlot {
    fn deliver(&self, event: &SyncEvent) {
        let mut callback = self.callback.lock();
        if self.active.load(Ordering::SeqCst) {
            (&mut **callback)(event);
        }
    }
}

enum Sink {
    Channel(Sender<SyncEvent>),
    Callback(Arc<CallbackSlot>),
}

/// Internal subscription state.
struct Subscription {
    filter: SubscriptionFilter,
    sink: Sink,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(sender: &Sender<SyncEvent>, event: SyncEvent) -> bool {
        match sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts events.
///
/// Channel subscribers get a bounded queue and are dropped when it overflows.
/// Callback observers run synchronously on the broadcasting thread, in
/// broadcast order. Callbacks must not broadcast themselves.
pub struct SubscriptionManager {
    /// Active subscriptions by ID, in registration order.
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a channel subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = self.next_id();
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter: config.filter,
                sink: Sink::Channel(sender),
            },
        );

        SubscriptionHandle { id, receiver }
    }

    /// Register a callback observer.
    pub fn observe<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionId
    where
        F: FnMut(&SyncEvent) + Send + 'static,
    {
        let id = self.next_id();
        let slot = Arc::new(CallbackSlot {
            active: AtomicBool::new(true),
            callback: Mutex::new(Box::new(callback)),
        });

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter,
                sink: Sink::Callback(slot),
            },
        );

        id
    }

    /// Unsubscribe and clean up.
    ///
    /// Once this returns no new delivery to `id` begins.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscriptions.write().remove(&id);
        match removed.map(|sub| sub.sink) {
            Some(Sink::Channel(sender)) => {
                // Best effort
                let _ = sender.try_send(SyncEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
            }
            Some(Sink::Callback(slot)) => slot.active.store(false, Ordering::SeqCst),
            None => {}
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    pub fn broadcast_change(&self, change: ChangeEvent) {
        self.broadcast(SyncEvent::Change(change));
    }

    pub fn broadcast_progress(&self, progress: SyncProgress) {
        self.broadcast(SyncEvent::Progress(progress));
    }

    pub fn broadcast_stopped(&self) {
        self.broadcast(SyncEvent::Stopped);
    }

    pub fn broadcast_failed(&self, error: &str) {
        self.broadcast(SyncEvent::Failed {
            error: error.to_string(),
        });
    }

    /// Internal broadcast helper. Drops channel subscribers that fail to receive.
    fn broadcast(&self, event: SyncEvent) {
        let mut to_remove = Vec::new();
        let mut callbacks = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(&event) {
                    continue;
                }
                match &sub.sink {
                    Sink::Channel(sender) => {
                        if !Subscription::try_send(sender, event.clone()) {
                            to_remove.push(*id);
                        }
                    }
                    Sink::Callback(slot) => callbacks.push(Arc::clone(slot)),
                }
            }
        }

        // Outside the lock so a callback may unsubscribe itself
        for slot in callbacks {
            slot.deliver(&event);
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(Subscription {
                    sink: Sink::Channel(sender),
                    ..
                }) = subs.remove(&id)
                {
                    tracing::warn!("dropping slow subscriber {:?}", id);
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sender.try_send(SyncEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;
    use crate::types::{BlockNumber, TableId};
    use std::time::Duration;

    fn make_change(table: &str) -> ChangeEvent {
        ChangeEvent {
            table_id: TableId::new("app", table),
            key: vec![0, 0, 0, 1],
            key_values: vec![FieldValue::Uint(1)],
            block_number: BlockNumber(1),
            log_index: 0,
            value: Some(vec![FieldValue::Uint(10)]),
            previous: None,
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert_eq!(manager.subscription_count(), 1);

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(
            event,
            SyncEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_broadcast_to_matching_table() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::tables(vec![TableId::new("app", "Score")]),
            ..Default::default()
        });

        manager.broadcast_change(make_change("Other"));
        manager.broadcast_change(make_change("Score"));

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        match event {
            SyncEvent::Change(change) => assert_eq!(change.table_id.name(), "Score"),
            other => panic!("Expected Change event, got {:?}", other),
        }
        assert!(handle.try_recv().is_err());
    }

    #[test]
    fn test_progress_filter_skips_changes() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::progress(),
            ..Default::default()
        });

        manager.broadcast_change(make_change("Score"));
        manager.broadcast_progress(SyncProgress::Live);

        assert_eq!(handle.drain(), vec![SyncEvent::Progress(SyncProgress::Live)]);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let _handle = manager.subscribe(SubscriptionConfig {
            buffer_size: 2,
            filter: SubscriptionFilter::changes(),
        });

        for _ in 0..10 {
            manager.broadcast_change(make_change("Score"));
        }

        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_callback_receives_in_order() {
        let manager = SubscriptionManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.observe(SubscriptionFilter::changes(), move |event| {
            if let SyncEvent::Change(change) = event {
                sink.lock().push(change.log_index);
            }
        });

        for i in 0..5 {
            let mut change = make_change("Score");
            change.log_index = i;
            manager.broadcast_change(change);
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unsubscribed_callback_not_called() {
        let manager = SubscriptionManager::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = manager.observe(SubscriptionFilter::all(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.broadcast_stopped();
        manager.unsubscribe(id);
        manager.broadcast_stopped();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let manager = Arc::new(SubscriptionManager::new());
        let count = Arc::new(AtomicU64::new(0));

        let id_cell = Arc::new(Mutex::new(None::<SubscriptionId>));
        let (m, c, cell) = (Arc::clone(&manager), Arc::clone(&count), Arc::clone(&id_cell));
        let id = manager.observe(SubscriptionFilter::all(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *cell.lock() {
                m.unsubscribe(id);
            }
        });
        *id_cell.lock() = Some(id);

        manager.broadcast_stopped();
        manager.broadcast_stopped();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.subscription_count(), 0);
    }
}
