//! The sync worker.

use super::progress::ProgressTracker;
use super::source::{LogSource, StreamItem};
use crate::adapter::{BlockOutcome, StorageAdapter};
use crate::error::{MirrorError, Result};
use crate::types::{BlockLogs, BlockNumber, SyncProgress};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Lifecycle of a [`SyncEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
    Stopped,
    /// Halted on an error; the message is the error's display text.
    Failed(String),
}

struct EngineShared {
    adapter: Arc<StorageAdapter>,
    progress: Mutex<ProgressTracker>,
    status: RwLock<EngineStatus>,
    last_processed: RwLock<Option<BlockNumber>>,
    /// Failure kept for `join`.
    error: Mutex<Option<MirrorError>>,
    stop_flag: AtomicBool,
    /// Dropped to wake the worker.
    stop_tx: Mutex<Option<Sender<()>>>,
    worker_thread: Mutex<Option<ThreadId>>,
}

/// Applies one log stream to a store on a dedicated worker thread.
///
/// The worker is the only consumer of its stream and processes one block
/// at a time in arrival order. Any decode, apply or transport error halts
/// it; the error is kept for [`SyncEngine::join`] and broadcast as
/// `SyncEvent::Failed`.
pub struct SyncEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(adapter: Arc<StorageAdapter>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                adapter,
                progress: Mutex::new(ProgressTracker::new()),
                status: RwLock::new(EngineStatus::Idle),
                last_processed: RwLock::new(None),
                error: Mutex::new(None),
                stop_flag: AtomicBool::new(false),
                stop_tx: Mutex::new(None),
                worker_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Subscribe to `source` from `from_block` and start the worker.
    ///
    /// Seals the schema registry. Subscription errors are returned here
    /// and leave the engine idle.
    pub fn start(&self, source: &dyn LogSource, from_block: BlockNumber) -> Result<()> {
        let mut status = self.shared.status.write();
        if *status != EngineStatus::Idle {
            return Err(MirrorError::InvalidOperation(format!(
                "sync engine cannot start from {:?}",
                *status
            )));
        }

        self.shared.adapter.registry().seal();
        let subscription = source.subscribe(from_block)?;

        tracing::info!(
            "starting sync from {:?} (tip {:?})",
            from_block,
            subscription.tip
        );

        let (stop_tx, stop_rx) = bounded::<()>(0);
        *self.shared.stop_tx.lock() = Some(stop_tx);
        *status = EngineStatus::Running;
        drop(status);

        let initial = self.shared.progress.lock().begin(from_block, subscription.tip);
        if let Some(progress) = initial {
            self.shared.publish(progress);
        }

        let shared = Arc::clone(&self.shared);
        let receiver = subscription.receiver;
        let spawned = thread::Builder::new()
            .name("store-mirror-sync".into())
            .spawn(move || shared.run(receiver, stop_rx));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = MirrorError::Io(e);
                *self.shared.status.write() = EngineStatus::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Stop syncing. Idempotent and safe from any thread.
    ///
    /// An entry already being applied finishes first. From the worker thread
    /// itself (an observer callback) this only signals; the worker exits
    /// before its next entry.
    pub fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.stop_tx.lock().take();

        if self.shared.on_worker_thread() {
            return;
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("sync worker panicked");
            }
        }

        let mut status = self.shared.status.write();
        if *status == EngineStatus::Idle {
            *status = EngineStatus::Stopped;
        }
        drop(status);
        self.shared.mark_stopped();
    }

    /// Wait for the worker to exit.
    ///
    /// Returns the error that halted the engine, if any. A stopped or
    /// exhausted stream is `Ok`.
    pub fn join(&self) -> Result<()> {
        if !self.shared.on_worker_thread() {
            let handle = self.worker.lock().take();
            if let Some(handle) = handle {
                handle
                    .join()
                    .map_err(|_| MirrorError::InvalidOperation("sync worker panicked".into()))?;
            }
        }

        match self.shared.error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn progress(&self) -> SyncProgress {
        self.shared.progress.lock().current()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.status.read() == EngineStatus::Running
    }

    pub fn last_processed_block(&self) -> Option<BlockNumber> {
        *self.shared.last_processed.read()
    }

    pub fn adapter(&self) -> &Arc<StorageAdapter> {
        &self.shared.adapter
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl EngineShared {
    fn run(&self, receiver: Receiver<StreamItem>, stop_rx: Receiver<()>) {
        *self.worker_thread.lock() = Some(thread::current().id());

        match self.process(receiver, stop_rx) {
            Ok(()) => self.mark_stopped(),
            Err(err) => self.fail(err),
        }
    }

    fn process(&self, receiver: Receiver<StreamItem>, stop_rx: Receiver<()>) -> Result<()> {
        loop {
            if self.stopping() {
                return Ok(());
            }

            select! {
                recv(stop_rx) -> _ => return Ok(()),
                recv(receiver) -> item => match item {
                    Ok(StreamItem::Block(block)) => self.process_block(&block)?,
                    Ok(StreamItem::Error(message)) => return Err(MirrorError::Transport(message)),
                    Err(_) => {
                        tracing::info!("log stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn process_block(&self, block: &BlockLogs) -> Result<()> {
        if let Some(previous) = *self.last_processed.read() {
            if block.block_number < previous {
                return Err(MirrorError::OutOfOrder {
                    previous,
                    received: block.block_number,
                });
            }
        }

        tracing::debug!(
            "processing {:?} ({} entries)",
            block.block_number,
            block.logs.len()
        );

        match self.adapter.apply_block_until(block, || self.stopping())? {
            BlockOutcome::Completed { .. } => {}
            BlockOutcome::Interrupted { .. } => return Ok(()),
        }
        *self.last_processed.write() = Some(block.block_number);

        let next = self.progress.lock().observe_block(block.block_number);
        if let Some(progress) = next {
            self.publish(progress);
        }
        Ok(())
    }

    fn publish(&self, progress: SyncProgress) {
        if progress.is_live() {
            tracing::info!("sync is live");
        }
        self.adapter.events().broadcast_progress(progress);
    }

    fn mark_stopped(&self) {
        let mut status = self.status.write();
        if *status != EngineStatus::Running {
            return;
        }
        *status = EngineStatus::Stopped;
        drop(status);

        tracing::info!("sync stopped");
        self.adapter.events().broadcast_stopped();
    }

    fn fail(&self, err: MirrorError) {
        let message = err.to_string();
        tracing::error!("sync failed: {}", message);

        *self.status.write() = EngineStatus::Failed(message.clone());
        *self.error.lock() = Some(err);
        self.adapter.events().broadcast_failed(&message);
    }

    fn stopping(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    fn on_worker_thread(&self) -> bool {
        *self.worker_thread.lock() == Some(thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_key, encode_value};
    use crate::schema::{FieldValue, Schema, SchemaRegistry, Table};
    use crate::store::MirroredStore;
    use crate::subscriptions::{SubscriptionConfig, SubscriptionFilter, SubscriptionManager, SyncEvent};
    use crate::sync::MemoryLogSource;
    use crate::types::{LogEntry, TableId};

    fn table() -> Table {
        Table::new(
            TableId::new("app", "Counter"),
            Schema::parse(&[("id", "uint32")]).unwrap(),
            Schema::parse(&[("value", "uint64")]).unwrap(),
        )
    }

    fn engine(table: &Table) -> SyncEngine {
        let registry = Arc::new(SchemaRegistry::new());
        registry.register(table.clone()).unwrap();
        let adapter = StorageAdapter::new(
            registry,
            Arc::new(MirroredStore::new()),
            Arc::new(SubscriptionManager::new()),
        );
        SyncEngine::new(Arc::new(adapter))
    }

    fn counter(table: &Table, block: u64, id: u128, value: u128) -> BlockLogs {
        let key = encode_key(&table.key_schema, &[FieldValue::Uint(id)]).unwrap();
        let layout = encode_value(&table.value_schema, &[FieldValue::Uint(value)]).unwrap();
        BlockLogs::new(block, vec![LogEntry::set(block, table.id, key, layout)])
    }

    #[test]
    fn test_sync_history_then_end() {
        let table = table();
        let engine = engine(&table);
        let source = MemoryLogSource::with_blocks((1..=3).map(|b| counter(&table, b, b as u128, b as u128)));
        source.close();

        engine.start(&source, BlockNumber(0)).unwrap();
        engine.join().unwrap();

        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert_eq!(engine.last_processed_block(), Some(BlockNumber(3)));
        assert!(engine.progress().is_live());
        assert_eq!(engine.adapter().store().len(), 3);
    }

    #[test]
    fn test_start_twice_rejected() {
        let table = table();
        let engine = engine(&table);
        let source = MemoryLogSource::new();

        engine.start(&source, BlockNumber(0)).unwrap();
        assert!(matches!(
            engine.start(&source, BlockNumber(0)),
            Err(MirrorError::InvalidOperation(_))
        ));
        engine.stop();
    }

    #[test]
    fn test_start_seals_registry() {
        let table = table();
        let engine = engine(&table);
        engine.start(&MemoryLogSource::new(), BlockNumber(0)).unwrap();

        assert!(engine.adapter().registry().is_sealed());
        engine.stop();
    }

    #[test]
    fn test_refused_subscription_stays_idle() {
        let table = table();
        let engine = engine(&table);
        let source = MemoryLogSource::new();
        source.refuse_subscriptions("no route to host");

        assert!(matches!(
            engine.start(&source, BlockNumber(0)),
            Err(MirrorError::Transport(_))
        ));
        assert_eq!(engine.status(), EngineStatus::Idle);
    }

    #[test]
    fn test_out_of_order_block_halts() {
        let table = table();
        let engine = engine(&table);
        let source = MemoryLogSource::with_blocks(vec![
            counter(&table, 5, 1, 1),
            counter(&table, 4, 1, 2),
        ]);
        source.close();

        engine.start(&source, BlockNumber(0)).unwrap();
        let err = engine.join().unwrap_err();

        assert!(matches!(err, MirrorError::OutOfOrder { .. }));
        assert!(matches!(engine.status(), EngineStatus::Failed(_)));
        assert_eq!(engine.last_processed_block(), Some(BlockNumber(5)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let table = table();
        let engine = engine(&table);
        let handle = engine
            .adapter()
            .events()
            .subscribe(SubscriptionConfig {
                filter: SubscriptionFilter::progress(),
                ..Default::default()
            });

        engine.start(&MemoryLogSource::new(), BlockNumber(0)).unwrap();
        engine.stop();
        engine.stop();

        let stops = handle
            .drain()
            .into_iter()
            .filter(|event| *event == SyncEvent::Stopped)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(engine.join().is_ok());
    }
}
