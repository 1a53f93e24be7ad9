//! Applies log entries to the mirrored store.

use crate::codec::{apply_log_patch, decode_key, decode_layout};
use crate::config::UnknownTablePolicy;
use crate::error::{MirrorError, Result};
use crate::schema::{SchemaRegistry, Table};
use crate::store::{MirroredStore, StoredRecord};
use crate::subscriptions::{ChangeEvent, SubscriptionManager};
use crate::types::{BlockLogs, LogEntry, LogOperation};
use std::sync::Arc;

/// Result of applying one entry.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    /// The store changed and this event was broadcast.
    Applied(ChangeEvent),
    /// Nothing changed: the entry's table is unknown and the policy is to
    /// skip, or the update is already reflected in the stored record.
    Skipped,
}

/// Result of applying one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Every entry was applied and the block was marked in the store.
    Completed { applied: usize },
    /// Stopped before the block's end. The block is not marked.
    Interrupted { applied: usize },
}

/// Decodes entries against the registry and writes them to the store.
///
/// Each entry is applied and its change broadcast while the store's writer
/// lock is held, so notification order equals apply order.
pub struct StorageAdapter {
    registry: Arc<SchemaRegistry>,
    store: Arc<MirroredStore>,
    events: Arc<SubscriptionManager>,
    unknown_tables: UnknownTablePolicy,
}

impl StorageAdapter {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<MirroredStore>,
        events: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            unknown_tables: UnknownTablePolicy::default(),
        }
    }

    pub fn with_unknown_tables(mut self, policy: UnknownTablePolicy) -> Self {
        self.unknown_tables = policy;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MirroredStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<SubscriptionManager> {
        &self.events
    }

    /// Apply a single entry.
    ///
    /// On error the store is unchanged and nothing is broadcast.
    pub fn apply(&self, entry: &LogEntry) -> Result<ApplyOutcome> {
        let table = match self.registry.lookup(&entry.table_id) {
            Some(table) => table,
            None => match self.unknown_tables {
                UnknownTablePolicy::Reject => {
                    return Err(MirrorError::SchemaMismatch(format!(
                        "no schema registered for table {}",
                        entry.table_id
                    )))
                }
                UnknownTablePolicy::Skip => {
                    tracing::warn!(
                        "skipping entry for unregistered table {} at {:?}",
                        entry.table_id,
                        entry.block_number
                    );
                    return Ok(ApplyOutcome::Skipped);
                }
            },
        };

        let _lock = self.store.lock_writer();

        let change = match &entry.operation {
            LogOperation::Set(layout) => {
                let record = StoredRecord {
                    table_id: entry.table_id,
                    key: entry.key.clone(),
                    key_values: decode_key(&table.key_schema, &entry.key)?,
                    layout: layout.clone(),
                    value: decode_layout(&table.value_schema, layout)?,
                    block_number: entry.block_number,
                    log_index: entry.log_index,
                };
                self.write(record)
            }
            LogOperation::Update(patch) => {
                let current = self
                    .store
                    .get_record(&entry.table_id, &entry.key)
                    .ok_or_else(|| MirrorError::record_not_found(entry.table_id, &entry.key))?;
                // Replaying an interrupted block must not splice the same patch twice
                if (current.block_number, current.log_index) >= (entry.block_number, entry.log_index) {
                    tracing::debug!(
                        "update {:?}#{} on {} already applied",
                        entry.block_number,
                        entry.log_index,
                        entry.table_id
                    );
                    return Ok(ApplyOutcome::Skipped);
                }
                let layout = apply_log_patch(&table.value_schema, &current.layout, patch)?;
                let record = StoredRecord {
                    value: decode_layout(&table.value_schema, &layout)?,
                    layout,
                    block_number: entry.block_number,
                    log_index: entry.log_index,
                    ..current
                };
                self.write(record)
            }
            LogOperation::Delete => self.delete(&table, entry)?,
        };

        self.events.broadcast_change(change.clone());
        Ok(ApplyOutcome::Applied(change))
    }

    /// Apply every entry of a block in order, stopping at the first error.
    ///
    /// Returns the number of entries that changed the store.
    pub fn apply_block(&self, block: &BlockLogs) -> Result<usize> {
        match self.apply_block_until(block, || false)? {
            BlockOutcome::Completed { applied } | BlockOutcome::Interrupted { applied } => {
                Ok(applied)
            }
        }
    }

    /// Apply a block, checking `should_stop` before every entry.
    ///
    /// The block is marked complete in the store only when every entry was
    /// applied. An interrupted or failed block keeps the store's
    /// `latest_block` where it was, so a resume replays it from the start.
    pub fn apply_block_until(
        &self,
        block: &BlockLogs,
        should_stop: impl Fn() -> bool,
    ) -> Result<BlockOutcome> {
        let mut applied = 0;
        for entry in &block.logs {
            if should_stop() {
                tracing::debug!(
                    "interrupted {:?} after {} of {} entries",
                    block.block_number,
                    applied,
                    block.logs.len()
                );
                return Ok(BlockOutcome::Interrupted { applied });
            }
            if let ApplyOutcome::Applied(_) = self.apply(entry)? {
                applied += 1;
            }
        }
        self.store.mark_block(block.block_number);
        tracing::debug!(
            "applied {} of {} entries in {:?}",
            applied,
            block.logs.len(),
            block.block_number
        );
        Ok(BlockOutcome::Completed { applied })
    }

    fn write(&self, record: StoredRecord) -> ChangeEvent {
        let change = ChangeEvent {
            table_id: record.table_id,
            key: record.key.clone(),
            key_values: record.key_values.clone(),
            block_number: record.block_number,
            log_index: record.log_index,
            value: Some(record.value.clone()),
            previous: None,
        };
        let previous = self.store.put(record).map(|old| old.value);
        ChangeEvent { previous, ..change }
    }

    fn delete(&self, table: &Table, entry: &LogEntry) -> Result<ChangeEvent> {
        let key_values = decode_key(&table.key_schema, &entry.key)?;
        let previous = self
            .store
            .remove(&entry.table_id, &entry.key)
            .map(|old| old.value);
        Ok(ChangeEvent {
            table_id: entry.table_id,
            key: entry.key.clone(),
            key_values,
            block_number: entry.block_number,
            log_index: entry.log_index,
            value: None,
            previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_key, encode_value};
    use crate::schema::{FieldValue, Schema};
    use crate::subscriptions::{SubscriptionConfig, SubscriptionFilter, SyncEvent};
    use crate::types::{BlockNumber, Patch, TableId};

    fn table() -> Table {
        Table::new(
            TableId::new("app", "Score"),
            Schema::parse(&[("id", "uint32")]).unwrap(),
            Schema::parse(&[("name", "string"), ("score", "uint32")]).unwrap(),
        )
    }

    fn adapter() -> (StorageAdapter, Table) {
        let table = table();
        let registry = Arc::new(SchemaRegistry::new());
        registry.register(table.clone()).unwrap();
        let adapter = StorageAdapter::new(
            registry,
            Arc::new(MirroredStore::new()),
            Arc::new(SubscriptionManager::new()),
        );
        (adapter, table)
    }

    fn key(table: &Table, id: u128) -> Vec<u8> {
        encode_key(&table.key_schema, &[FieldValue::Uint(id)]).unwrap()
    }

    fn set(table: &Table, block: u64, id: u128, name: &str, score: u128) -> LogEntry {
        let layout = encode_value(
            &table.value_schema,
            &[FieldValue::string(name), FieldValue::Uint(score)],
        )
        .unwrap();
        LogEntry::set(block, table.id, key(table, id), layout)
    }

    #[test]
    fn test_set_then_patch_name() {
        let (adapter, table) = adapter();
        adapter.apply(&set(&table, 1, 1, "a", 10)).unwrap();

        let current = adapter.store().get_record(&table.id, &key(&table, 1)).unwrap();
        let range = current
            .layout
            .field_range(&table.value_schema, "name")
            .unwrap();
        let patch = Patch::new(range.start, range.end - range.start, b"ab".to_vec());
        adapter
            .apply(&LogEntry::update(2, table.id, key(&table, 1), patch))
            .unwrap();

        let value = adapter.store().get_value(&table.id, &key(&table, 1)).unwrap();
        assert_eq!(value, vec![FieldValue::string("ab"), FieldValue::Uint(10)]);
    }

    #[test]
    fn test_double_delete() {
        let (adapter, table) = adapter();
        adapter.apply(&set(&table, 1, 1, "a", 10)).unwrap();

        let first = adapter
            .apply(&LogEntry::delete(2, table.id, key(&table, 1)))
            .unwrap();
        let second = adapter
            .apply(&LogEntry::delete(3, table.id, key(&table, 1)))
            .unwrap();

        match (first, second) {
            (ApplyOutcome::Applied(first), ApplyOutcome::Applied(second)) => {
                assert!(first.is_tombstone());
                assert!(first.previous.is_some());
                assert!(second.is_tombstone());
                assert!(second.previous.is_none());
            }
            other => panic!("Expected two tombstones, got {:?}", other),
        }
        assert!(adapter.store().get_record(&table.id, &key(&table, 1)).is_none());
    }

    #[test]
    fn test_update_missing_record() {
        let (adapter, table) = adapter();
        let entry = LogEntry::update(1, table.id, key(&table, 9), Patch::new(0, 4, vec![0; 4]));
        assert!(matches!(
            adapter.apply(&entry),
            Err(MirrorError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_table_rejected_by_default() {
        let (adapter, table) = adapter();
        let mut entry = set(&table, 1, 1, "a", 1);
        entry.table_id = TableId::new("app", "Missing");

        assert!(matches!(
            adapter.apply(&entry),
            Err(MirrorError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_unknown_table_skipped() {
        let (adapter, table) = adapter();
        let adapter = adapter.with_unknown_tables(UnknownTablePolicy::Skip);
        let handle = adapter.events().subscribe(SubscriptionConfig::default());

        let mut entry = set(&table, 1, 1, "a", 1);
        entry.table_id = TableId::new("app", "Missing");

        assert_eq!(adapter.apply(&entry).unwrap(), ApplyOutcome::Skipped);
        assert!(adapter.store().is_empty());
        assert!(handle.try_recv().is_err());
    }

    #[test]
    fn test_malformed_set_leaves_store_untouched() {
        let (adapter, table) = adapter();
        adapter.apply(&set(&table, 1, 1, "a", 10)).unwrap();
        let before = adapter.store().digest();

        let mut entry = set(&table, 2, 1, "zz", 10);
        if let LogOperation::Set(layout) = &mut entry.operation {
            layout.dynamic_data.push(0);
        }

        let err = adapter.apply(&entry).unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(adapter.store().digest(), before);
    }

    #[test]
    fn test_changes_broadcast_in_apply_order() {
        let (adapter, table) = adapter();
        let handle = adapter.events().subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::changes(),
            ..Default::default()
        });

        let block = BlockLogs::new(
            4,
            vec![
                set(&table, 0, 1, "a", 1),
                set(&table, 0, 2, "b", 2),
                LogEntry::delete(0, table.id, key(&table, 1)),
            ],
        );
        assert_eq!(adapter.apply_block(&block).unwrap(), 3);
        assert_eq!(adapter.store().latest_block(), Some(BlockNumber(4)));

        let indices: Vec<u32> = handle
            .drain()
            .into_iter()
            .map(|event| match event {
                SyncEvent::Change(change) => change.log_index,
                other => panic!("Expected Change event, got {:?}", other),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_apply_block_stops_at_first_error() {
        let (adapter, table) = adapter();
        let block = BlockLogs::new(
            1,
            vec![
                set(&table, 0, 1, "a", 1),
                LogEntry::update(0, table.id, key(&table, 2), Patch::new(0, 0, vec![])),
                set(&table, 0, 3, "c", 3),
            ],
        );

        assert!(adapter.apply_block(&block).is_err());
        assert_eq!(adapter.store().len(), 1);
        assert_eq!(adapter.store().latest_block(), None);
    }

    #[test]
    fn test_replayed_update_is_not_spliced_twice() {
        let (adapter, table) = adapter();
        adapter.apply(&set(&table, 1, 1, "a", 10)).unwrap();
        let range = adapter
            .store()
            .get_record(&table.id, &key(&table, 1))
            .unwrap()
            .layout
            .field_range(&table.value_schema, "name")
            .unwrap();
        let patch = Patch::new(range.start, range.end - range.start, b"ab".to_vec());
        let block = BlockLogs::new(
            2,
            vec![
                LogEntry::update(2, table.id, key(&table, 1), patch),
                set(&table, 2, 2, "b", 20),
            ],
        );

        let checks = std::cell::Cell::new(0);
        let outcome = adapter
            .apply_block_until(&block, || {
                checks.set(checks.get() + 1);
                checks.get() > 1
            })
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Interrupted { applied: 1 });

        assert_eq!(adapter.apply_block(&block).unwrap(), 1);
        assert_eq!(
            adapter.store().get_value(&table.id, &key(&table, 1)).unwrap(),
            vec![FieldValue::string("ab"), FieldValue::Uint(10)]
        );
        assert_eq!(adapter.store().len(), 2);
    }

    #[test]
    fn test_interrupted_block_is_not_marked() {
        let (adapter, table) = adapter();
        adapter
            .apply_block(&BlockLogs::new(1, vec![set(&table, 1, 1, "a", 1)]))
            .unwrap();

        let block = BlockLogs::new(
            2,
            vec![set(&table, 2, 2, "b", 2), set(&table, 2, 3, "c", 3)],
        );
        let checks = std::cell::Cell::new(0);
        let outcome = adapter
            .apply_block_until(&block, || {
                checks.set(checks.get() + 1);
                checks.get() > 1
            })
            .unwrap();

        assert_eq!(outcome, BlockOutcome::Interrupted { applied: 1 });
        assert_eq!(adapter.store().len(), 2);
        assert_eq!(adapter.store().latest_block(), Some(BlockNumber(1)));

        let replay = adapter.apply_block_until(&block, || false).unwrap();
        assert_eq!(replay, BlockOutcome::Completed { applied: 2 });
        assert_eq!(adapter.store().len(), 3);
        assert_eq!(adapter.store().latest_block(), Some(BlockNumber(2)));
    }
}
