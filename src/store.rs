//! The local mirror of remote tables.

use crate::codec::{decode_layout, decode_key, encode_key, PackedLayout};
use crate::error::{MirrorError, Result};
use crate::schema::{FieldValue, SchemaRegistry, Table};
use crate::snapshot::{SnapshotRecord, StoreSnapshot};
use crate::types::{BlockNumber, TableId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A mirrored record with its decoded form.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub table_id: TableId,
    /// Encoded key bytes.
    pub key: Vec<u8>,
    pub key_values: Vec<FieldValue>,
    /// Packed value as last written.
    pub layout: PackedLayout,
    pub value: Vec<FieldValue>,
    /// Block of the entry that last wrote this record.
    pub block_number: BlockNumber,
    pub log_index: u32,
}

type RecordKey = (TableId, Vec<u8>);

#[derive(Default)]
struct StoreState {
    records: BTreeMap<RecordKey, StoredRecord>,
    latest_block: Option<BlockNumber>,
}

/// In-memory mirror keyed by `(table, key bytes)`.
///
/// Readers take the read lock and clone out what they need, so they never
/// observe a half-applied entry. Mutation is crate-private and driven by the
/// storage adapter while it holds the writer lock.
pub struct MirroredStore {
    state: RwLock<StoreState>,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,
}

impl MirroredStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            write_lock: Mutex::new(()),
        }
    }

    // --- Reads ---

    /// Get a record by encoded key.
    pub fn get_record(&self, table_id: &TableId, key: &[u8]) -> Option<StoredRecord> {
        self.state
            .read()
            .records
            .get(&(*table_id, key.to_vec()))
            .cloned()
    }

    /// Get a record by its decoded key values.
    pub fn get_record_by_key(
        &self,
        table: &Table,
        key_values: &[FieldValue],
    ) -> Result<Option<StoredRecord>> {
        let key = encode_key(&table.key_schema, key_values)?;
        Ok(self.get_record(&table.id, &key))
    }

    /// Get just the decoded value of a record.
    pub fn get_value(&self, table_id: &TableId, key: &[u8]) -> Option<Vec<FieldValue>> {
        self.state
            .read()
            .records
            .get(&(*table_id, key.to_vec()))
            .map(|record| record.value.clone())
    }

    /// All records of a table, ordered by key bytes.
    pub fn records(&self, table_id: &TableId) -> Vec<StoredRecord> {
        self.state
            .read()
            .records
            .range((*table_id, Vec::new())..)
            .take_while(|((id, _), _)| id == table_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn table_len(&self, table_id: &TableId) -> usize {
        self.state
            .read()
            .records
            .range((*table_id, Vec::new())..)
            .take_while(|((id, _), _)| id == table_id)
            .count()
    }

    /// Highest block whose entries have been applied.
    pub fn latest_block(&self) -> Option<BlockNumber> {
        self.state.read().latest_block
    }

    /// Capture the packed contents for persistence.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            latest_block: state.latest_block,
            records: state
                .records
                .values()
                .map(|record| SnapshotRecord {
                    table_id: record.table_id,
                    key: record.key.clone(),
                    layout: record.layout.clone(),
                    block_number: record.block_number,
                    log_index: record.log_index,
                })
                .collect(),
        }
    }

    /// SHA-256 over the ordered packed contents, hex encoded.
    ///
    /// Two stores that applied the same entries have the same digest.
    pub fn digest(&self) -> String {
        let state = self.state.read();
        let mut hasher = Sha256::new();
        for record in state.records.values() {
            hasher.update(record.table_id.0);
            hasher.update((record.key.len() as u64).to_be_bytes());
            hasher.update(&record.key);
            let flat = record.layout.to_bytes();
            hasher.update((flat.len() as u64).to_be_bytes());
            hasher.update(&flat);
        }
        hex::encode(hasher.finalize())
    }

    /// Replace the contents with a decoded snapshot.
    ///
    /// Every record is decoded before anything is replaced, so a snapshot that
    /// disagrees with the registry leaves the store untouched.
    pub fn hydrate(&self, snapshot: &StoreSnapshot, registry: &SchemaRegistry) -> Result<usize> {
        let _lock = self.lock_writer();

        let mut records = BTreeMap::new();
        for entry in &snapshot.records {
            let table = registry.lookup(&entry.table_id).ok_or_else(|| {
                MirrorError::SchemaMismatch(format!(
                    "snapshot record for unregistered table {}",
                    entry.table_id
                ))
            })?;
            let record = StoredRecord {
                table_id: entry.table_id,
                key: entry.key.clone(),
                key_values: decode_key(&table.key_schema, &entry.key)?,
                layout: entry.layout.clone(),
                value: decode_layout(&table.value_schema, &entry.layout)?,
                block_number: entry.block_number,
                log_index: entry.log_index,
            };
            records.insert((entry.table_id, entry.key.clone()), record);
        }

        let count = records.len();
        *self.state.write() = StoreState {
            records,
            latest_block: snapshot.latest_block,
        };

        tracing::info!(
            "hydrated {} records (latest block {:?})",
            count,
            snapshot.latest_block
        );
        Ok(count)
    }

    // --- Mutation (adapter only) ---

    /// Serialize writers. Held for the whole apply + notify of one entry.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Insert or replace a record, returning the previous one.
    ///
    /// Does not move `latest_block`; see [`MirroredStore::mark_block`].
    pub(crate) fn put(&self, record: StoredRecord) -> Option<StoredRecord> {
        self.state
            .write()
            .records
            .insert((record.table_id, record.key.clone()), record)
    }

    /// Remove a record, returning it if it was present.
    pub(crate) fn remove(&self, table_id: &TableId, key: &[u8]) -> Option<StoredRecord> {
        self.state.write().records.remove(&(*table_id, key.to_vec()))
    }

    /// Record that every entry of a block was applied.
    ///
    /// This is the only place `latest_block` moves, so a block cut short by a
    /// stop or an error is replayed in full on resume.
    pub(crate) fn mark_block(&self, block_number: BlockNumber) {
        let mut state = self.state.write();
        if state.latest_block.map_or(true, |latest| block_number > latest) {
            state.latest_block = Some(block_number);
        }
    }
}

impl Default for MirroredStore {
    fn default() -> Self {
        Self::new()
    }
}
