//! Core types for the mirror.

use crate::codec::PackedLayout;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the remote chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BlockNumber(pub u64);

impl fmt::Debug for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockNumber {
    pub fn next(self) -> Self {
        BlockNumber(self.0.saturating_add(1))
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(BlockNumber(self.0 - 1))
        } else {
            None
        }
    }
}

/// A 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Address(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

const TABLE_TYPE: [u8; 2] = *b"tb";
const OFFCHAIN_TABLE_TYPE: [u8; 2] = *b"ot";
const NAMESPACE_LEN: usize = 14;
const NAME_LEN: usize = 16;

/// Identifier of a table: resource type, namespace and name packed into 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub [u8; 32]);

impl TableId {
    /// Onchain table id. Namespaces over 14 bytes and names over 16 bytes are truncated.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self::with_type(TABLE_TYPE, namespace, name)
    }

    /// Offchain table id (records only ever appear in logs).
    pub fn offchain(namespace: &str, name: &str) -> Self {
        Self::with_type(OFFCHAIN_TABLE_TYPE, namespace, name)
    }

    fn with_type(resource_type: [u8; 2], namespace: &str, name: &str) -> Self {
        let mut id = [0u8; 32];
        id[0..2].copy_from_slice(&resource_type);

        let ns = namespace.as_bytes();
        let ns_len = ns.len().min(NAMESPACE_LEN);
        id[2..2 + ns_len].copy_from_slice(&ns[..ns_len]);

        let nm = name.as_bytes();
        let nm_len = nm.len().min(NAME_LEN);
        id[16..16 + nm_len].copy_from_slice(&nm[..nm_len]);

        TableId(id)
    }

    pub fn namespace(&self) -> String {
        trimmed(&self.0[2..16])
    }

    pub fn name(&self) -> String {
        trimmed(&self.0[16..32])
    }

    pub fn is_offchain(&self) -> bool {
        self.0[0..2] == OFFCHAIN_TABLE_TYPE
    }

    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(TableId(arr))
    }
}

fn trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let namespace = self.namespace();
        if namespace.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}__{}", namespace, self.name())
        }
    }
}

/// Byte-range replacement over the flat (static ++ lengths ++ dynamic) layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// First replaced byte.
    pub start: u64,
    /// Number of bytes removed starting at `start`.
    pub delete_count: u64,
    /// Bytes written in place of the removed range.
    pub data: Vec<u8>,
    /// Dynamic field the patch belongs to, when a length-changing patch
    /// sits on a boundary between two dynamic fields.
    #[serde(default)]
    pub dynamic_field: Option<usize>,
}

impl Patch {
    pub fn new(start: u64, delete_count: u64, data: Vec<u8>) -> Self {
        Self {
            start,
            delete_count,
            data,
            dynamic_field: None,
        }
    }

    /// Pin the patch to a dynamic field.
    pub fn in_dynamic_field(mut self, index: usize) -> Self {
        self.dynamic_field = Some(index);
        self
    }
}

/// What a log entry does to its record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOperation {
    /// Replace the whole record.
    Set(PackedLayout),
    /// Patch part of an existing record.
    Update(Patch),
    /// Remove the record.
    Delete,
}

/// One change event from the remote log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub block_number: BlockNumber,
    /// Position within the block.
    pub log_index: u32,
    pub table_id: TableId,
    /// Encoded key bytes.
    pub key: Vec<u8>,
    pub operation: LogOperation,
}

impl LogEntry {
    pub fn set(block: u64, table_id: TableId, key: Vec<u8>, layout: PackedLayout) -> Self {
        Self::new(block, table_id, key, LogOperation::Set(layout))
    }

    pub fn update(block: u64, table_id: TableId, key: Vec<u8>, patch: Patch) -> Self {
        Self::new(block, table_id, key, LogOperation::Update(patch))
    }

    pub fn delete(block: u64, table_id: TableId, key: Vec<u8>) -> Self {
        Self::new(block, table_id, key, LogOperation::Delete)
    }

    fn new(block: u64, table_id: TableId, key: Vec<u8>, operation: LogOperation) -> Self {
        Self {
            block_number: BlockNumber(block),
            log_index: 0,
            table_id,
            key,
            operation,
        }
    }

    pub fn with_log_index(mut self, log_index: u32) -> Self {
        self.log_index = log_index;
        self
    }
}

/// All entries of one block, in log order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLogs {
    pub block_number: BlockNumber,
    pub logs: Vec<LogEntry>,
}

impl BlockLogs {
    /// Group entries under a block, assigning log indices in order.
    pub fn new(block_number: u64, logs: Vec<LogEntry>) -> Self {
        let logs = logs
            .into_iter()
            .enumerate()
            .map(|(i, mut entry)| {
                entry.block_number = BlockNumber(block_number);
                entry.log_index = i as u32;
                entry
            })
            .collect();
        Self {
            block_number: BlockNumber(block_number),
            logs,
        }
    }

    pub fn empty(block_number: u64) -> Self {
        Self::new(block_number, Vec::new())
    }
}

/// Catch-up status of a sync subscription.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SyncProgress {
    /// Nothing processed yet.
    #[default]
    Initial,
    /// Catching up on historical blocks.
    Syncing {
        percentage: f64,
        current_block: BlockNumber,
        latest_block: BlockNumber,
    },
    /// Backlog applied; following the chain tip.
    Live,
}

impl SyncProgress {
    pub fn percentage(&self) -> f64 {
        match self {
            SyncProgress::Initial => 0.0,
            SyncProgress::Syncing { percentage, .. } => *percentage,
            SyncProgress::Live => 100.0,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SyncProgress::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_id_layout() {
        let id = TableId::new("app", "Score");
        assert_eq!(&id.0[0..2], b"tb");
        assert_eq!(&id.0[2..5], b"app");
        assert_eq!(&id.0[16..21], b"Score");
        assert_eq!(id.namespace(), "app");
        assert_eq!(id.name(), "Score");
        assert!(!id.is_offchain());
        assert_eq!(id.to_string(), "app__Score");
    }

    #[test]
    fn test_table_id_root_namespace_and_truncation() {
        let id = TableId::offchain("", "AVeryLongTableNameIndeed");
        assert!(id.is_offchain());
        assert_eq!(id.name(), "AVeryLongTableNa");
        assert_eq!(id.to_string(), "AVeryLongTableNa");
    }

    #[test]
    fn test_table_id_hex_roundtrip() {
        let id = TableId::new("store", "Tables");
        let parsed = TableId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_address_hex() {
        let addr = Address([0xab; 20]);
        let hex = addr.to_hex();
        assert!(hex.starts_with("0xabab"));
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_block_navigation() {
        let block = BlockNumber(5);
        assert_eq!(block.next(), BlockNumber(6));
        assert_eq!(block.prev(), Some(BlockNumber(4)));
        assert_eq!(BlockNumber(0).prev(), None);
    }

    #[test]
    fn test_block_logs_assign_indices() {
        let table = TableId::new("app", "T");
        let logs = BlockLogs::new(
            7,
            vec![
                LogEntry::delete(0, table, vec![1]),
                LogEntry::delete(0, table, vec![2]),
            ],
        );
        assert_eq!(logs.logs[1].log_index, 1);
        assert!(logs.logs.iter().all(|e| e.block_number == BlockNumber(7)));
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(SyncProgress::Initial.percentage(), 0.0);
        assert_eq!(SyncProgress::Live.percentage(), 100.0);
        let json = serde_json::to_string(&SyncProgress::Live).unwrap();
        assert_eq!(json, r#"{"step":"live"}"#);
    }
}
