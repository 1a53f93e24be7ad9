//! Error types for the mirror.

use crate::deploy::DeployStage;
use crate::types::{BlockNumber, TableId};
use thiserror::Error;

/// Main error type for codec, store and sync operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value or schema disagrees with the declared schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Wire bytes violate the packed layout invariants.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Patch {start}..{end} out of bounds (layout length {len})")]
    PatchOutOfBounds { start: u64, end: u64, len: u64 },

    /// An update targeted a record that was never set.
    #[error("Record not found: {table} key 0x{key}")]
    RecordNotFound { table: TableId, key: String },

    #[error("Table already registered with a different schema: {0}")]
    DuplicateTable(TableId),

    #[error("Block {received:?} arrived after {previous:?}")]
    OutOfOrder {
        previous: BlockNumber,
        received: BlockNumber,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Deployment failed at {stage}: {reason}")]
    Deployment { stage: DeployStage, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl MirrorError {
    /// True for errors caused by wire bytes that disagree with the layout.
    ///
    /// Out-of-bounds patches are reported separately but belong to the same class.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            MirrorError::MalformedRecord(_) | MirrorError::PatchOutOfBounds { .. }
        )
    }

    pub(crate) fn record_not_found(table: TableId, key: &[u8]) -> Self {
        MirrorError::RecordNotFound {
            table,
            key: hex::encode(key),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MirrorError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MirrorError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MirrorError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MirrorError::Deserialization(e.to_string())
    }
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
