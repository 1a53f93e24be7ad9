//! Persisted store snapshots.
//!
//! File layout:
//!
//! ```text
//! | magic "MIR\0" | version (1B) | payload len (u32 LE) | MessagePack payload | CRC32 (u32 LE) |
//! ```
//!
//! Only packed layouts are stored. Decoded values are rebuilt on load
//! through a schema registry (see [`MirroredStore::hydrate`]).
//!
//! [`MirroredStore::hydrate`]: crate::MirroredStore::hydrate

use crate::codec::PackedLayout;
use crate::error::{MirrorError, Result};
use crate::types::{BlockNumber, TableId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"MIR\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Payload sanity limit (1GB).
const MAX_PAYLOAD: usize = 1024 * 1024 * 1024;

/// One record as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub table_id: TableId,
    pub key: Vec<u8>,
    pub layout: PackedLayout,
    pub block_number: BlockNumber,
    pub log_index: u32,
}

/// The packed contents of a store at a block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub latest_block: Option<BlockNumber>,
    pub records: Vec<SnapshotRecord>,
}

impl StoreSnapshot {
    /// First block a sync resumed from this snapshot should request.
    pub fn resume_block(&self) -> BlockNumber {
        self.latest_block
            .map(BlockNumber::next)
            .unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec(self)?;

        let mut out = Vec::with_capacity(payload.len() + 13);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.push(SNAPSHOT_VERSION);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut &bytes[..])
    }

    /// Write atomically: to a sibling temp file, then rename over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");

        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&self.to_bytes()?)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, path)?;
        tracing::debug!(
            "saved snapshot of {} records to {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_from(&mut BufReader::new(file))
    }

    fn read_from(reader: &mut impl Read) -> Result<Self> {
        // Verify header
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(MirrorError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(MirrorError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_PAYLOAD {
            return Err(MirrorError::Corruption("snapshot payload too large".into()));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&payload);
        if expected != got {
            return Err(MirrorError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&payload)?)
    }
}
