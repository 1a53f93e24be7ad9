//! Block log sources.

use crate::error::{MirrorError, Result};
use crate::types::{BlockLogs, BlockNumber};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// An item on a log stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
    /// The next block, entries in log order.
    Block(BlockLogs),
    /// The transport failed. The engine halts on this.
    Error(String),
}

/// A live subscription to a log stream.
///
/// Disconnection of `receiver` ends the stream.
pub struct LogSubscription {
    /// Latest block known to the source when the subscription was made.
    pub tip: BlockNumber,
    pub receiver: Receiver<StreamItem>,
}

/// Anything that can stream block logs from a given block onwards.
///
/// Sources must deliver blocks in ascending order and may be resubscribed
/// from any block.
pub trait LogSource: Send + Sync {
    fn subscribe(&self, from_block: BlockNumber) -> Result<LogSubscription>;
}

#[derive(Default)]
struct MemoryState {
    history: Vec<BlockLogs>,
    subscribers: Vec<Sender<StreamItem>>,
    tip: BlockNumber,
    closed: bool,
    refuse: Option<String>,
}

/// In-process log source.
///
/// Keeps every pushed block so subscriptions can replay from any block,
/// and forwards later pushes to live subscribers. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryLogSource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-loaded with history.
    pub fn with_blocks(blocks: impl IntoIterator<Item = BlockLogs>) -> Self {
        let source = Self::new();
        for block in blocks {
            source.push(block);
        }
        source
    }

    /// Append a block and forward it to live subscribers.
    pub fn push(&self, block: BlockLogs) {
        let mut state = self.state.lock();
        if block.block_number > state.tip {
            state.tip = block.block_number;
        }
        state
            .subscribers
            .retain(|tx| tx.send(StreamItem::Block(block.clone())).is_ok());
        state.history.push(block);
    }

    /// Advertise a tip beyond the pushed history.
    pub fn set_tip(&self, tip: BlockNumber) {
        let mut state = self.state.lock();
        state.tip = state.tip.max(tip);
    }

    pub fn tip(&self) -> BlockNumber {
        self.state.lock().tip
    }

    /// Send a transport error to live subscribers.
    pub fn fail(&self, message: &str) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|tx| tx.send(StreamItem::Error(message.to_string())).is_ok());
    }

    /// Make later `subscribe` calls fail with a transport error.
    pub fn refuse_subscriptions(&self, message: &str) {
        self.state.lock().refuse = Some(message.to_string());
    }

    /// End every stream. Later subscriptions replay history and then end.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl LogSource for MemoryLogSource {
    fn subscribe(&self, from_block: BlockNumber) -> Result<LogSubscription> {
        let mut state = self.state.lock();
        if let Some(message) = &state.refuse {
            return Err(MirrorError::Transport(message.clone()));
        }

        let (tx, rx) = unbounded();
        for block in state
            .history
            .iter()
            .filter(|block| block.block_number >= from_block)
        {
            // Receiver is alive, send cannot fail
            let _ = tx.send(StreamItem::Block(block.clone()));
        }
        if !state.closed {
            state.subscribers.push(tx);
        }

        Ok(LogSubscription {
            tip: state.tip,
            receiver: rx,
        })
    }
}
