//! Receiving side of a Zap transfer.
//!
//! One [`Assembler`] lives per channel. It rebuilds files from
//! index-addressed chunks that may arrive in any order or more than once,
//! and returns the acknowledgements to write back on the same channel.

mod assembler;

pub use assembler::{AssembledFile, Assembler, IncomingSnapshot, Outcome};

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Largest `fileSize` a `file-start` may declare.
    pub max_file_size: u64,
    /// Largest `totalChunks` a `file-start` may declare.
    pub max_chunks: u64,
    /// Incomplete files idle for this long are dropped.
    pub stale_after_ms: u64,
}

impl ReceiverConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024 * 1024,
            max_chunks: 1 << 20,
            stale_after_ms: 10 * 60 * 1000,
        }
    }
}
