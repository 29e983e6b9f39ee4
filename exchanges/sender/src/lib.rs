//! Sending side of a Zap transfer.
//!
//! [`send_file`] streams one file over an open channel, and
//! [`TransferRegistry`] tracks every outgoing transfer until the receiver
//! confirms it or it fails.

mod error;
mod progress;
mod pump;
mod registry;

pub use error::TransferError;
pub use progress::{ProgressSink, TransferStatus, TransferUpdate};
pub use pump::{reject, send_file};
pub use registry::{TransferKey, TransferRegistry, TransferSnapshot};

use serde::{Deserialize, Serialize};
use zapx_common::CHUNK_SIZE;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Payload bytes per `file-chunk` message.
    pub chunk_size: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }
}
