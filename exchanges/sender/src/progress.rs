//! Progress reporting for outgoing transfers.
//!
//! Every transfer reports through one [`ProgressSink`]: zero or more
//! `Sending` updates with non-decreasing progress, then exactly one terminal
//! update (`Complete` at 100, or `Error` at the last known progress).

use std::fmt;

use serde::{Deserialize, Serialize};
use zap_entities::EndpointId;

use crate::TransferKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Sending,
    Complete,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Sending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Sending => f.write_str("sending"),
            TransferStatus::Complete => f.write_str("complete"),
            TransferStatus::Error => f.write_str("error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferUpdate {
    pub file_name: String,
    pub peer: EndpointId,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub status: TransferStatus,
    /// Why the transfer failed, for `Error` updates.
    pub reason: Option<String>,
}

impl TransferUpdate {
    pub(crate) fn new(
        key: &TransferKey,
        progress: f64,
        status: TransferStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            file_name: key.file_name.clone(),
            peer: key.peer.clone(),
            progress,
            status,
            reason,
        }
    }
}

/// Receiver of progress and status updates for one transfer.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, update: TransferUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(TransferUpdate) + Send + Sync,
{
    fn notify(&self, update: TransferUpdate) {
        self(update)
    }
}
