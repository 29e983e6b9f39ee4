//! Bookkeeping for every outgoing transfer of one endpoint.
//!
//! The registry is the single owner of transfer state. The pump records
//! sent chunks, the channel reader records acknowledgements, and connection
//! teardown fails whatever is still in flight. Whoever removes an entry
//! delivers its terminal update, so each transfer ends exactly once.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, warn};
use zap_entities::EndpointId;

use crate::{ProgressSink, TransferError, TransferStatus, TransferUpdate};

/// Identifies one transfer: a file name sent to one peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey {
    pub file_name: String,
    pub peer: EndpointId,
}

impl TransferKey {
    pub fn new(file_name: impl Into<String>, peer: EndpointId) -> Self {
        Self {
            file_name: file_name.into(),
            peer,
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.file_name, self.peer)
    }
}

/// Point-in-time view of an outgoing transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferSnapshot {
    pub key: TransferKey,
    pub total_chunks: u64,
    pub sent_chunks: u64,
    pub acknowledged_chunks: u64,
    pub progress: f64,
    pub cancelled: bool,
}

struct OutgoingTransfer {
    total_chunks: u64,
    sent_chunks: u64,
    acknowledged: Vec<bool>,
    acknowledged_chunks: u64,
    confirmed: bool,
    cancelled: bool,
    last_progress: f64,
    sink: Arc<dyn ProgressSink>,
}

impl OutgoingTransfer {
    fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.sent_chunks as f64 / self.total_chunks as f64) * 100.0
    }
}

#[derive(Clone, Default)]
pub struct TransferRegistry {
    transfers: Arc<RwLock<HashMap<TransferKey, OutgoingTransfer>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<TransferKey, OutgoingTransfer>> {
        self.transfers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<TransferKey, OutgoingTransfer>> {
        self.transfers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new transfer. Only one transfer per key may be in flight.
    pub fn begin(
        &self,
        key: TransferKey,
        total_chunks: u64,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), TransferError> {
        let mut transfers = self.write();
        if transfers.contains_key(&key) {
            return Err(TransferError::AlreadyInFlight(key));
        }
        let capacity = usize::try_from(total_chunks).unwrap_or(0);
        transfers.insert(
            key,
            OutgoingTransfer {
                total_chunks,
                sent_chunks: 0,
                acknowledged: vec![false; capacity],
                acknowledged_chunks: 0,
                confirmed: false,
                cancelled: false,
                last_progress: 0.0,
                sink,
            },
        );
        Ok(())
    }

    /// Counts one more chunk as sent and reports the new progress.
    ///
    /// Returns `false` when the transfer is no longer registered, which means
    /// it was already resolved and the caller should stop sending.
    pub fn record_sent(&self, key: &TransferKey) -> bool {
        let update = {
            let mut transfers = self.write();
            let Some(transfer) = transfers.get_mut(key) else {
                return false;
            };
            transfer.sent_chunks =
                (transfer.sent_chunks + 1).min(transfer.total_chunks);
            let progress = transfer.progress().max(transfer.last_progress);
            transfer.last_progress = progress;
            (
                transfer.sink.clone(),
                TransferUpdate::new(
                    key,
                    progress,
                    TransferStatus::Sending,
                    None,
                ),
            )
        };
        update.0.notify(update.1);
        true
    }

    /// Marks chunk `index` as acknowledged by the receiver.
    ///
    /// Repeated or out-of-range acknowledgements are ignored. Returns whether
    /// the acknowledgement was new.
    pub fn record_chunk_ack(&self, key: &TransferKey, index: u64) -> bool {
        let mut transfers = self.write();
        let Some(transfer) = transfers.get_mut(key) else {
            debug!(transfer = %key, index, "Chunk ack for unknown transfer");
            return false;
        };
        let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|index| transfer.acknowledged.get_mut(index))
        else {
            warn!(transfer = %key, index, "Chunk ack out of range");
            return false;
        };
        if *slot {
            return false;
        }
        *slot = true;
        transfer.acknowledged_chunks += 1;
        true
    }

    /// Resolves a transfer as delivered. Reports `Complete` at 100.
    pub fn complete(&self, key: &TransferKey) -> bool {
        let removed = {
            let mut transfers = self.write();
            match transfers.get_mut(key) {
                Some(transfer) => transfer.confirmed = true,
                None => return false,
            }
            transfers.remove(key)
        };
        let Some(transfer) = removed else {
            return false;
        };
        info!(
            transfer = %key,
            acknowledged = transfer.acknowledged_chunks,
            total = transfer.total_chunks,
            "Transfer confirmed by receiver"
        );
        transfer.sink.notify(TransferUpdate::new(
            key,
            100.0,
            TransferStatus::Complete,
            None,
        ));
        true
    }

    /// Resolves a transfer as failed. Reports `Error` at the last progress.
    ///
    /// Returns `false` when the transfer was already resolved.
    pub fn fail(&self, key: &TransferKey, reason: impl Into<String>) -> bool {
        let removed = self.write().remove(key);
        match removed {
            Some(transfer) => {
                Self::report_failure(key, transfer, reason.into());
                true
            }
            None => false,
        }
    }

    /// Fails every unconfirmed transfer addressed to `peer`.
    pub fn fail_peer(&self, peer: &EndpointId, reason: &str) -> usize {
        self.fail_matching(|key, _| &key.peer == peer, reason)
    }

    /// Fails every unconfirmed transfer.
    pub fn fail_all(&self, reason: &str) -> usize {
        self.fail_matching(|_, _| true, reason)
    }

    fn fail_matching(
        &self,
        matches: impl Fn(&TransferKey, &OutgoingTransfer) -> bool,
        reason: &str,
    ) -> usize {
        let failed: Vec<(TransferKey, OutgoingTransfer)> = {
            let mut transfers = self.write();
            let keys: Vec<TransferKey> = transfers
                .iter()
                .filter(|(key, transfer)| {
                    !transfer.confirmed && matches(key, transfer)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    transfers.remove(&key).map(|transfer| (key, transfer))
                })
                .collect()
        };
        let count = failed.len();
        for (key, transfer) in failed {
            Self::report_failure(&key, transfer, reason.to_string());
        }
        count
    }

    fn report_failure(
        key: &TransferKey,
        transfer: OutgoingTransfer,
        reason: String,
    ) {
        warn!(
            transfer = %key,
            sent = transfer.sent_chunks,
            total = transfer.total_chunks,
            reason = %reason,
            "Transfer failed"
        );
        transfer.sink.notify(TransferUpdate::new(
            key,
            transfer.last_progress,
            TransferStatus::Error,
            Some(reason),
        ));
    }

    /// Asks the pump to stop sending. The pump resolves the transfer as
    /// failed before its next chunk.
    pub fn cancel(&self, key: &TransferKey) -> bool {
        match self.write().get_mut(key) {
            Some(transfer) => {
                transfer.cancelled = true;
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, key: &TransferKey) -> bool {
        self.read().get(key).is_some_and(|transfer| transfer.cancelled)
    }

    pub fn contains(&self, key: &TransferKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &TransferKey) -> Option<TransferSnapshot> {
        self.read()
            .get(key)
            .map(|transfer| Self::snapshot_of(key, transfer))
    }

    /// All in-flight transfers, ordered by key.
    pub fn snapshot(&self) -> Vec<TransferSnapshot> {
        let mut snapshots: Vec<TransferSnapshot> = self
            .read()
            .iter()
            .map(|(key, transfer)| Self::snapshot_of(key, transfer))
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    fn snapshot_of(
        key: &TransferKey,
        transfer: &OutgoingTransfer,
    ) -> TransferSnapshot {
        TransferSnapshot {
            key: key.clone(),
            total_chunks: transfer.total_chunks,
            sent_chunks: transfer.sent_chunks,
            acknowledged_chunks: transfer.acknowledged_chunks,
            progress: transfer.last_progress,
            cancelled: transfer.cancelled,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
