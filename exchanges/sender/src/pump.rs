use std::sync::Arc;

use tracing::{debug, info, warn};
use zap_entities::File;
use zapx_common::{Message, MessageSink, chunk_range, total_chunks};

use crate::{
    ProgressSink, SenderConfig, TransferError, TransferKey, TransferRegistry,
    TransferStatus, TransferUpdate,
};

/// Streams `file` over `channel` as `file-start`, the chunks in index
/// order, then `file-end`.
///
/// Returns once `file-end` is written. Delivery is confirmed later, when the
/// receiver's `file-ack` reaches [`TransferRegistry::complete`]. Any failure
/// before that point resolves the transfer with an `Error` update and is
/// returned to the caller.
pub async fn send_file<S: MessageSink>(
    registry: &TransferRegistry,
    channel: &S,
    file: &File,
    config: &SenderConfig,
    sink: Arc<dyn ProgressSink>,
) -> Result<(), TransferError> {
    let peer = channel.remote().clone();
    let key = TransferKey::new(file.name.clone(), peer.clone());

    if !channel.is_open() {
        let err = TransferError::NoConnection(peer);
        return Err(reject(&key, err, sink.as_ref()));
    }

    let file_size = file.len();
    let total = total_chunks(file_size, config.chunk_size);
    if let Err(err) = registry.begin(key.clone(), total, sink.clone()) {
        return Err(reject(&key, err, sink.as_ref()));
    }

    info!(
        transfer = %key,
        size = file_size,
        chunks = total,
        "Starting file transfer"
    );
    sink.notify(TransferUpdate::new(&key, 0.0, TransferStatus::Sending, None));

    let start = Message::FileStart {
        file_name: file.name.clone(),
        file_size,
        total_chunks: total,
    };
    if let Err(err) = channel.send(&start).await {
        return Err(abort(registry, &key, err.into()));
    }

    for index in 0..total {
        if registry.is_cancelled(&key) {
            return Err(abort(
                registry,
                &key,
                TransferError::Cancelled(key.clone()),
            ));
        }
        if !channel.is_open() {
            return Err(abort(
                registry,
                &key,
                TransferError::ChannelClosed(peer),
            ));
        }

        let Some((offset, len)) =
            chunk_range(index, file_size, config.chunk_size)
        else {
            break;
        };
        let chunk = match file.data.read_range(offset, len) {
            Ok(chunk) => chunk,
            Err(source) => {
                return Err(abort(
                    registry,
                    &key,
                    TransferError::Read {
                        file: file.name.clone(),
                        source,
                    },
                ));
            }
        };

        let message = Message::FileChunk {
            file_name: file.name.clone(),
            chunk_index: index,
            chunk,
        };
        if let Err(err) = channel.send(&message).await {
            return Err(abort(registry, &key, err.into()));
        }
        if !registry.record_sent(&key) {
            // Resolved elsewhere, usually by connection teardown.
            debug!(transfer = %key, index, "Transfer resolved mid-stream");
            return Err(TransferError::ChannelClosed(peer));
        }
    }

    let end = Message::FileEnd {
        file_name: file.name.clone(),
    };
    if let Err(err) = channel.send(&end).await {
        return Err(abort(registry, &key, err.into()));
    }

    debug!(transfer = %key, "All chunks sent, awaiting file-ack");
    Ok(())
}

/// Reports a transfer that never started: one `Error` update at 0.
pub fn reject(
    key: &TransferKey,
    err: TransferError,
    sink: &dyn ProgressSink,
) -> TransferError {
    warn!(transfer = %key, "Cannot send file: {err}");
    sink.notify(TransferUpdate::new(
        key,
        0.0,
        TransferStatus::Error,
        Some(err.to_string()),
    ));
    err
}

fn abort(
    registry: &TransferRegistry,
    key: &TransferKey,
    err: TransferError,
) -> TransferError {
    if !registry.fail(key, err.to_string()) {
        debug!(transfer = %key, "Transfer already resolved: {err}");
    }
    err
}
