use std::io;

use thiserror::Error;
use zap_entities::EndpointId;
use zapx_common::{CodecError, SinkError};

use crate::TransferKey;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no open connection to {0}")]
    NoConnection(EndpointId),
    #[error("transfer {0} is already in flight")]
    AlreadyInFlight(TransferKey),
    #[error("connection to {0} closed during transfer")]
    ChannelClosed(EndpointId),
    #[error("transfer {0} was cancelled")]
    Cancelled(TransferKey),
    #[error("failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<SinkError> for TransferError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Closed(peer) => TransferError::ChannelClosed(peer),
            SinkError::Codec(err) => TransferError::Codec(err),
        }
    }
}
