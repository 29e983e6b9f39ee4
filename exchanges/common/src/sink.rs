use std::future::Future;

use thiserror::Error;
use zap_entities::EndpointId;

use crate::{CodecError, Message};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("channel to {0} is closed")]
    Closed(EndpointId),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One open channel to a remote endpoint, as seen by the transfer protocol.
///
/// `send` waits while the channel's outbound buffer is full, so a caller
/// streaming chunks is throttled by the transport's back-pressure.
pub trait MessageSink: Send + Sync {
    /// Endpoint on the other end of the channel.
    fn remote(&self) -> &EndpointId;

    /// Whether the channel can still carry messages.
    fn is_open(&self) -> bool;

    /// Encodes and sends one message.
    fn send(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}
