use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;
use uuid::Uuid;
use zap_entities::EndpointId;
use zapx_common::{Message, MessageSink, SinkError};
use zapx_receiver::Assembler;

use crate::{LinkEvent, LinkWriter};

/// Sending side of one open channel, shared by every pump using it.
///
/// Messages go through a bounded queue drained by the channel's writer
/// task, so `send` waits while the link is congested.
#[derive(Clone)]
pub struct ChannelHandle {
    remote: EndpointId,
    outbound: mpsc::Sender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub(crate) fn new(
        remote: EndpointId,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            remote,
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MessageSink for ChannelHandle {
    fn remote(&self) -> &EndpointId {
        &self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    async fn send(&self, message: &Message) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::Closed(self.remote.clone()));
        }
        let bytes = message.encode()?;
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| SinkError::Closed(self.remote.clone()))
    }
}

/// Queues handed to the channel's tasks when it is wired.
pub(crate) struct Unwired {
    pub events: mpsc::Receiver<LinkEvent>,
    pub outbound: mpsc::Receiver<Vec<u8>>,
    pub replies_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub replies_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Supervisor-side state of one channel.
pub(crate) struct ChannelRecord {
    /// Distinguishes this channel from earlier ones to the same peer.
    pub instance: Uuid,
    pub handle: ChannelHandle,
    pub link: LinkWriter,
    /// Whether this end dialled the link.
    pub dialed_locally: bool,
    pub wired: bool,
    pub unwired: Option<Unwired>,
    pub tasks: Vec<JoinHandle<()>>,
    pub assembler: Arc<Mutex<Assembler>>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Writes acknowledgements ahead of queued outgoing messages.
pub(crate) async fn write_loop(
    link: LinkWriter,
    mut replies: mpsc::UnboundedReceiver<Vec<u8>>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        let bytes = tokio::select! {
            biased;
            Some(bytes) = replies.recv() => bytes,
            Some(bytes) = outbound.recv() => bytes,
            else => break,
        };
        if let Err(err) = link.send(bytes).await {
            debug!(peer = %link.remote(), "Channel writer stopped: {err}");
            break;
        }
    }
}
