//! The peer transport as seen by the supervisor.
//!
//! A transport registers the local endpoint with a broker, dials remote
//! endpoints, hands over inbound links, and reports broker-level trouble.
//! Each [`PeerLink`] is an ordered, reliable, bidirectional message path
//! whose first event is [`LinkEvent::Open`] on success.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use zap_entities::EndpointId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("id {0} is already taken")]
    IdTaken(EndpointId),
    #[error("endpoint is not registered with the broker")]
    NotRegistered,
    #[error("link to {0} is closed")]
    Closed(EndpointId),
    #[error("network error: {0}")]
    Network(String),
    #[error("broker error: {0}")]
    Server(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    Data(Vec<u8>),
    Closed,
    Failed(String),
}

/// Broker-level conditions not tied to a single link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerNotice {
    PeerUnavailable(EndpointId),
    Network(String),
    Server(String),
    Disconnected,
}

pub trait Transport: Send + Sync + 'static {
    /// Claims `id` at the broker. Fails with [`TransportError::IdTaken`]
    /// when another endpoint holds it.
    fn register(
        &self,
        id: &EndpointId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Starts a link to `remote`. The link's first event says whether it
    /// opened; some failures produce no event at all.
    fn dial(
        &self,
        remote: &EndpointId,
    ) -> impl Future<Output = Result<PeerLink, TransportError>> + Send;

    /// Next link opened by a remote endpoint, or `None` once shut down.
    fn accept(&self) -> impl Future<Output = Option<PeerLink>> + Send;

    fn next_notice(&self) -> impl Future<Output = Option<BrokerNotice>> + Send;

    /// Re-attaches to the broker under the registered id.
    fn reconnect(
        &self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

/// Writing half of a link. Cheap to clone; all clones share one link.
#[derive(Clone, Debug)]
pub struct LinkWriter {
    remote: EndpointId,
    outbound: mpsc::Sender<LinkEvent>,
    severed: Arc<AtomicBool>,
}

impl LinkWriter {
    pub fn remote(&self) -> &EndpointId {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.severed.load(Ordering::Acquire) || self.outbound.is_closed()
    }

    /// Sends one message, waiting while the remote's queue is full.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.remote.clone()));
        }
        self.outbound
            .send(LinkEvent::Data(bytes))
            .await
            .map_err(|_| TransportError::Closed(self.remote.clone()))
    }

    /// Closes the link for both ends. Only the first call has an effect.
    pub fn close(&self) {
        self.terminate(LinkEvent::Closed);
    }

    /// Severs the link and delivers `event` to the remote end after any
    /// data already queued.
    pub(crate) fn terminate(&self, event: LinkEvent) {
        if self.severed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.deliver(event);
    }

    /// Queues `event` for the remote end regardless of the link state.
    pub(crate) fn deliver(&self, event: LinkEvent) {
        match self.outbound.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(event).await;
                });
            }
        }
    }
}

pub struct PeerLink {
    writer: LinkWriter,
    events: mpsc::Receiver<LinkEvent>,
}

impl PeerLink {
    /// Builds the two ends of one link, each with a queue of `capacity`
    /// events. Closing either end severs both.
    pub fn pair(
        a: EndpointId,
        b: EndpointId,
        capacity: usize,
    ) -> (PeerLink, PeerLink) {
        let (to_a, a_events) = mpsc::channel(capacity.max(1));
        let (to_b, b_events) = mpsc::channel(capacity.max(1));
        let severed = Arc::new(AtomicBool::new(false));
        let a_end = PeerLink {
            writer: LinkWriter {
                remote: b.clone(),
                outbound: to_b,
                severed: severed.clone(),
            },
            events: a_events,
        };
        let b_end = PeerLink {
            writer: LinkWriter {
                remote: a,
                outbound: to_a,
                severed,
            },
            events: b_events,
        };
        (a_end, b_end)
    }

    /// A link that reports `event` and nothing else.
    pub fn resolved(remote: EndpointId, event: LinkEvent) -> PeerLink {
        let (local, _) = Self::pair(remote.clone(), remote, 1);
        let (tx, events) = mpsc::channel(1);
        let _ = tx.try_send(event);
        PeerLink {
            writer: local.writer,
            events,
        }
    }

    pub fn remote(&self) -> &EndpointId {
        self.writer.remote()
    }

    pub fn writer(&self) -> &LinkWriter {
        &self.writer
    }

    pub fn into_parts(self) -> (LinkWriter, mpsc::Receiver<LinkEvent>) {
        (self.writer, self.events)
    }
}
