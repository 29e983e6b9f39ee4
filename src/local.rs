//! In-process broker connecting any number of endpoints in one process.
//!
//! Besides plain dialling and accepting, the broker can simulate the
//! failure modes a real signalling service shows: id collisions, peers
//! that are not registered, peers that never answer, links dropped
//! mid-transfer and broker-level notices.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};
use zap_entities::EndpointId;

use crate::{
    BrokerNotice, LinkEvent, LinkWriter, PeerLink, Transport, TransportError,
};

/// Events queued per direction of a link.
pub const DEFAULT_LINK_CAPACITY: usize = 64;

struct Registration {
    inbound: mpsc::UnboundedSender<PeerLink>,
    notices: mpsc::UnboundedSender<BrokerNotice>,
}

struct LinkRecord {
    a: EndpointId,
    b: EndpointId,
    a_writer: LinkWriter,
    b_writer: LinkWriter,
}

impl LinkRecord {
    fn involves(&self, id: &EndpointId) -> bool {
        &self.a == id || &self.b == id
    }

    fn connects(&self, x: &EndpointId, y: &EndpointId) -> bool {
        (&self.a == x && &self.b == y) || (&self.a == y && &self.b == x)
    }

    fn is_live(&self) -> bool {
        !self.a_writer.is_closed()
    }
}

#[derive(Default)]
struct BrokerState {
    registrations: HashMap<EndpointId, Registration>,
    unresponsive: HashSet<EndpointId>,
    links: Vec<LinkRecord>,
    // Far ends of links to unresponsive endpoints, keyed by the dialled id,
    // kept so the dialler hears nothing.
    stalled: Vec<(EndpointId, PeerLink)>,
}

impl BrokerState {
    /// Forgets dead links and stalled dials nobody waits on any more.
    fn prune(&mut self) {
        self.links.retain(LinkRecord::is_live);
        self.stalled.retain(|(_, far)| !far.writer().is_closed());
    }

    /// Releases stalled dials touching `id`. Their diallers see the link
    /// close.
    fn release_stalled(&mut self, id: &EndpointId) -> usize {
        let before = self.stalled.len();
        self.stalled
            .retain(|(target, far)| target != id && far.remote() != id);
        before - self.stalled.len()
    }
}

#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
    link_capacity: usize,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::with_link_capacity(DEFAULT_LINK_CAPACITY)
    }

    pub fn with_link_capacity(link_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            link_capacity: link_capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new, unregistered transport attached to this broker.
    pub fn transport(&self) -> LocalTransport {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        LocalTransport {
            broker: self.clone(),
            id: Mutex::new(None),
            inbound_tx,
            inbound: AsyncMutex::new(inbound_rx),
            notices_tx,
            notices: AsyncMutex::new(notices_rx),
        }
    }

    pub fn is_registered(&self, id: &EndpointId) -> bool {
        self.state().registrations.contains_key(id)
    }

    /// While set, dials to `id` never produce an event. Clearing it closes
    /// the dials that stalled in the meantime.
    pub fn set_unresponsive(&self, id: &EndpointId, unresponsive: bool) {
        let mut state = self.state();
        if unresponsive {
            state.unresponsive.insert(id.clone());
        } else {
            state.unresponsive.remove(id);
            let released = state.release_stalled(id);
            if released > 0 {
                debug!(id = %id, released, "Releasing stalled dials");
            }
        }
        state.prune();
    }

    /// Dials to unresponsive endpoints still held open.
    pub fn stalled_count(&self) -> usize {
        let mut state = self.state();
        state.prune();
        state.stalled.len()
    }

    /// Severs every live link between `a` and `b`. Both ends see
    /// [`LinkEvent::Failed`] after the data already in flight.
    pub fn drop_link(&self, a: &EndpointId, b: &EndpointId) -> bool {
        let dropped: Vec<LinkRecord> = {
            let mut state = self.state();
            state.prune();
            let (dropped, kept): (Vec<LinkRecord>, Vec<LinkRecord>) =
                std::mem::take(&mut state.links)
                    .into_iter()
                    .partition(|link| link.connects(a, b));
            state.links = kept;
            dropped
        };
        let any = dropped.iter().any(LinkRecord::is_live);
        for link in dropped {
            warn!(a = %link.a, b = %link.b, "Dropping link");
            let reason = "link dropped by broker".to_string();
            link.a_writer.terminate(LinkEvent::Failed(reason.clone()));
            // The shared flag is already set; reach the other end directly.
            link.b_writer.deliver(LinkEvent::Failed(reason));
        }
        any
    }

    /// Delivers a broker notice to the endpoint registered as `id`.
    pub fn notify(&self, id: &EndpointId, notice: BrokerNotice) -> bool {
        let state = self.state();
        match state.registrations.get(id) {
            Some(registration) => registration.notices.send(notice).is_ok(),
            None => false,
        }
    }

    /// Number of live links touching `id`.
    pub fn link_count(&self, id: &EndpointId) -> usize {
        let mut state = self.state();
        state.prune();
        state.links.iter().filter(|link| link.involves(id)).count()
    }

    fn register(
        &self,
        id: &EndpointId,
        inbound: &mpsc::UnboundedSender<PeerLink>,
        notices: &mpsc::UnboundedSender<BrokerNotice>,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.registrations.contains_key(id) {
            return Err(TransportError::IdTaken(id.clone()));
        }
        state.registrations.insert(
            id.clone(),
            Registration {
                inbound: inbound.clone(),
                notices: notices.clone(),
            },
        );
        Ok(())
    }

    fn dial(
        &self,
        from: &EndpointId,
        to: &EndpointId,
    ) -> Result<PeerLink, TransportError> {
        let mut state = self.state();
        if !state.registrations.contains_key(from) {
            return Err(TransportError::NotRegistered);
        }

        if state.unresponsive.contains(to) {
            debug!(from = %from, to = %to, "Dial to unresponsive endpoint");
            let (local, far) =
                PeerLink::pair(from.clone(), to.clone(), self.link_capacity);
            state.prune();
            state.stalled.push((to.clone(), far));
            return Ok(local);
        }

        let Some(target) = state.registrations.get(to) else {
            debug!(from = %from, to = %to, "Dial to unknown endpoint");
            if let Some(dialer) = state.registrations.get(from) {
                let notice = BrokerNotice::PeerUnavailable(to.clone());
                let _ = dialer.notices.send(notice);
            }
            return Ok(PeerLink::resolved(
                to.clone(),
                LinkEvent::Failed(format!("peer {to} is unavailable")),
            ));
        };

        let (local, remote) =
            PeerLink::pair(from.clone(), to.clone(), self.link_capacity);
        local.writer().deliver(LinkEvent::Open);
        remote.writer().deliver(LinkEvent::Open);
        let record = LinkRecord {
            a: from.clone(),
            b: to.clone(),
            a_writer: local.writer().clone(),
            b_writer: remote.writer().clone(),
        };
        if target.inbound.send(remote).is_err() {
            return Ok(PeerLink::resolved(
                to.clone(),
                LinkEvent::Failed(format!("peer {to} stopped accepting")),
            ));
        }
        state.prune();
        state.links.push(record);
        Ok(local)
    }

    fn unregister(&self, id: &EndpointId) {
        let closing: Vec<LinkRecord> = {
            let mut state = self.state();
            state.registrations.remove(id);
            state.release_stalled(id);
            state.prune();
            let (closing, kept): (Vec<LinkRecord>, Vec<LinkRecord>) =
                std::mem::take(&mut state.links)
                    .into_iter()
                    .partition(|link| link.involves(id));
            state.links = kept;
            closing
        };
        for link in closing {
            link.a_writer.close();
            link.b_writer.deliver(LinkEvent::Closed);
        }
    }
}

/// One endpoint's attachment to a [`LocalBroker`].
pub struct LocalTransport {
    broker: LocalBroker,
    id: Mutex<Option<EndpointId>>,
    inbound_tx: mpsc::UnboundedSender<PeerLink>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<PeerLink>>,
    notices_tx: mpsc::UnboundedSender<BrokerNotice>,
    notices: AsyncMutex<mpsc::UnboundedReceiver<BrokerNotice>>,
}

impl LocalTransport {
    pub fn broker(&self) -> &LocalBroker {
        &self.broker
    }

    pub fn id(&self) -> Option<EndpointId> {
        self.id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for LocalTransport {
    async fn register(&self, id: &EndpointId) -> Result<(), TransportError> {
        self.broker.register(id, &self.inbound_tx, &self.notices_tx)?;
        info!(id = %id, "Registered with local broker");
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(id.clone());
        Ok(())
    }

    async fn dial(
        &self,
        remote: &EndpointId,
    ) -> Result<PeerLink, TransportError> {
        let local = self.id().ok_or(TransportError::NotRegistered)?;
        self.broker.dial(&local, remote)
    }

    async fn accept(&self) -> Option<PeerLink> {
        self.inbound.lock().await.recv().await
    }

    async fn next_notice(&self) -> Option<BrokerNotice> {
        self.notices.lock().await.recv().await
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let id = self.id().ok_or(TransportError::NotRegistered)?;
        if self.broker.is_registered(&id) {
            debug!(id = %id, "Still registered, nothing to reconnect");
            return Ok(());
        }
        self.broker.register(&id, &self.inbound_tx, &self.notices_tx)?;
        info!(id = %id, "Reconnected to local broker");
        Ok(())
    }

    async fn shutdown(&self) {
        let id = self.id.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = id {
            info!(id = %id, "Leaving local broker");
            self.broker.unregister(&id);
        }
    }
}
