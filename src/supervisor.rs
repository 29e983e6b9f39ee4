//! Owner of every peer channel of one endpoint.
//!
//! The supervisor dials and accepts links, keeps at most one channel per
//! remote id, and runs two tasks per channel: a driver that reads link
//! events and dispatches inbound messages, and a writer that drains the
//! channel's outgoing queues. Closing a channel fails every unconfirmed
//! transfer to that peer.

mod channel;
mod events;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
        RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use chrono::Utc;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zap_entities::{EndpointId, File};
use zapx_common::{AckStatus, Message};
use zapx_receiver::Assembler;
use zapx_sender::{
    ProgressSink, TransferError, TransferKey, TransferRegistry,
    TransferSnapshot,
};

pub use channel::ChannelHandle;
pub use events::{
    PeerInfo, PeersEvent, ReceivedEvent, ReceivingEvent, SupervisorSubscriber,
};

use crate::{
    BrokerNotice, ConnectError, ConnectionIssue, IdentityAllocator, IssueKind,
    LinkEvent, LinkWriter, PeerLink, SupervisorConfig, Transport,
    TransportError,
};
use channel::{ChannelRecord, Unwired, write_loop};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Supervisor<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Supervisor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Supervisor<T> {
    /// Allocates a local id on `transport` and starts accepting links.
    pub async fn start(
        transport: T,
        config: SupervisorConfig,
    ) -> Result<Self, TransportError> {
        let local_id = IdentityAllocator::new(config.id_retry_delay())
            .allocate(&transport)
            .await?;
        Ok(Self::attach(transport, local_id, config))
    }

    /// Starts supervising a transport already registered as `local_id`.
    pub fn attach(
        transport: T,
        local_id: EndpointId,
        config: SupervisorConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            local_id,
            transport,
            config,
            channels: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            registry: TransferRegistry::new(),
            connection_error: RwLock::new(None),
            subscribers: RwLock::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });
        let accept = tokio::spawn(inner.clone().accept_loop());
        let notices = tokio::spawn(inner.clone().notice_loop());
        lock(&inner.background).extend([accept, notices]);
        info!(id = %inner.local_id, "Supervisor started");
        Self { inner }
    }

    pub fn local_id(&self) -> &EndpointId {
        &self.inner.local_id
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Opens a channel to `remote` and waits for it to report open.
    ///
    /// Fails without contacting the transport when `remote` is the local id
    /// or already connected. There is no deadline here: some transports
    /// never answer for unreachable peers, see
    /// [`connect_with_timeout`](Self::connect_with_timeout).
    pub async fn connect(
        &self,
        remote: &EndpointId,
    ) -> Result<(), ConnectError> {
        self.inner.connect(remote).await
    }

    /// [`connect`](Self::connect) bounded by the configured timeout.
    pub async fn connect_with_timeout(
        &self,
        remote: &EndpointId,
    ) -> Result<(), ConnectError> {
        let timeout = self.inner.config.connect_timeout();
        match tokio::time::timeout(timeout, self.inner.connect(remote)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(peer = %remote, ?timeout, "Connect attempt timed out");
                Err(ConnectError::Timeout {
                    peer: remote.clone(),
                    timeout,
                })
            }
        }
    }

    /// Closes the channel to `remote` as if the peer had closed it.
    pub fn disconnect(&self, remote: &EndpointId) -> bool {
        let Some(instance) = self.inner.instance_of(remote) else {
            return false;
        };
        self.inner.teardown(remote, instance, "disconnected locally")
    }

    pub fn is_connected(&self, remote: &EndpointId) -> bool {
        self.inner.channels().contains_key(remote)
    }

    /// Open channel to `remote`, for sending messages directly.
    pub fn channel(&self, remote: &EndpointId) -> Option<ChannelHandle> {
        self.inner
            .channels()
            .get(remote)
            .map(|record| record.handle.clone())
    }

    /// Connected peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers()
    }

    /// Files currently being received, grouped by peer.
    pub fn receiving(&self) -> Vec<ReceivingEvent> {
        let assemblers: Vec<(EndpointId, Arc<Mutex<Assembler>>)> = self
            .inner
            .channels()
            .iter()
            .map(|(peer, record)| (peer.clone(), record.assembler.clone()))
            .collect();
        let mut receiving: Vec<ReceivingEvent> = assemblers
            .into_iter()
            .filter_map(|(peer, assembler)| {
                let files = lock(&assembler).snapshot();
                (!files.is_empty()).then_some(ReceivingEvent { peer, files })
            })
            .collect();
        receiving.sort_by(|a, b| a.peer.cmp(&b.peer));
        receiving
    }

    /// Streams `file` to `remote`. Returns once the last message is queued;
    /// the receiver's confirmation arrives later through `progress`.
    pub async fn send_file(
        &self,
        remote: &EndpointId,
        file: &File,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), TransferError> {
        let Some(channel) = self.channel(remote) else {
            let key = TransferKey::new(file.name.clone(), remote.clone());
            let err = TransferError::NoConnection(remote.clone());
            return Err(zapx_sender::reject(&key, err, progress.as_ref()));
        };
        zapx_sender::send_file(
            &self.inner.registry,
            &channel,
            file,
            &self.inner.config.sender,
            progress,
        )
        .await
    }

    /// Sends `files` one after another, stopping at the first failure.
    pub async fn send_files(
        &self,
        remote: &EndpointId,
        files: &[File],
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), TransferError> {
        info!(peer = %remote, count = files.len(), "Sending files");
        for file in files {
            self.send_file(remote, file, progress.clone()).await?;
        }
        Ok(())
    }

    /// Stops an in-flight transfer before its next chunk.
    pub fn cancel_transfer(
        &self,
        file_name: &str,
        remote: &EndpointId,
    ) -> bool {
        let key = TransferKey::new(file_name, remote.clone());
        let cancelled = self.inner.registry.cancel(&key);
        if cancelled {
            info!(transfer = %key, "Transfer cancellation requested");
        }
        cancelled
    }

    /// Outgoing transfers not yet confirmed or failed.
    pub fn transfers(&self) -> Vec<TransferSnapshot> {
        self.inner.registry.snapshot()
    }

    pub fn connection_error(&self) -> Option<ConnectionIssue> {
        self.inner
            .connection_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes the current connection error so it is reported only once.
    pub fn clear_connection_error(&self) -> Option<ConnectionIssue> {
        self.inner
            .connection_error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn SupervisorSubscriber>) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscriber.get_id(), subscriber);
    }

    pub fn unsubscribe(&self, subscriber: Arc<dyn SupervisorSubscriber>) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscriber.get_id());
    }

    /// Closes every channel, fails what is in flight and leaves the broker.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(id = %self.inner.local_id, "Shutting down supervisor");
        for task in lock(&self.inner.background).drain(..) {
            task.abort();
        }
        self.inner.close_all("supervisor shut down");
        self.inner.transport.shutdown().await;
    }
}

struct Inner<T> {
    local_id: EndpointId,
    transport: T,
    config: SupervisorConfig,
    channels: RwLock<HashMap<EndpointId, ChannelRecord>>,
    pending: Mutex<HashSet<EndpointId>>,
    registry: TransferRegistry,
    connection_error: RwLock<Option<ConnectionIssue>>,
    subscribers: RwLock<HashMap<String, Arc<dyn SupervisorSubscriber>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Marks a dial in progress for as long as it lives.
struct PendingDial<'a> {
    pending: &'a Mutex<HashSet<EndpointId>>,
    remote: EndpointId,
}

impl<'a> PendingDial<'a> {
    fn claim(
        pending: &'a Mutex<HashSet<EndpointId>>,
        remote: &EndpointId,
    ) -> Result<Self, ConnectError> {
        if !lock(pending).insert(remote.clone()) {
            return Err(ConnectError::AlreadyConnecting(remote.clone()));
        }
        Ok(Self {
            pending,
            remote: remote.clone(),
        })
    }
}

impl Drop for PendingDial<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.remote);
    }
}

impl<T: Transport> Inner<T> {
    fn channels(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<EndpointId, ChannelRecord>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_mut(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<EndpointId, ChannelRecord>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn instance_of(&self, remote: &EndpointId) -> Option<Uuid> {
        self.channels().get(remote).map(|record| record.instance)
    }

    async fn connect(
        self: &Arc<Self>,
        remote: &EndpointId,
    ) -> Result<(), ConnectError> {
        if self.is_shut_down() {
            return Err(ConnectError::ShutDown);
        }
        if remote == &self.local_id {
            return Err(ConnectError::SelfConnect(remote.clone()));
        }
        if self.channels().contains_key(remote) {
            debug!(peer = %remote, "Already connected");
            return Err(ConnectError::AlreadyConnected(remote.clone()));
        }
        let _pending = PendingDial::claim(&self.pending, remote)?;

        info!(peer = %remote, "Connecting");
        let link = self.transport.dial(remote).await?;
        let (writer, mut events) = link.into_parts();
        match events.recv().await {
            Some(LinkEvent::Open) => {}
            Some(LinkEvent::Failed(reason)) => {
                warn!(peer = %remote, reason = %reason, "Connect failed");
                return Err(ConnectError::Unreachable {
                    peer: remote.clone(),
                    reason,
                });
            }
            Some(LinkEvent::Data(_)) => {
                writer.close();
                return Err(ConnectError::Unreachable {
                    peer: remote.clone(),
                    reason: "peer sent data before the channel opened".into(),
                });
            }
            Some(LinkEvent::Closed) | None => {
                return Err(ConnectError::Closed(remote.clone()));
            }
        }
        self.adopt(remote.clone(), writer, events, true)
    }

    async fn accept_loop(self: Arc<Self>) {
        while let Some(link) = self.transport.accept().await {
            let inner = self.clone();
            tokio::spawn(async move { inner.on_inbound(link).await });
        }
        debug!(id = %self.local_id, "Accept loop ended");
    }

    async fn on_inbound(self: Arc<Self>, link: PeerLink) {
        let remote = link.remote().clone();
        let (writer, mut events) = link.into_parts();
        if let Err(reason) = self.check_inbound(&remote) {
            debug!(peer = %remote, reason, "Rejecting inbound link");
            writer.close();
            return;
        }

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Some(LinkEvent::Open)) => {}
            other => {
                debug!(peer = %remote, ?other, "Inbound link never opened");
                writer.close();
                return;
            }
        }
        match self.adopt(remote.clone(), writer, events, false) {
            Ok(()) => info!(peer = %remote, "Accepted inbound channel"),
            Err(err) => {
                debug!(peer = %remote, "Inbound channel dropped: {err}")
            }
        }
    }

    /// Screens an inbound link before waiting for it to open. A link from a
    /// higher id loses to our own pending dial to it.
    fn check_inbound(&self, remote: &EndpointId) -> Result<(), &'static str> {
        if self.is_shut_down() {
            return Err("shut down");
        }
        if remote == &self.local_id {
            return Err("link from own id");
        }
        if lock(&self.pending).contains(remote) && self.local_id < *remote {
            return Err("own dial to this peer takes precedence");
        }
        Ok(())
    }

    /// Whether a new link replaces the current channel to `remote`.
    ///
    /// Both ends keep the link dialled by the lower id. Between two links
    /// dialled by the same side, the existing one stays.
    fn prefers_new(
        &self,
        remote: &EndpointId,
        existing_dialed_locally: bool,
        new_dialed_locally: bool,
    ) -> bool {
        if existing_dialed_locally == new_dialed_locally {
            return false;
        }
        let local_is_lower = self.local_id < *remote;
        new_dialed_locally == local_is_lower
    }

    /// Registers an opened link as the channel to `remote`, or closes it
    /// when the current channel takes precedence.
    fn adopt(
        self: &Arc<Self>,
        remote: EndpointId,
        link: LinkWriter,
        events: mpsc::Receiver<LinkEvent>,
        dialed_locally: bool,
    ) -> Result<(), ConnectError> {
        let instance = Uuid::new_v4();
        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.config.channel_capacity.max(1));
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let now = Utc::now();
        let replaced = {
            let mut channels = self.channels_mut();
            if self.is_shut_down() {
                drop(channels);
                link.close();
                return Err(ConnectError::ShutDown);
            }
            let replaces = channels.get(&remote).map(|existing| {
                self.prefers_new(
                    &remote,
                    existing.dialed_locally,
                    dialed_locally,
                )
            });
            let replaced = match replaces {
                None => None,
                Some(true) => channels.remove(&remote),
                Some(false) => {
                    drop(channels);
                    debug!(peer = %remote, "Closing duplicate link");
                    link.close();
                    return Err(ConnectError::AlreadyConnected(remote));
                }
            };
            channels.insert(
                remote.clone(),
                ChannelRecord {
                    instance,
                    handle: ChannelHandle::new(remote.clone(), outbound_tx),
                    link,
                    dialed_locally,
                    wired: false,
                    unwired: Some(Unwired {
                        events,
                        outbound: outbound_rx,
                        replies_tx,
                        replies_rx,
                    }),
                    tasks: Vec::new(),
                    assembler: Arc::new(Mutex::new(Assembler::new(
                        self.config.receiver.clone(),
                    ))),
                    connected_at: now,
                    last_activity: now,
                },
            );
            replaced
        };
        if let Some(old) = replaced {
            self.release(&remote, old, "replaced by a simultaneous connection");
        }
        self.wire(&remote, instance);
        info!(peer = %remote, channel = %instance, "Channel open");
        self.notify_peers();
        Ok(())
    }

    /// Starts the driver and writer tasks of a channel. Only the first call
    /// per channel instance does anything.
    fn wire(self: &Arc<Self>, remote: &EndpointId, instance: Uuid) -> bool {
        let mut channels = self.channels_mut();
        let Some(record) = channels
            .get_mut(remote)
            .filter(|record| record.instance == instance)
        else {
            return false;
        };
        if record.wired {
            debug!(
                peer = %remote,
                channel = %instance,
                "Channel already wired"
            );
            return false;
        }
        let Some(parts) = record.unwired.take() else {
            return false;
        };
        record.wired = true;

        let writer = tokio::spawn(write_loop(
            record.link.clone(),
            parts.replies_rx,
            parts.outbound,
        ));
        let driver = tokio::spawn(self.clone().drive(
            remote.clone(),
            instance,
            parts.events,
            parts.replies_tx,
            record.assembler.clone(),
        ));
        record.tasks = vec![writer, driver];
        true
    }

    async fn drive(
        self: Arc<Self>,
        remote: EndpointId,
        instance: Uuid,
        mut events: mpsc::Receiver<LinkEvent>,
        replies: mpsc::UnboundedSender<Vec<u8>>,
        assembler: Arc<Mutex<Assembler>>,
    ) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        let reason = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LinkEvent::Data(bytes)) => {
                        self.on_data(
                            &remote, instance, &bytes, &replies, &assembler,
                        );
                    }
                    Some(LinkEvent::Open) => {
                        debug!(peer = %remote, "Ignoring repeated open");
                    }
                    Some(LinkEvent::Closed) | None => {
                        break "connection closed".to_string();
                    }
                    Some(LinkEvent::Failed(reason)) => break reason,
                },
                _ = sweep.tick() => self.sweep(&remote, &assembler),
            }
        };
        self.teardown(&remote, instance, &reason);
    }

    fn on_data(
        &self,
        remote: &EndpointId,
        instance: Uuid,
        bytes: &[u8],
        replies: &mpsc::UnboundedSender<Vec<u8>>,
        assembler: &Mutex<Assembler>,
    ) {
        self.touch(remote, instance);
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %remote, "Dropping undecodable message: {err}");
                return;
            }
        };

        match message {
            Message::ChunkAck {
                file_name,
                chunk_index,
            } => {
                let key = TransferKey::new(file_name, remote.clone());
                self.registry.record_chunk_ack(&key, chunk_index);
            }
            Message::FileAck { file_name, status } => {
                let key = TransferKey::new(file_name, remote.clone());
                let resolved = match status {
                    AckStatus::Complete => self.registry.complete(&key),
                    AckStatus::Incomplete => self
                        .registry
                        .fail(&key, "receiver reported the file incomplete"),
                };
                if !resolved {
                    debug!(
                        transfer = %key,
                        %status,
                        "file-ack for unknown transfer"
                    );
                }
            }
            message => {
                let (outcome, files) = {
                    let mut assembler = lock(assembler);
                    let outcome = assembler.handle(message, Instant::now());
                    (outcome, assembler.snapshot())
                };
                for reply in &outcome.replies {
                    match reply.encode() {
                        Ok(bytes) => {
                            let _ = replies.send(bytes);
                        }
                        Err(err) => {
                            error!(
                                peer = %remote,
                                "Failed to encode reply: {err}"
                            )
                        }
                    }
                }
                self.notify_receiving(ReceivingEvent {
                    peer: remote.clone(),
                    files,
                });
                if let Some(file) = outcome.completed {
                    self.notify_received(ReceivedEvent {
                        peer: remote.clone(),
                        file,
                    });
                }
            }
        }
    }

    fn touch(&self, remote: &EndpointId, instance: Uuid) {
        if let Some(record) = self
            .channels_mut()
            .get_mut(remote)
            .filter(|record| record.instance == instance)
        {
            record.last_activity = Utc::now();
        }
    }

    fn sweep(&self, remote: &EndpointId, assembler: &Mutex<Assembler>) {
        let (evicted, files) = {
            let mut assembler = lock(assembler);
            let evicted = assembler.evict_stale(Instant::now());
            (evicted, assembler.snapshot())
        };
        if !evicted.is_empty() {
            info!(peer = %remote, ?evicted, "Dropped stale incoming files");
            self.notify_receiving(ReceivingEvent {
                peer: remote.clone(),
                files,
            });
        }
    }

    /// Removes the channel `instance` to `remote` and fails its transfers.
    /// Does nothing when that channel is already gone or was replaced.
    fn teardown(
        &self,
        remote: &EndpointId,
        instance: Uuid,
        reason: &str,
    ) -> bool {
        let record = {
            let mut channels = self.channels_mut();
            match channels.get(remote) {
                Some(record) if record.instance == instance => {}
                _ => return false,
            }
            channels.remove(remote)
        };
        let Some(record) = record else {
            return false;
        };
        self.release(remote, record, reason);
        true
    }

    /// Closes a channel record already removed from the map.
    fn release(
        &self,
        remote: &EndpointId,
        record: ChannelRecord,
        reason: &str,
    ) {
        info!(
            peer = %remote,
            channel = %record.instance,
            reason,
            "Channel closed"
        );
        record.handle.mark_closed();
        record.link.close();
        for task in &record.tasks {
            task.abort();
        }

        let failed = self.registry.fail_peer(remote, reason);
        if failed > 0 {
            warn!(peer = %remote, failed, "Failed in-flight transfers");
        }
        self.notify_peers();
        if !lock(&record.assembler).is_empty() {
            self.notify_receiving(ReceivingEvent {
                peer: remote.clone(),
                files: Vec::new(),
            });
        }
    }

    fn close_all(&self, reason: &str) {
        let open: Vec<(EndpointId, Uuid)> = self
            .channels()
            .iter()
            .map(|(peer, record)| (peer.clone(), record.instance))
            .collect();
        for (peer, instance) in open {
            self.teardown(&peer, instance, reason);
        }
        let failed = self.registry.fail_all(reason);
        if failed > 0 {
            warn!(failed, "Failed remaining transfers");
        }
    }

    async fn notice_loop(self: Arc<Self>) {
        while let Some(notice) = self.transport.next_notice().await {
            let issue = ConnectionIssue::from(&notice);
            warn!(%issue, "Broker notice");
            self.set_connection_error(issue.clone());

            match notice {
                BrokerNotice::Disconnected => {
                    if let Err(err) = self.transport.reconnect().await {
                        error!("Reconnecting to broker failed: {err}");
                        self.set_connection_error(ConnectionIssue {
                            kind: IssueKind::Server,
                            peer: None,
                            detail: err.to_string(),
                        });
                        self.close_all("lost connection to the broker");
                    } else {
                        info!("Reconnected to broker");
                    }
                }
                BrokerNotice::Network(_) | BrokerNotice::Server(_) => {
                    self.close_all(&issue.detail);
                }
                BrokerNotice::PeerUnavailable(_) => {}
            }
        }
        debug!(id = %self.local_id, "Notice loop ended");
    }

    fn set_connection_error(&self, issue: ConnectionIssue) {
        *self
            .connection_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(issue.clone());
        for subscriber in self.subscribers() {
            subscriber.notify_connection_issue(issue.clone());
        }
    }

    fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .channels()
            .iter()
            .map(|(id, record)| PeerInfo {
                id: id.clone(),
                connected_at: record.connected_at,
                last_activity: record.last_activity,
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn subscribers(&self) -> Vec<Arc<dyn SupervisorSubscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn notify_peers(&self) {
        let subscribers = self.subscribers();
        if subscribers.is_empty() {
            return;
        }
        let event = PeersEvent {
            peers: self.peers(),
        };
        for subscriber in subscribers {
            subscriber.notify_peers(event.clone());
        }
    }

    fn notify_receiving(&self, event: ReceivingEvent) {
        for subscriber in self.subscribers() {
            subscriber.notify_receiving(event.clone());
        }
    }

    fn notify_received(&self, event: ReceivedEvent) {
        for subscriber in self.subscribers() {
            subscriber.notify_received(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalBroker, LocalTransport};

    fn id(s: &str) -> EndpointId {
        s.parse().unwrap()
    }

    async fn endpoint(
        broker: &LocalBroker,
        s: &str,
    ) -> Supervisor<LocalTransport> {
        let transport = broker.transport();
        transport.register(&id(s)).await.unwrap();
        Supervisor::attach(transport, id(s), SupervisorConfig::default())
    }

    #[tokio::test]
    async fn wiring_twice_is_a_no_op() {
        let broker = LocalBroker::new();
        let a = endpoint(&broker, "AAAA").await;
        let _b = endpoint(&broker, "BBBB").await;
        a.connect(&id("BBBB")).await.unwrap();

        let instance = a.inner.instance_of(&id("BBBB")).unwrap();
        assert!(!a.inner.wire(&id("BBBB"), instance));
        assert!(!a.inner.wire(&id("BBBB"), Uuid::new_v4()));
        let channels = a.inner.channels();
        let record = channels.get(&id("BBBB")).unwrap();
        assert!(record.wired);
        assert_eq!(record.tasks.len(), 2);
    }

    #[tokio::test]
    async fn lower_id_dial_wins_simultaneous_connect() {
        let broker = LocalBroker::new();
        let a = endpoint(&broker, "AAAA").await;
        let b = endpoint(&broker, "BBBB").await;

        lock(&a.inner.pending).insert(id("BBBB"));
        lock(&b.inner.pending).insert(id("AAAA"));

        assert!(a.inner.check_inbound(&id("BBBB")).is_err());
        assert!(b.inner.check_inbound(&id("AAAA")).is_ok());
    }

    #[tokio::test]
    async fn both_ends_keep_the_link_dialled_by_the_lower_id() {
        let broker = LocalBroker::new();
        let a = endpoint(&broker, "AAAA").await;
        let b = endpoint(&broker, "BBBB").await;

        // AAAA's own dial beats an inbound link from BBBB, and vice versa.
        assert!(!a.inner.prefers_new(&id("BBBB"), true, false));
        assert!(a.inner.prefers_new(&id("BBBB"), false, true));
        assert!(b.inner.prefers_new(&id("AAAA"), true, false));
        assert!(!b.inner.prefers_new(&id("AAAA"), false, true));
        // Same dialling side: the existing channel stays.
        assert!(!a.inner.prefers_new(&id("BBBB"), true, true));
        assert!(!b.inner.prefers_new(&id("AAAA"), false, false));
    }

    #[tokio::test]
    async fn pending_dial_is_released_on_drop() {
        let pending = Mutex::new(HashSet::new());
        {
            let _claim = PendingDial::claim(&pending, &id("CCCC")).unwrap();
            assert!(matches!(
                PendingDial::claim(&pending, &id("CCCC")),
                Err(ConnectError::AlreadyConnecting(_))
            ));
        }
        assert!(lock(&pending).is_empty());
    }

    #[tokio::test]
    async fn stale_teardown_leaves_new_channel() {
        let broker = LocalBroker::new();
        let a = endpoint(&broker, "AAAA").await;
        let _b = endpoint(&broker, "BBBB").await;
        a.connect(&id("BBBB")).await.unwrap();

        assert!(!a.inner.teardown(&id("BBBB"), Uuid::new_v4(), "stale"));
        assert!(a.is_connected(&id("BBBB")));
    }
}
