//! Helpers shared by the supervisor integration tests.

#![allow(dead_code)]

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use zap_core::{
    ConnectionIssue, EndpointId, LocalBroker, LocalTransport, PeersEvent,
    ProgressSink, ReceivedEvent, ReceivingEvent, Supervisor, SupervisorConfig,
    SupervisorSubscriber, Transport, TransferStatus, TransferUpdate,
};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Initialise a tracing subscriber for tests. Respects `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn id(s: &str) -> EndpointId {
    s.parse().unwrap()
}

/// A supervisor registered under a fixed id.
pub async fn endpoint(
    broker: &LocalBroker,
    s: &str,
    config: SupervisorConfig,
) -> Supervisor<LocalTransport> {
    let transport = broker.transport();
    transport.register(&id(s)).await.unwrap();
    Supervisor::attach(transport, id(s), config)
}

/// Polls `check` until it holds or the wait times out.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(WAIT_TIMEOUT, future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Records every progress update it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    updates: Arc<Mutex<Vec<TransferUpdate>>>,
}

impl Recorder {
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        let updates = self.updates.clone();
        Arc::new(move |update: TransferUpdate| {
            updates.lock().unwrap().push(update);
        })
    }

    pub fn updates(&self) -> Vec<TransferUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn for_file(&self, name: &str) -> Vec<TransferUpdate> {
        self.updates()
            .into_iter()
            .filter(|update| update.file_name == name)
            .collect()
    }

    pub fn terminal(&self, name: &str) -> Vec<TransferUpdate> {
        self.for_file(name)
            .into_iter()
            .filter(|update| update.status.is_terminal())
            .collect()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        !self.terminal(name).is_empty()
    }

    pub fn assert_monotonic(&self, name: &str) {
        let updates = self.for_file(name);
        for pair in updates.windows(2) {
            assert!(
                pair[0].progress <= pair[1].progress,
                "progress went backwards: {:?}",
                updates
            );
        }
    }

    pub fn final_status(&self, name: &str) -> Option<TransferStatus> {
        self.terminal(name).last().map(|update| update.status)
    }
}

/// Collects supervisor events.
#[derive(Default)]
pub struct CollectingSubscriber {
    pub peers: Mutex<Vec<PeersEvent>>,
    pub receiving: Mutex<Vec<ReceivingEvent>>,
    pub received: Mutex<Vec<ReceivedEvent>>,
    pub issues: Mutex<Vec<ConnectionIssue>>,
}

impl SupervisorSubscriber for CollectingSubscriber {
    fn get_id(&self) -> String {
        "collector".to_string()
    }

    fn notify_peers(&self, event: PeersEvent) {
        self.peers.lock().unwrap().push(event);
    }

    fn notify_receiving(&self, event: ReceivingEvent) {
        self.receiving.lock().unwrap().push(event);
    }

    fn notify_received(&self, event: ReceivedEvent) {
        self.received.lock().unwrap().push(event);
    }

    fn notify_connection_issue(&self, issue: ConnectionIssue) {
        self.issues.lock().unwrap().push(issue);
    }
}
