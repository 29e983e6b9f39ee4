mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use common::{
    CollectingSubscriber, Recorder, endpoint, eventually, id, init_test_tracing,
};
use rstest::rstest;
use zap_core::{
    BrokerNotice, CHUNK_SIZE, File, IssueKind, LocalBroker, ProgressSink,
    SupervisorConfig, TransferStatus, TransferUpdate,
};

#[tokio::test]
async fn broker_disconnect_is_transient() {
    init_test_tracing();
    let broker = LocalBroker::new();
    let a = endpoint(&broker, "AAAA", SupervisorConfig::default()).await;
    let b = endpoint(&broker, "BBBB", SupervisorConfig::default()).await;
    let subscriber = Arc::new(CollectingSubscriber::default());
    a.subscribe(subscriber.clone());
    a.connect(b.local_id()).await.unwrap();

    assert!(broker.notify(&id("AAAA"), BrokerNotice::Disconnected));
    eventually("disconnect issue", || a.connection_error().is_some()).await;

    let issue = a.connection_error().unwrap();
    assert_eq!(issue.kind, IssueKind::Disconnected);
    assert!(issue.is_transient());
    assert!(
        subscriber
            .issues
            .lock()
            .unwrap()
            .iter()
            .any(|issue| issue.kind == IssueKind::Disconnected)
    );
    assert!(broker.is_registered(&id("AAAA")));
    assert!(a.is_connected(b.local_id()));

    // Channels keep working while the broker link recovers.
    let recorder = Recorder::default();
    let file = File::from_bytes("after.txt", b"still here".to_vec());
    a.send_file(b.local_id(), &file, recorder.sink()).await.unwrap();
    eventually("file-ack", || recorder.is_resolved("after.txt")).await;
    assert_eq!(
        recorder.final_status("after.txt"),
        Some(TransferStatus::Complete)
    );
}

#[rstest]
#[case::network(
    BrokerNotice::Network("interface down".into()),
    IssueKind::Network
)]
#[case::server(
    BrokerNotice::Server("broker restarting".into()),
    IssueKind::Server
)]
#[tokio::test]
async fn fatal_notice_closes_every_channel(
    #[case] notice: BrokerNotice,
    #[case] kind: IssueKind,
) {
    init_test_tracing();
    let broker = LocalBroker::new();
    let a = endpoint(&broker, "AAAA", SupervisorConfig::default()).await;
    let b = endpoint(&broker, "BBBB", SupervisorConfig::default()).await;
    let c = endpoint(&broker, "CCCC", SupervisorConfig::default()).await;
    a.connect(b.local_id()).await.unwrap();
    a.connect(c.local_id()).await.unwrap();
    assert_eq!(a.peers().len(), 2);

    assert!(broker.notify(&id("AAAA"), notice));

    eventually("channels closed", || a.peers().is_empty()).await;
    let issue = a.connection_error().unwrap();
    assert_eq!(issue.kind, kind);
    assert!(!issue.is_transient());
    assert!(!issue.user_message().is_empty());
    eventually("remote ends closed", || {
        !b.is_connected(a.local_id()) && !c.is_connected(a.local_id())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn network_loss_fails_in_flight_transfer() {
    init_test_tracing();
    let broker = LocalBroker::new();
    let a = endpoint(&broker, "AAAA", SupervisorConfig::default()).await;
    let b = endpoint(&broker, "BBBB", SupervisorConfig::default()).await;
    a.connect(b.local_id()).await.unwrap();

    let recorder = Recorder::default();
    let fired = Arc::new(AtomicBool::new(false));
    let sink = {
        let inner = recorder.sink();
        let broker = broker.clone();
        let sender = a.clone();
        let remote = b.local_id().clone();
        Arc::new(move |update: TransferUpdate| {
            let halfway = update.status == TransferStatus::Sending
                && update.progress >= 50.0;
            if halfway && !fired.swap(true, Ordering::SeqCst) {
                let notice = BrokerNotice::Network("gone".into());
                broker.notify(&id("AAAA"), notice);
                // Hold the pump until the supervisor has reacted.
                let deadline = Instant::now() + Duration::from_secs(5);
                while sender.is_connected(&remote)
                    && Instant::now() < deadline
                {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            inner.notify(update);
        })
    };
    let file =
        File::from_bytes("wifi.bin", vec![7u8; 64 * CHUNK_SIZE as usize]);

    let result = a.send_file(b.local_id(), &file, sink).await;

    assert!(result.is_err());
    assert!(!a.is_connected(b.local_id()));
    eventually("error update", || recorder.is_resolved("wifi.bin")).await;
    let terminal = recorder.terminal("wifi.bin");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].status, TransferStatus::Error);
    assert!(a.transfers().is_empty());
}

#[tokio::test]
async fn peer_unavailable_keeps_other_channels() {
    init_test_tracing();
    let broker = LocalBroker::new();
    let a = endpoint(&broker, "AAAA", SupervisorConfig::default()).await;
    let b = endpoint(&broker, "BBBB", SupervisorConfig::default()).await;
    a.connect(b.local_id()).await.unwrap();

    broker.notify(&id("AAAA"), BrokerNotice::PeerUnavailable(id("ZZZZ")));
    eventually("issue recorded", || a.connection_error().is_some()).await;

    let issue = a.clear_connection_error().unwrap();
    assert_eq!(issue.kind, IssueKind::PeerUnavailable);
    assert!(issue.to_string().contains("ZZZZ"));
    assert!(a.is_connected(b.local_id()));
}
