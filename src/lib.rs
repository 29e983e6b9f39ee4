//! Peer connections and chunked file transfer for Zap.
//!
//! A [`Supervisor`] owns one endpoint: it claims a short [`EndpointId`] at
//! the broker, keeps at most one channel per remote endpoint, streams files
//! over those channels and reassembles the files peers send back.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zap_core::{
//!     File, LocalBroker, Supervisor, SupervisorConfig, TransferUpdate,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = LocalBroker::new();
//! let config = SupervisorConfig::default();
//! let alice = Supervisor::start(broker.transport(), config.clone()).await?;
//! let bob = Supervisor::start(broker.transport(), config).await?;
//!
//! alice.connect_with_timeout(bob.local_id()).await?;
//! let file = File::from_bytes("notes.txt", b"hello".to_vec());
//! alice
//!     .send_file(
//!         bob.local_id(),
//!         &file,
//!         Arc::new(|update: TransferUpdate| {
//!             println!("{} {:.0}%", update.status, update.progress)
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod identity;
mod local;
mod supervisor;
mod transport;

pub use config::SupervisorConfig;
pub use error::{ConnectError, ConnectionIssue, IssueKind};
pub use identity::IdentityAllocator;
pub use local::{DEFAULT_LINK_CAPACITY, LocalBroker, LocalTransport};
pub use supervisor::{
    ChannelHandle, PeerInfo, PeersEvent, ReceivedEvent, ReceivingEvent,
    Supervisor, SupervisorSubscriber,
};
pub use transport::{
    BrokerNotice, LinkEvent, LinkWriter, PeerLink, Transport, TransportError,
};

pub use zap_entities::{Data, EndpointId, File, InMemoryData, InvalidEndpointId};
pub use zapx_common::{AckStatus, CHUNK_SIZE, Message, MessageSink};
pub use zapx_receiver::{AssembledFile, IncomingSnapshot, ReceiverConfig};
pub use zapx_sender::{
    ProgressSink, SenderConfig, TransferError, TransferKey, TransferSnapshot,
    TransferStatus, TransferUpdate,
};
