use chrono::{DateTime, Utc};
use zap_entities::EndpointId;
use zapx_receiver::{AssembledFile, IncomingSnapshot};

use crate::ConnectionIssue;

pub trait SupervisorSubscriber: Send + Sync {
    fn get_id(&self) -> String;
    fn notify_peers(&self, event: PeersEvent);
    fn notify_receiving(&self, event: ReceivingEvent);
    fn notify_received(&self, event: ReceivedEvent);
    fn notify_connection_issue(&self, issue: ConnectionIssue);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: EndpointId,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// The full peer list after a channel opened or closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeersEvent {
    pub peers: Vec<PeerInfo>,
}

/// Files still being received from one peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivingEvent {
    pub peer: EndpointId,
    pub files: Vec<IncomingSnapshot>,
}

#[derive(Clone, Debug)]
pub struct ReceivedEvent {
    pub peer: EndpointId,
    pub file: AssembledFile,
}
