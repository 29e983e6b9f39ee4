use std::{fmt, time::Duration};

use thiserror::Error;
use zap_entities::EndpointId;

use crate::{BrokerNotice, TransportError};

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("cannot connect to own id {0}")]
    SelfConnect(EndpointId),
    #[error("already connected to {0}")]
    AlreadyConnected(EndpointId),
    #[error("a connection to {0} is already being established")]
    AlreadyConnecting(EndpointId),
    #[error("peer {peer} is unreachable: {reason}")]
    Unreachable { peer: EndpointId, reason: String },
    #[error("no answer from {peer} within {}s", .timeout.as_secs_f32())]
    Timeout { peer: EndpointId, timeout: Duration },
    #[error("connection to {0} closed before it opened")]
    Closed(EndpointId),
    #[error("supervisor is shut down")]
    ShutDown,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueKind {
    PeerUnavailable,
    Network,
    Server,
    Disconnected,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::PeerUnavailable => f.write_str("peer-unavailable"),
            IssueKind::Network => f.write_str("network"),
            IssueKind::Server => f.write_str("server-error"),
            IssueKind::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// The current broker-level problem, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionIssue {
    pub kind: IssueKind,
    pub peer: Option<EndpointId>,
    pub detail: String,
}

impl ConnectionIssue {
    /// A transient issue is recovered by reconnecting to the broker and does
    /// not cancel transfers.
    pub fn is_transient(&self) -> bool {
        self.kind == IssueKind::Disconnected
    }

    pub fn user_message(&self) -> String {
        match (self.kind, &self.peer) {
            (IssueKind::PeerUnavailable, Some(peer)) => format!(
                "Peer {peer} could not be found. Check the ID and make sure \
                 they are online."
            ),
            (IssueKind::PeerUnavailable, None) => {
                "The peer could not be found. Make sure they are online."
                    .to_string()
            }
            (IssueKind::Network, _) => {
                "Network error. Check your internet connection and try again."
                    .to_string()
            }
            (IssueKind::Server, _) => {
                "The connection server is unavailable. Please try again later."
                    .to_string()
            }
            (IssueKind::Disconnected, _) => {
                "Lost connection to the server. Reconnecting...".to_string()
            }
        }
    }
}

impl From<&BrokerNotice> for ConnectionIssue {
    fn from(notice: &BrokerNotice) -> Self {
        match notice {
            BrokerNotice::PeerUnavailable(peer) => Self {
                kind: IssueKind::PeerUnavailable,
                peer: Some(peer.clone()),
                detail: format!("peer {peer} is unavailable"),
            },
            BrokerNotice::Network(detail) => Self {
                kind: IssueKind::Network,
                peer: None,
                detail: detail.clone(),
            },
            BrokerNotice::Server(detail) => Self {
                kind: IssueKind::Server,
                peer: None,
                detail: detail.clone(),
            },
            BrokerNotice::Disconnected => Self {
                kind: IssueKind::Disconnected,
                peer: None,
                detail: "disconnected from broker".to_string(),
            },
        }
    }
}

impl fmt::Display for ConnectionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}
