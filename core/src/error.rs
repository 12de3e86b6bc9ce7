use crate::grid::TopologyError;
use crate::protocol::ParseError;
use crate::wire::WireError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] WireError),
    #[error("malformed control message: {0}")]
    MalformedText(#[from] ParseError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("request rejected: {0}")]
    RequestRejected(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error(transparent)]
    Topology(#[from] TopologyError),
}
