use thiserror::Error;

use crate::api::types::{ConnectionId, NodeId, ObjectId};

/// Status codes reported by the host capabilities (bus, node tree).
/// Components pass these through to their caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("object {0} does not exist")]
    InvalidObject(ObjectId),

    #[error("object {object} has no signal named '{signal}'")]
    UnknownSignal { object: ObjectId, signal: String },

    #[error("connection {connection} is not registered on '{signal}'")]
    NotConnected {
        signal: String,
        connection: ConnectionId,
    },

    #[error("node {parent} already has a child named '{name}'")]
    DuplicateName { parent: NodeId, name: String },

    #[error("invalid signal arguments: {0}")]
    InvalidArguments(String),
}

/// Failure outcomes of the timeout/cancellation aware awaits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AwaitError {
    #[error("timed out before the signal fired")]
    Timeout,

    #[error("signal source went away before firing")]
    Disconnected,

    #[error("awaiting task was cancelled")]
    Cancelled,
}
