use std::any::TypeId;
use std::rc::Rc;

use crate::api::args::Variant;
use crate::api::types::{ConnectFlags, ConnectionId, NodeId, NodeLookup, ObjectId, TimerId};
use crate::error::HostError;

/// Raw bus callback. Receives the emitted payload as variants.
pub type Handler = Box<dyn FnMut(&[Variant])>;

/// The host's named-event facility.
///
/// All methods take `&self`: handlers run synchronously inside `emit` and
/// may call back into the bus (connect, disconnect, emit again).
pub trait EventBus {
    /// Register `handler` for `signal` on `source`.
    fn connect(
        &self,
        source: ObjectId,
        signal: &str,
        handler: Handler,
        flags: ConnectFlags,
    ) -> Result<ConnectionId, HostError>;

    /// Remove a registration. Fails with `NotConnected` if it is not live.
    fn disconnect(
        &self,
        source: ObjectId,
        signal: &str,
        connection: ConnectionId,
    ) -> Result<(), HostError>;

    /// Dispatch `signal` to every registration on `source`.
    fn emit(&self, source: ObjectId, signal: &str, args: &[Variant]) -> Result<(), HostError>;

    fn is_connected(&self, source: ObjectId, signal: &str, connection: ConnectionId) -> bool;

    fn has_signal(&self, source: ObjectId, signal: &str) -> bool;

    fn connection_count(&self, source: ObjectId, signal: &str) -> usize;
}

/// Shared handle to the event bus. Connections only keep a weak copy.
pub type BusHandle = Rc<dyn EventBus>;

/// The host's tree-structured node namespace.
pub trait NodeNamespace {
    /// Look up a node relative to `owner`. Misses are `None`.
    fn find(&self, owner: NodeId, lookup: &NodeLookup) -> Option<NodeId>;

    /// Whether `id` still names a live node (generation check).
    fn is_alive(&self, id: NodeId) -> bool;

    /// Whether the node's data is of type `ty`.
    fn is_type(&self, id: NodeId, ty: TypeId) -> bool;
}

/// One-shot notifications after an amount of (scaled) host time.
pub trait TimerService {
    fn schedule(&self, seconds: f64, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancel a pending timer. Returns `false` if it already fired or was cancelled.
    fn cancel(&self, timer: TimerId) -> bool;

    fn is_pending(&self, timer: TimerId) -> bool;
}

pub type TimerHandle = Rc<dyn TimerService>;
