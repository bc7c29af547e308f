pub mod types;
pub mod args;
pub mod host;
pub mod behavior;

pub use types::{ConnectFlags, ConnectionId, NodeId, NodeLookup, ObjectId, TimerId};
pub use args::{SignalArgs, Variant};
pub use host::{BusHandle, EventBus, Handler, NodeNamespace, TimerHandle, TimerService};
pub use behavior::{Behavior, Context, EngineConfig};
