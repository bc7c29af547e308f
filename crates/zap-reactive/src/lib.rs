pub mod api;
pub mod core;
pub mod components;
pub mod error;
#[cfg(feature = "async")]
pub mod extensions;

// Re-export key types at crate root for convenience
pub use api::types::{ConnectFlags, ConnectionId, NodeId, NodeLookup, ObjectId, TimerId};
pub use api::args::{SignalArgs, Variant};
pub use api::host::{BusHandle, EventBus, NodeNamespace, TimerHandle, TimerService};
pub use api::behavior::{Behavior, Context, EngineConfig};
pub use components::tracked::ChangeTracked;
pub use components::node_ref::{AnyNode, Node, NodeRef};
pub use components::signal::{Connection, Signal};
pub use components::shared::SharedBox;
pub use crate::core::engine::{Engine, CLOCK_OBJECT, PHYSICS_FRAME, PROCESS_FRAME, TREE_EXITING};
pub use crate::core::tree::NodeTree;
pub use crate::core::bus::SignalBus;
pub use crate::core::timers::TimerQueue;
pub use crate::core::time::{FixedTimestep, FrameClock, FrameTiming};
pub use error::{AwaitError, HostError};

// Extensions: async awaitables, enabled by the `async` feature
#[cfg(feature = "async")]
pub use extensions::{
    cancellable, frames, next_frame, next_physics_frame, sleep, wait_any,
    CancelHandle, Coroutines, SignalFuture, SignalStream, Sleep, TaskGroup, TaskOutcome, TimedWait,
};
