// extensions/mod.rs
//
// Async layer over the event bus and timers.
// Enabled by the `async` feature; the core works without it through plain
// callbacks and connections.

pub mod scheduler;
pub mod wait;
pub mod stream;
pub mod group;

pub use scheduler::{cancellable, frames, next_frame, next_physics_frame, CancelHandle, Coroutines};
pub use wait::{sleep, SignalFuture, Sleep, TimedWait};
pub use stream::SignalStream;
pub use group::{wait_any, TaskGroup, TaskOutcome};
