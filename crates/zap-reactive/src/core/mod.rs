pub mod tree;
pub mod bus;
pub mod timers;
pub mod time;
pub mod engine;

pub use tree::NodeTree;
pub use bus::SignalBus;
pub use timers::TimerQueue;
pub use time::{FixedTimestep, FrameClock, FrameTiming};
pub use engine::{Engine, CLOCK_OBJECT, PHYSICS_FRAME, PROCESS_FRAME, TREE_EXITING};
