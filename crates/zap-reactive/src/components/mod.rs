pub mod tracked;
pub mod node_ref;
pub mod signal;
pub mod shared;

pub use tracked::ChangeTracked;
pub use node_ref::{AnyNode, Node, NodeRef};
pub use signal::{Connection, Signal};
pub use shared::SharedBox;
