use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a node in the host's node tree.
/// `(index, generation)`: a freed slot bumps its generation, so stale
/// handles resolve to "not found" instead of aliasing a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Identifier of anything able to host named signals on the event bus.
/// Every node is an object; the engine also reserves a few non-node objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl From<NodeId> for ObjectId {
    fn from(id: NodeId) -> Self {
        ObjectId(((id.generation as u64) << 32) | id.index as u64)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Opaque registration token handed out by the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Opaque handle to a scheduled host timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Native connection flags understood by the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectFlags {
    /// Remove the registration after its first firing.
    pub one_shot: bool,
    /// Run the handler at end of frame instead of at emission time.
    pub deferred: bool,
}

impl ConnectFlags {
    pub const NONE: ConnectFlags = ConnectFlags {
        one_shot: false,
        deferred: false,
    };

    pub const ONE_SHOT: ConnectFlags = ConnectFlags {
        one_shot: true,
        deferred: false,
    };

    pub const DEFERRED: ConnectFlags = ConnectFlags {
        one_shot: false,
        deferred: true,
    };

    pub fn with_one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn with_deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

/// How a node reference finds its target, relative to an owner node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeLookup {
    /// Relative (or `/`-absolute) path in the node tree.
    Path(String),
    /// Scene-unique name (the `%Name` mechanism).
    UniqueName(String),
    /// First member of a named group.
    Group(String),
}

impl fmt::Display for NodeLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLookup::Path(path) => write!(f, "path '{path}'"),
            NodeLookup::UniqueName(name) => write!(f, "unique '%{name}'"),
            NodeLookup::Group(group) => write!(f, "group '{group}'"),
        }
    }
}
