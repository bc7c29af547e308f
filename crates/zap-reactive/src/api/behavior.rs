use std::any::Any;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::api::host::{BusHandle, TimerHandle};
use crate::api::types::NodeId;
use crate::core::bus::SignalBus;
use crate::core::engine::register_node;
use crate::core::timers::TimerQueue;
use crate::core::tree::NodeTree;
use crate::error::HostError;

/// Configuration for the reference host loop.
/// Loadable from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed physics step in seconds (default: 1/60).
    pub physics_dt: f64,
    /// Physics steps allowed per frame before the backlog is dropped (default: 10).
    pub max_physics_steps: u32,
    /// Multiplier applied to real frame time (default: 1.0).
    pub time_scale: f64,
    /// Start with processing paused (default: false).
    pub paused: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            physics_dt: 1.0 / 60.0,
            max_physics_steps: 10,
            time_scale: 1.0,
            paused: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Script-like component attached to a node.
///
/// The engine calls `ready` once before the first tick after attaching
/// (configure node refs there), `physics_process` per physics step and
/// `process` per frame. A behavior owning tracked cells resets them at
/// the end of `process`, after reacting to their changes.
pub trait Behavior: 'static {
    fn ready(&mut self, _ctx: &mut Context<'_>) {}

    fn process(&mut self, _ctx: &mut Context<'_>, _delta: f64) {}

    fn physics_process(&mut self, _ctx: &mut Context<'_>, _delta: f64) {}

    /// Called when the node is about to be freed.
    fn exit_tree(&mut self, _ctx: &mut Context<'_>) {}
}

/// Structural changes requested by behaviors, applied by the engine once
/// the current pass is over.
pub(crate) enum Command {
    Free(NodeId),
    Attach(NodeId, Box<dyn Behavior>),
}

/// Access to host state handed to behavior callbacks.
pub struct Context<'a> {
    pub tree: &'a mut NodeTree,
    pub(crate) node: NodeId,
    pub(crate) bus: &'a Rc<SignalBus>,
    pub(crate) timers: &'a Rc<TimerQueue>,
    pub(crate) commands: &'a mut Vec<Command>,
    #[cfg(feature = "async")]
    pub(crate) spawner: &'a futures::executor::LocalSpawner,
}

impl Context<'_> {
    /// The node this behavior is attached to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn bus(&self) -> &SignalBus {
        self.bus
    }

    pub fn bus_handle(&self) -> BusHandle {
        self.bus.clone()
    }

    pub fn timers(&self) -> TimerHandle {
        self.timers.clone()
    }

    /// Add a node and register it as a signal source.
    pub fn add_node<T: Any>(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        data: T,
    ) -> Result<NodeId, HostError> {
        let id = self.tree.add_child(parent, name, data)?;
        register_node(self.bus, id);
        Ok(id)
    }

    /// Free `id` and its subtree once the current pass completes.
    pub fn queue_free(&mut self, id: NodeId) {
        self.commands.push(Command::Free(id));
    }

    /// Attach a behavior; its `ready` runs at the start of the next tick.
    pub fn attach(&mut self, node: NodeId, behavior: impl Behavior) {
        self.commands.push(Command::Attach(node, Box::new(behavior)));
    }

    /// Spawn a coroutine on the engine's executor.
    #[cfg(feature = "async")]
    pub fn spawn<F>(&self, future: F) -> Result<(), futures::task::SpawnError>
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        use futures::task::LocalSpawnExt;
        self.spawner.spawn_local(future)
    }
}
