use std::any::Any;
use std::rc::Rc;

use crate::api::behavior::{Behavior, Command, Context, EngineConfig};
use crate::api::host::{BusHandle, TimerHandle};
use crate::api::types::{NodeId, ObjectId};
use crate::components::signal::Signal;
use crate::core::bus::SignalBus;
use crate::core::time::{FrameClock, FrameTiming};
use crate::core::timers::TimerQueue;
use crate::core::tree::NodeTree;
use crate::error::HostError;
#[cfg(feature = "async")]
use crate::extensions::scheduler::{CancelHandle, Coroutines};

/// Bus object carrying the per-frame tick signals.
pub const CLOCK_OBJECT: ObjectId = ObjectId(u64::MAX);

/// Emitted on [`CLOCK_OBJECT`] once per frame with the scaled delta.
pub const PROCESS_FRAME: Signal<(f64,)> = Signal::new("process_frame");

/// Emitted on [`CLOCK_OBJECT`] once per physics step with the fixed delta.
pub const PHYSICS_FRAME: Signal<(f64,)> = Signal::new("physics_frame");

/// Emitted on a node right before it is freed.
pub const TREE_EXITING: Signal<()> = Signal::new("tree_exiting");

/// Make a node a signal source with the standard node signals declared.
pub(crate) fn register_node(bus: &SignalBus, id: NodeId) {
    let object = ObjectId::from(id);
    bus.register_object(object);
    bus.add_signal(object, TREE_EXITING.name());
}

struct Attached {
    node: NodeId,
    behavior: Box<dyn Behavior>,
    ready: bool,
}

/// Reference host: owns the node tree, event bus, timers and frame clock,
/// and drives attached behaviors and coroutines once per `tick`.
pub struct Engine {
    config: EngineConfig,
    tree: NodeTree,
    bus: Rc<SignalBus>,
    handle: BusHandle,
    timers: Rc<TimerQueue>,
    clock: FrameClock,
    behaviors: Vec<Attached>,
    commands: Vec<Command>,
    #[cfg(feature = "async")]
    coroutines: Coroutines,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let tree = NodeTree::new();
        let bus = Rc::new(SignalBus::new());
        register_node(&bus, tree.root());
        bus.add_signal(CLOCK_OBJECT, PROCESS_FRAME.name());
        bus.add_signal(CLOCK_OBJECT, PHYSICS_FRAME.name());

        let mut clock = FrameClock::new(config.physics_dt, config.max_physics_steps);
        clock.set_time_scale(config.time_scale);
        clock.set_paused(config.paused);

        Self {
            config,
            tree,
            handle: bus.clone(),
            bus,
            timers: Rc::new(TimerQueue::new()),
            clock,
            behaviors: Vec::new(),
            commands: Vec::new(),
            #[cfg(feature = "async")]
            coroutines: Coroutines::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn bus(&self) -> &Rc<SignalBus> {
        &self.bus
    }

    pub fn bus_handle(&self) -> BusHandle {
        Rc::clone(&self.handle)
    }

    pub fn timers(&self) -> &Rc<TimerQueue> {
        &self.timers
    }

    pub fn timer_handle(&self) -> TimerHandle {
        self.timers.clone()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.clock.set_paused(paused);
    }

    pub fn set_time_scale(&mut self, scale: f64) {
        self.clock.set_time_scale(scale);
    }

    /// Add a node and register it as a signal source.
    pub fn add_node<T: Any>(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        data: T,
    ) -> Result<NodeId, HostError> {
        let id = self.tree.add_child(parent, name, data)?;
        register_node(&self.bus, id);
        Ok(id)
    }

    /// Attach a behavior to a node. Its `ready` runs at the start of the next tick.
    pub fn attach(&mut self, node: NodeId, behavior: impl Behavior) -> Result<(), HostError> {
        self.attach_boxed(node, Box::new(behavior))
    }

    fn attach_boxed(&mut self, node: NodeId, behavior: Box<dyn Behavior>) -> Result<(), HostError> {
        if !self.tree.contains(node) {
            return Err(HostError::InvalidObject(node.into()));
        }
        self.behaviors.push(Attached {
            node,
            behavior,
            ready: false,
        });
        Ok(())
    }

    /// Free a node and its subtree right away: emits `tree_exiting` on each
    /// node (children first), runs `exit_tree` on their behaviors, drops
    /// their bus registrations and removes them from the tree.
    pub fn free_node(&mut self, id: NodeId) {
        if id == self.tree.root() || !self.tree.contains(id) {
            return;
        }
        let doomed = self.tree.subtree(id);
        for &node in &doomed {
            if let Err(err) = TREE_EXITING.emit(&self.handle, node.into(), ()) {
                log::error!("tree_exiting on {node}: {err}");
            }
        }

        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.behaviors)
            .into_iter()
            .partition(|a| doomed.contains(&a.node));
        self.behaviors = kept;
        for mut attached in gone {
            if attached.ready {
                let mut ctx = self.context(attached.node);
                attached.behavior.exit_tree(&mut ctx);
            }
        }

        for &node in &doomed {
            self.bus.free_object(node.into());
        }
        self.tree.free(id);
        self.pump();
    }

    /// Spawn a coroutine, polled during every tick.
    #[cfg(feature = "async")]
    pub fn spawn<F>(&self, future: F) -> Result<(), futures::task::SpawnError>
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        self.coroutines.spawn(future)
    }

    #[cfg(feature = "async")]
    pub fn spawn_cancellable<F>(&self, future: F) -> Result<CancelHandle, futures::task::SpawnError>
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        self.coroutines.spawn_cancellable(future)
    }

    /// Poll coroutines until none can make progress.
    pub fn pump(&mut self) {
        #[cfg(feature = "async")]
        self.coroutines.run_until_stalled();
    }

    /// Run one host frame of `real_dt` seconds.
    pub fn tick(&mut self, real_dt: f64) -> FrameTiming {
        self.apply_commands();
        self.ready_pending();

        let timing = self.clock.advance(real_dt);
        if !self.clock.is_paused() {
            let physics_dt = timing.physics_dt;
            for _ in 0..timing.physics_steps {
                self.run_behaviors(|behavior, ctx| behavior.physics_process(ctx, physics_dt));
                self.emit_clock(&PHYSICS_FRAME, physics_dt);
            }

            let delta = timing.delta;
            self.run_behaviors(|behavior, ctx| behavior.process(ctx, delta));
            self.emit_clock(&PROCESS_FRAME, delta);
        }

        self.timers.advance(timing.delta);
        self.pump();
        self.bus.flush_deferred();
        self.pump();
        self.apply_commands();
        timing
    }

    fn emit_clock(&mut self, signal: &Signal<(f64,)>, delta: f64) {
        if let Err(err) = signal.emit(&self.handle, CLOCK_OBJECT, (delta,)) {
            log::error!("{}: {err}", signal.name());
        }
        self.pump();
    }

    fn context(&mut self, node: NodeId) -> Context<'_> {
        Context {
            tree: &mut self.tree,
            node,
            bus: &self.bus,
            timers: &self.timers,
            commands: &mut self.commands,
            #[cfg(feature = "async")]
            spawner: self.coroutines.spawner(),
        }
    }

    fn run_behaviors(&mut self, mut f: impl FnMut(&mut dyn Behavior, &mut Context<'_>)) {
        let mut behaviors = std::mem::take(&mut self.behaviors);
        for attached in behaviors.iter_mut().filter(|a| a.ready) {
            let mut ctx = self.context(attached.node);
            f(attached.behavior.as_mut(), &mut ctx);
        }
        behaviors.append(&mut self.behaviors);
        self.behaviors = behaviors;
    }

    fn ready_pending(&mut self) {
        let mut behaviors = std::mem::take(&mut self.behaviors);
        for attached in behaviors.iter_mut().filter(|a| !a.ready) {
            attached.ready = true;
            let mut ctx = self.context(attached.node);
            attached.behavior.ready(&mut ctx);
        }
        behaviors.append(&mut self.behaviors);
        self.behaviors = behaviors;
    }

    fn apply_commands(&mut self) {
        while !self.commands.is_empty() {
            for command in std::mem::take(&mut self.commands) {
                match command {
                    Command::Free(id) => self.free_node(id),
                    Command::Attach(node, behavior) => {
                        if let Err(err) = self.attach_boxed(node, behavior) {
                            log::warn!("dropping behavior: {err}");
                        }
                    }
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
