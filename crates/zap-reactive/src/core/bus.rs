use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::api::args::Variant;
use crate::api::host::{EventBus, Handler};
use crate::api::types::{ConnectFlags, ConnectionId, ObjectId};
use crate::error::HostError;

type SharedHandler = Rc<RefCell<Handler>>;

struct Registration {
    id: ConnectionId,
    flags: ConnectFlags,
    handler: SharedHandler,
}

/// Registrations for one declared signal, in registration order.
#[derive(Default)]
struct SignalSlot {
    registrations: Vec<Registration>,
}

struct DeferredCall {
    source: ObjectId,
    signal: String,
    connection: ConnectionId,
    handler: SharedHandler,
    args: Vec<Variant>,
}

/// Handler picked for invocation by one `emit`.
struct Dispatch {
    connection: ConnectionId,
    handler: SharedHandler,
}

#[derive(Default)]
struct BusState {
    objects: HashMap<ObjectId, HashMap<String, SignalSlot>>,
    deferred: VecDeque<DeferredCall>,
    next_connection: u64,
}

impl BusState {
    fn slot(&self, source: ObjectId, signal: &str) -> Option<&SignalSlot> {
        self.objects.get(&source).and_then(|signals| signals.get(signal))
    }

    fn slot_mut(&mut self, source: ObjectId, signal: &str) -> Result<&mut SignalSlot, HostError> {
        let signals = self
            .objects
            .get_mut(&source)
            .ok_or(HostError::InvalidObject(source))?;
        signals.get_mut(signal).ok_or_else(|| HostError::UnknownSignal {
            object: source,
            signal: signal.to_string(),
        })
    }
}

/// In-process event bus: objects declare named signals, handlers are
/// registered per `(object, signal)` and invoked in registration order.
///
/// The internal state is never borrowed while a handler runs, so handlers
/// may freely connect, disconnect and emit.
#[derive(Default)]
pub struct SignalBus {
    state: RefCell<BusState>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `object` able to host signals. No-op if already registered.
    pub fn register_object(&self, object: ObjectId) {
        self.state.borrow_mut().objects.entry(object).or_default();
    }

    pub fn has_object(&self, object: ObjectId) -> bool {
        self.state.borrow().objects.contains_key(&object)
    }

    /// Declare `signal` on `object`, registering the object if needed.
    pub fn add_signal(&self, object: ObjectId, signal: impl Into<String>) {
        self.state
            .borrow_mut()
            .objects
            .entry(object)
            .or_default()
            .entry(signal.into())
            .or_default();
    }

    /// Drop the object together with every registration and queued
    /// deferred call it sources.
    pub fn free_object(&self, object: ObjectId) {
        // Handlers are dropped after the borrow ends: their captures may
        // run arbitrary `Drop` code.
        let (removed, dropped_calls) = {
            let mut state = self.state.borrow_mut();
            let removed = state.objects.remove(&object);
            let (dropped, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.deferred)
                .into_iter()
                .partition(|call| call.source == object);
            state.deferred = kept;
            (removed, dropped)
        };
        if let Some(signals) = &removed {
            let count: usize = signals.values().map(|s| s.registrations.len()).sum();
            log::debug!("freed {object}: dropped {count} registration(s)");
        }
        drop(removed);
        drop(dropped_calls);
    }

    /// Number of deferred calls waiting for `flush_deferred`.
    pub fn pending_deferred(&self) -> usize {
        self.state.borrow().deferred.len()
    }

    /// Run queued deferred calls in FIFO order, including calls queued by
    /// the handlers being flushed. Returns how many handlers ran.
    pub fn flush_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(call) = self.state.borrow_mut().deferred.pop_front() else {
                break;
            };
            if !self.claim(call.source, &call.signal, call.connection) {
                continue;
            }
            invoke(&call.signal, &call.handler, &call.args);
            ran += 1;
        }
        ran
    }

    /// Check that a registration is still live right before its handler
    /// runs. A one-shot registration leaves the bus here, so it stays
    /// connected (and disconnectable) until it actually fires.
    fn claim(&self, source: ObjectId, signal: &str, connection: ConnectionId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let Ok(slot) = state.slot_mut(source, signal) else {
                return false;
            };
            let Some(index) = slot.registrations.iter().position(|r| r.id == connection) else {
                return false;
            };
            if !slot.registrations[index].flags.one_shot {
                return true;
            }
            slot.registrations.remove(index)
        };
        log::trace!("one-shot {connection} on '{signal}' claimed");
        drop(removed);
        true
    }
}

/// Run one handler, containing panics and skipping re-entrant calls.
fn invoke(signal: &str, handler: &SharedHandler, args: &[Variant]) {
    let Ok(mut handler) = handler.try_borrow_mut() else {
        log::warn!("'{signal}': handler is already running, skipping re-entrant call");
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| (*handler)(args))).is_err() {
        log::error!("'{signal}': handler panicked; continuing dispatch");
    }
}

impl EventBus for SignalBus {
    fn connect(
        &self,
        source: ObjectId,
        signal: &str,
        handler: Handler,
        flags: ConnectFlags,
    ) -> Result<ConnectionId, HostError> {
        let mut state = self.state.borrow_mut();
        state.next_connection += 1;
        let id = ConnectionId(state.next_connection);
        state.slot_mut(source, signal)?.registrations.push(Registration {
            id,
            flags,
            handler: Rc::new(RefCell::new(handler)),
        });
        log::debug!("connected {id} to '{signal}' on {source} ({flags:?})");
        Ok(id)
    }

    fn disconnect(
        &self,
        source: ObjectId,
        signal: &str,
        connection: ConnectionId,
    ) -> Result<(), HostError> {
        let removed = {
            let mut state = self.state.borrow_mut();
            let slot = state.slot_mut(source, signal)?;
            let index = slot
                .registrations
                .iter()
                .position(|r| r.id == connection)
                .ok_or_else(|| HostError::NotConnected {
                    signal: signal.to_string(),
                    connection,
                })?;
            slot.registrations.remove(index)
        };
        log::debug!("disconnected {connection} from '{signal}' on {source}");
        drop(removed);
        Ok(())
    }

    fn emit(&self, source: ObjectId, signal: &str, args: &[Variant]) -> Result<(), HostError> {
        let immediate = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let slot = state.slot_mut(source, signal)?;

            let mut immediate = Vec::new();
            let mut deferred = Vec::new();
            for registration in &slot.registrations {
                let dispatch = Dispatch {
                    connection: registration.id,
                    handler: Rc::clone(&registration.handler),
                };
                if registration.flags.deferred {
                    deferred.push(dispatch);
                } else {
                    immediate.push(dispatch);
                }
            }

            for dispatch in deferred {
                state.deferred.push_back(DeferredCall {
                    source,
                    signal: signal.to_string(),
                    connection: dispatch.connection,
                    handler: dispatch.handler,
                    args: args.to_vec(),
                });
            }
            immediate
        };

        log::trace!("emit '{signal}' on {source}: {} handler(s)", immediate.len());
        for dispatch in immediate {
            if !self.claim(source, signal, dispatch.connection) {
                continue;
            }
            invoke(signal, &dispatch.handler, args);
        }
        Ok(())
    }

    fn is_connected(&self, source: ObjectId, signal: &str, connection: ConnectionId) -> bool {
        self.state
            .borrow()
            .slot(source, signal)
            .is_some_and(|slot| slot.registrations.iter().any(|r| r.id == connection))
    }

    fn has_signal(&self, source: ObjectId, signal: &str) -> bool {
        self.state.borrow().slot(source, signal).is_some()
    }

    fn connection_count(&self, source: ObjectId, signal: &str) -> usize {
        self.state
            .borrow()
            .slot(source, signal)
            .map_or(0, |slot| slot.registrations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const SRC: ObjectId = ObjectId(1);

    fn bus() -> Rc<SignalBus> {
        let bus = Rc::new(SignalBus::new());
        bus.add_signal(SRC, "x");
        bus
    }

    fn counter(bus: &SignalBus, flags: ConnectFlags) -> (Rc<Cell<u32>>, ConnectionId) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = bus
            .connect(SRC, "x", Box::new(move |_: &[Variant]| h.set(h.get() + 1)), flags)
            .unwrap();
        (hits, id)
    }

    #[test]
    fn undeclared_signal_and_object_fail() {
        let bus = bus();
        let err = bus.emit(SRC, "nope", &[]).unwrap_err();
        assert!(matches!(err, HostError::UnknownSignal { .. }));
        let err = bus
            .connect(ObjectId(99), "x", Box::new(|_: &[Variant]| {}), ConnectFlags::NONE)
            .unwrap_err();
        assert_eq!(err, HostError::InvalidObject(ObjectId(99)));
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = bus();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            bus.connect(SRC, "x", Box::new(move |_: &[Variant]| log.borrow_mut().push(tag)), ConnectFlags::NONE)
                .unwrap();
        }
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn one_shot_is_removed_after_first_emit() {
        let bus = bus();
        let (hits, id) = counter(&bus, ConnectFlags::ONE_SHOT);
        bus.emit(SRC, "x", &[]).unwrap();
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(!bus.is_connected(SRC, "x", id));
        assert!(matches!(
            bus.disconnect(SRC, "x", id),
            Err(HostError::NotConnected { .. })
        ));
    }

    #[test]
    fn deferred_runs_on_flush_after_immediate() {
        let bus = bus();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        bus.connect(SRC, "x", Box::new(move |_: &[Variant]| l.borrow_mut().push("deferred")), ConnectFlags::DEFERRED)
            .unwrap();
        let l = Rc::clone(&log);
        bus.connect(SRC, "x", Box::new(move |_: &[Variant]| l.borrow_mut().push("sync")), ConnectFlags::NONE)
            .unwrap();

        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(*log.borrow(), vec!["sync"]);
        assert_eq!(bus.pending_deferred(), 1);
        assert_eq!(bus.flush_deferred(), 1);
        assert_eq!(*log.borrow(), vec!["sync", "deferred"]);
    }

    #[test]
    fn deferred_call_skipped_after_disconnect() {
        let bus = bus();
        let (hits, id) = counter(&bus, ConnectFlags::DEFERRED);
        bus.emit(SRC, "x", &[]).unwrap();
        bus.disconnect(SRC, "x", id).unwrap();
        assert_eq!(bus.flush_deferred(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn deferred_one_shot_stays_connected_until_flush() {
        let bus = bus();
        let (hits, id) = counter(&bus, ConnectFlags::ONE_SHOT.with_deferred());
        bus.emit(SRC, "x", &[]).unwrap();
        bus.emit(SRC, "x", &[]).unwrap();
        assert!(bus.is_connected(SRC, "x", id));
        assert_eq!(bus.pending_deferred(), 2);

        assert_eq!(bus.flush_deferred(), 1);
        assert_eq!(hits.get(), 1);
        assert!(!bus.is_connected(SRC, "x", id));
    }

    #[test]
    fn deferred_one_shot_disconnected_before_flush_never_runs() {
        let bus = bus();
        let (hits, id) = counter(&bus, ConnectFlags::ONE_SHOT.with_deferred());
        bus.emit(SRC, "x", &[]).unwrap();
        bus.disconnect(SRC, "x", id).unwrap();
        assert_eq!(bus.flush_deferred(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn one_shot_disconnected_by_earlier_handler_never_runs() {
        let bus = bus();
        let later: Rc<Cell<Option<ConnectionId>>> = Rc::new(Cell::new(None));
        let b = Rc::clone(&bus);
        let l = Rc::clone(&later);
        bus.connect(
            SRC,
            "x",
            Box::new(move |_: &[Variant]| {
                if let Some(id) = l.take() {
                    b.disconnect(SRC, "x", id).unwrap();
                }
            }),
            ConnectFlags::NONE,
        )
        .unwrap();
        let (hits, id) = counter(&bus, ConnectFlags::ONE_SHOT);
        later.set(Some(id));

        bus.emit(SRC, "x", &[]).unwrap();
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(bus.connection_count(SRC, "x"), 1);
    }

    #[test]
    fn one_shot_reemitted_by_earlier_handler_fires_once() {
        let bus = bus();
        let b = Rc::clone(&bus);
        let depth = Rc::new(Cell::new(0));
        let d = Rc::clone(&depth);
        bus.connect(
            SRC,
            "x",
            Box::new(move |_: &[Variant]| {
                d.set(d.get() + 1);
                if d.get() == 1 {
                    b.emit(SRC, "x", &[]).unwrap();
                }
            }),
            ConnectFlags::NONE,
        )
        .unwrap();
        let (hits, id) = counter(&bus, ConnectFlags::ONE_SHOT);
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(!bus.is_connected(SRC, "x", id));
    }

    #[test]
    fn deferred_calls_flush_in_emission_order() {
        let bus = bus();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let log = Rc::clone(&log);
            bus.connect(
                SRC,
                "x",
                Box::new(move |args: &[Variant]| log.borrow_mut().push(format!("{tag}{}", args[0]))),
                ConnectFlags::DEFERRED,
            )
            .unwrap();
        }
        bus.emit(SRC, "x", &[Variant::from(1)]).unwrap();
        bus.emit(SRC, "x", &[Variant::from(2)]).unwrap();
        assert!(log.borrow().is_empty());

        assert_eq!(bus.flush_deferred(), 4);
        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn emit_during_flush_runs_in_same_flush() {
        let bus = bus();
        bus.add_signal(SRC, "y");
        let b = Rc::clone(&bus);
        bus.connect(
            SRC,
            "x",
            Box::new(move |_: &[Variant]| b.emit(SRC, "y", &[]).unwrap()),
            ConnectFlags::DEFERRED,
        )
        .unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        bus.connect(SRC, "y", Box::new(move |_: &[Variant]| h.set(h.get() + 1)), ConnectFlags::DEFERRED)
            .unwrap();

        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(bus.flush_deferred(), 2);
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.pending_deferred(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let bus = bus();
        bus.connect(SRC, "x", Box::new(|_: &[Variant]| panic!("boom")), ConnectFlags::NONE)
            .unwrap();
        let (hits, _) = counter(&bus, ConnectFlags::NONE);
        bus.emit(SRC, "x", &[]).unwrap();
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(bus.connection_count(SRC, "x"), 2);
    }

    #[test]
    fn handler_can_disconnect_a_later_handler() {
        let bus = bus();
        let later: Rc<Cell<Option<ConnectionId>>> = Rc::new(Cell::new(None));
        let b = Rc::clone(&bus);
        let l = Rc::clone(&later);
        bus.connect(
            SRC,
            "x",
            Box::new(move |_: &[Variant]| {
                if let Some(id) = l.get() {
                    b.disconnect(SRC, "x", id).unwrap();
                }
            }),
            ConnectFlags::NONE,
        )
        .unwrap();
        let (hits, id) = counter(&bus, ConnectFlags::NONE);
        later.set(Some(id));

        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(bus.connection_count(SRC, "x"), 1);
    }

    #[test]
    fn reentrant_emit_skips_running_handler() {
        let bus = bus();
        let hits = Rc::new(Cell::new(0));
        let b = Rc::clone(&bus);
        let h = Rc::clone(&hits);
        bus.connect(
            SRC,
            "x",
            Box::new(move |_: &[Variant]| {
                h.set(h.get() + 1);
                b.emit(SRC, "x", &[]).unwrap();
            }),
            ConnectFlags::NONE,
        )
        .unwrap();
        bus.emit(SRC, "x", &[]).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn free_object_drops_registrations_and_queued_calls() {
        let bus = bus();
        let (hits, id) = counter(&bus, ConnectFlags::DEFERRED);
        bus.emit(SRC, "x", &[]).unwrap();
        bus.free_object(SRC);
        assert_eq!(bus.pending_deferred(), 0);
        assert!(!bus.is_connected(SRC, "x", id));
        assert!(!bus.has_signal(SRC, "x"));
        assert_eq!(bus.flush_deferred(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn payload_reaches_handler() {
        let bus = bus();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        bus.connect(SRC, "x", Box::new(move |args: &[Variant]| s.borrow_mut().extend_from_slice(args)), ConnectFlags::NONE)
            .unwrap();
        bus.emit(SRC, "x", &[Variant::from(7), Variant::from("seven")]).unwrap();
        assert_eq!(*seen.borrow(), vec![Variant::from(7), Variant::from("seven")]);
    }
}
