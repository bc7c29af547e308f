use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::api::args::{SignalArgs, Variant};
use crate::api::host::{BusHandle, EventBus, Handler};
use crate::api::types::{ConnectFlags, ConnectionId, ObjectId};
use crate::error::HostError;

/// A named signal carrying a typed payload `Args` (`()`, `(A,)`, `(A, B)`
/// or `(A, B, C)`).
///
/// The type is a compile-time aid only: dispatch on the bus is by name,
/// and two signals are equal when their names are.
///
/// ```ignore
/// const HIT: Signal<(i64,)> = Signal::new("hit");
/// let conn = HIT.connect(&bus, enemy, |(damage,)| println!("took {damage}"))?;
/// HIT.emit(&bus, enemy, (3,))?;
/// ```
pub struct Signal<Args> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn(Args)>,
}

impl<Args> Signal<Args> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<Args: SignalArgs> Signal<Args> {
    /// Subscribe `handler`. The returned connection disconnects on drop.
    pub fn connect<F>(&self, bus: &BusHandle, source: ObjectId, handler: F) -> Result<Connection, HostError>
    where
        F: FnMut(Args) + 'static,
    {
        self.connect_with(bus, source, ConnectFlags::NONE, handler)
    }

    /// Subscribe for a single firing.
    pub fn connect_once<F>(&self, bus: &BusHandle, source: ObjectId, handler: F) -> Result<Connection, HostError>
    where
        F: FnOnce(Args) + 'static,
    {
        let mut handler = Some(handler);
        self.connect_with(bus, source, ConnectFlags::ONE_SHOT, move |args| {
            if let Some(handler) = handler.take() {
                handler(args);
            }
        })
    }

    /// Subscribe with the handler postponed to end of frame.
    pub fn connect_deferred<F>(&self, bus: &BusHandle, source: ObjectId, handler: F) -> Result<Connection, HostError>
    where
        F: FnMut(Args) + 'static,
    {
        self.connect_with(bus, source, ConnectFlags::DEFERRED, handler)
    }

    pub fn connect_with<F>(
        &self,
        bus: &BusHandle,
        source: ObjectId,
        flags: ConnectFlags,
        handler: F,
    ) -> Result<Connection, HostError>
    where
        F: FnMut(Args) + 'static,
    {
        Connection::bind(bus, source, self.name.to_string(), self.typed_handler(handler), flags)
    }

    /// Wrap a typed handler into a raw bus handler. Payloads that do not
    /// decode as `Args` skip the handler.
    pub(crate) fn typed_handler<F>(&self, mut handler: F) -> Handler
    where
        F: FnMut(Args) + 'static,
    {
        let name = self.name.clone();
        Box::new(move |raw: &[Variant]| match Args::from_variants(raw) {
            Some(args) => handler(args),
            None => log::warn!(
                "'{name}': payload of {} value(s) does not match the expected {}",
                raw.len(),
                Args::ARITY
            ),
        })
    }

    pub fn emit(&self, bus: &BusHandle, source: ObjectId, args: Args) -> Result<(), HostError> {
        let raw = args.to_variants()?;
        bus.emit(source, &self.name, &raw)
    }

    /// Whether `source` declares this signal on the bus.
    pub fn is_declared(&self, bus: &BusHandle, source: ObjectId) -> bool {
        bus.has_signal(source, &self.name)
    }

    pub fn has_connections(&self, bus: &BusHandle, source: ObjectId) -> bool {
        self.connection_count(bus, source) > 0
    }

    pub fn connection_count(&self, bus: &BusHandle, source: ObjectId) -> usize {
        bus.connection_count(source, &self.name)
    }
}

impl<Args> Clone for Signal<Args> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Args> PartialEq for Signal<Args> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<Args> Eq for Signal<Args> {}

impl<Args> Hash for Signal<Args> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&self.name).finish()
    }
}

/// A live registration of one handler on the bus.
///
/// Holds at most one registration. `disconnect` is idempotent and checks
/// with the bus first, so a one-shot registration the bus already removed
/// is not disconnected twice. Dropping the connection disconnects it.
pub struct Connection {
    bus: Weak<dyn EventBus>,
    source: ObjectId,
    signal: String,
    flags: ConnectFlags,
    token: Cell<Option<ConnectionId>>,
}

impl Connection {
    /// Register a raw handler and wrap the registration.
    pub fn bind(
        bus: &BusHandle,
        source: ObjectId,
        signal: impl Into<String>,
        handler: Handler,
        flags: ConnectFlags,
    ) -> Result<Self, HostError> {
        let signal = signal.into();
        let token = bus.connect(source, &signal, handler, flags)?;
        Ok(Self {
            bus: Rc::downgrade(bus),
            source,
            signal,
            flags,
            token: Cell::new(Some(token)),
        })
    }

    /// Whether the registration is still live on the bus.
    pub fn is_connected(&self) -> bool {
        let Some(token) = self.token.get() else {
            return false;
        };
        let live = self
            .bus
            .upgrade()
            .is_some_and(|bus| bus.is_connected(self.source, &self.signal, token));
        if !live {
            self.token.set(None);
        }
        live
    }

    /// Remove the registration if it is still live. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        if bus.is_connected(self.source, &self.signal, token) {
            if let Err(err) = bus.disconnect(self.source, &self.signal, token) {
                log::debug!("disconnect of {token} from '{}' failed: {err}", self.signal);
            }
        }
    }

    pub fn source(&self) -> ObjectId {
        self.source
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    pub fn flags(&self) -> ConnectFlags {
        self.flags
    }

    pub fn is_one_shot(&self) -> bool {
        self.flags.one_shot
    }

    pub fn is_deferred(&self) -> bool {
        self.flags.deferred
    }

    /// Registration token, while this connection believes it is registered.
    pub fn id(&self) -> Option<ConnectionId> {
        self.token.get()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("signal", &self.signal)
            .field("flags", &self.flags)
            .field("token", &self.token.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::SignalBus;
    use std::cell::RefCell;

    const SRC: ObjectId = ObjectId(7);
    const X: Signal<()> = Signal::new("x");
    const SCORED: Signal<(String, i64)> = Signal::new("scored");

    fn bus() -> (Rc<SignalBus>, BusHandle) {
        let bus = Rc::new(SignalBus::new());
        bus.add_signal(SRC, "x");
        bus.add_signal(SRC, "scored");
        let handle: BusHandle = bus.clone();
        (bus, handle)
    }

    #[test]
    fn equality_is_by_name() {
        assert_eq!(X, Signal::<()>::named("x"));
        assert_ne!(X, Signal::<()>::named("y"));
        assert_eq!(SCORED.name(), "scored");
    }

    #[test]
    fn typed_payload_round_trip() {
        let (_bus, handle) = bus();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _conn = SCORED
            .connect(&handle, SRC, move |(who, points)| s.borrow_mut().push((who, points)))
            .unwrap();
        SCORED.emit(&handle, SRC, ("ada".into(), 3)).unwrap();
        assert_eq!(*seen.borrow(), vec![("ada".to_string(), 3)]);
    }

    #[test]
    fn mismatched_payload_skips_handler() {
        let (bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _conn = SCORED.connect(&handle, SRC, move |_| h.set(h.get() + 1)).unwrap();
        bus.emit(SRC, "scored", &[Variant::from(1)]).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn one_shot_fires_at_most_once() {
        let (_bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let conn = X.connect_once(&handle, SRC, move |()| h.set(h.get() + 1)).unwrap();
        assert!(conn.is_connected());

        X.emit(&handle, SRC, ()).unwrap();
        X.emit(&handle, SRC, ()).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(!conn.is_connected());
        assert!(conn.id().is_none());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (_bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let conn = X.connect(&handle, SRC, move |()| h.set(h.get() + 1)).unwrap();
        assert_eq!(X.connection_count(&handle, SRC), 1);

        conn.disconnect();
        conn.disconnect();
        assert_eq!(X.connection_count(&handle, SRC), 0);
        X.emit(&handle, SRC, ()).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn disconnect_after_one_shot_fired_is_silent() {
        let (_bus, handle) = bus();
        let conn = X.connect_once(&handle, SRC, |()| {}).unwrap();
        X.emit(&handle, SRC, ()).unwrap();
        // The bus already removed the registration; this must not error.
        conn.disconnect();
        assert!(!conn.is_connected());
    }

    #[test]
    fn drop_disconnects() {
        let (_bus, handle) = bus();
        {
            let _conn = X.connect(&handle, SRC, |()| {}).unwrap();
            assert!(X.has_connections(&handle, SRC));
        }
        assert!(!X.has_connections(&handle, SRC));
    }

    #[test]
    fn deferred_waits_for_flush() {
        let (bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let conn = X.connect_deferred(&handle, SRC, move |()| h.set(h.get() + 1)).unwrap();
        assert!(conn.is_deferred());
        X.emit(&handle, SRC, ()).unwrap();
        assert_eq!(hits.get(), 0);
        bus.flush_deferred();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn deferred_one_shot_is_connected_until_it_fires() {
        let (bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let flags = ConnectFlags::ONE_SHOT.with_deferred();
        let conn = X.connect_with(&handle, SRC, flags, move |()| h.set(h.get() + 1)).unwrap();

        X.emit(&handle, SRC, ()).unwrap();
        assert!(conn.is_connected());
        assert_eq!(bus.flush_deferred(), 1);
        assert_eq!(hits.get(), 1);
        assert!(!conn.is_connected());
    }

    #[test]
    fn dropping_pending_deferred_one_shot_cancels_it() {
        let (bus, handle) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let flags = ConnectFlags::ONE_SHOT.with_deferred();
        let conn = X.connect_with(&handle, SRC, flags, move |()| h.set(h.get() + 1)).unwrap();

        X.emit(&handle, SRC, ()).unwrap();
        drop(conn);
        assert_eq!(bus.flush_deferred(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn connect_once_dropped_by_earlier_handler_never_fires() {
        let (_bus, handle) = bus();
        let pending: Rc<RefCell<Option<Connection>>> = Rc::new(RefCell::new(None));
        let p = Rc::clone(&pending);
        let _first = X
            .connect(&handle, SRC, move |()| drop(p.borrow_mut().take()))
            .unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        *pending.borrow_mut() = Some(X.connect_once(&handle, SRC, move |()| h.set(h.get() + 1)).unwrap());

        X.emit(&handle, SRC, ()).unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(X.connection_count(&handle, SRC), 1);
    }

    #[test]
    fn connection_outliving_bus_is_harmless() {
        let (bus, handle) = bus();
        let conn = X.connect(&handle, SRC, |()| {}).unwrap();
        drop(handle);
        drop(bus);
        assert!(!conn.is_connected());
        conn.disconnect();
    }

    #[test]
    fn undeclared_signal_passes_host_error_through() {
        let (_bus, handle) = bus();
        let missing: Signal<()> = Signal::named("missing");
        assert!(!missing.is_declared(&handle, SRC));
        let err = missing.connect(&handle, SRC, |()| {}).unwrap_err();
        assert!(matches!(err, HostError::UnknownSignal { .. }));
    }
}
