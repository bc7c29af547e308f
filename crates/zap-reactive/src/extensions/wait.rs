// extensions/wait.rs
//
// Awaitable signal completions and host-timer sleeps.
//
// Usage:
//   let (payload,) = HIT.wait(&bus, enemy)?.await;
//   match HIT.wait_timeout(&bus, &timers, enemy, 2.0)?.await {
//       Ok((payload,)) => ...,
//       Err(AwaitError::Timeout) => ...,
//   }

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use futures::channel::oneshot;
use futures::FutureExt;

use crate::api::args::SignalArgs;
use crate::api::host::{BusHandle, TimerHandle, TimerService};
use crate::api::types::{ConnectFlags, ObjectId, TimerId};
use crate::components::signal::{Connection, Signal};
use crate::error::{AwaitError, HostError};

/// Resolves with the payload of the next firing of a signal.
///
/// Backed by a one-shot registration. If the registration disappears
/// without firing (the source was freed) the future stays pending; bound
/// it with [`Signal::wait_timeout`] or a cancel handle when that matters.
pub struct SignalFuture<Args> {
    receiver: oneshot::Receiver<Args>,
    connection: Connection,
}

impl<Args> SignalFuture<Args> {
    /// Whether the one-shot registration is still waiting on the bus.
    pub fn is_pending(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl<Args> Future for SignalFuture<Args> {
    type Output = Args;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Args> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(args)) => Poll::Ready(args),
            // Sender dropped with the registration: never resumes.
            Poll::Ready(Err(oneshot::Canceled)) | Poll::Pending => Poll::Pending,
        }
    }
}

struct RaceState<Args> {
    outcome: Option<Result<Args, AwaitError>>,
    settled: bool,
    waker: Option<Waker>,
    timer: Option<TimerId>,
    connection: Option<Connection>,
}

type Race<Args> = Rc<RefCell<RaceState<Args>>>;

/// Record the first outcome only. Returns whether this call won.
fn settle<Args>(race: &Race<Args>, outcome: Result<Args, AwaitError>) -> bool {
    let waker = {
        let mut state = race.borrow_mut();
        if state.settled {
            return false;
        }
        state.settled = true;
        state.outcome = Some(outcome);
        state.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
    true
}

fn cancel_timer<Args>(race: &Race<Args>, timers: &Weak<dyn TimerService>) {
    let timer = race.borrow_mut().timer.take();
    if let (Some(timer), Some(timers)) = (timer, timers.upgrade()) {
        timers.cancel(timer);
    }
}

/// Lives inside the bus handler; settles `Disconnected` when the bus drops
/// the handler without it having fired.
struct DisconnectGuard<Args> {
    race: Race<Args>,
    timers: Weak<dyn TimerService>,
}

impl<Args> Drop for DisconnectGuard<Args> {
    fn drop(&mut self) {
        if settle(&self.race, Err(AwaitError::Disconnected)) {
            cancel_timer(&self.race, &self.timers);
        }
    }
}

/// Resolves with the next firing, or with an [`AwaitError`] when the
/// timeout expires first or the source goes away. Exactly one outcome is
/// produced: the loser is torn down (timer cancelled or registration
/// disconnected) by the winner. Dropping the future tears down both.
pub struct TimedWait<Args> {
    race: Race<Args>,
    timers: Weak<dyn TimerService>,
}

impl<Args: SignalArgs> TimedWait<Args> {
    fn start(
        signal: &Signal<Args>,
        bus: &BusHandle,
        timers: Option<&TimerHandle>,
        source: ObjectId,
        timeout: Option<f64>,
    ) -> Result<Self, HostError> {
        let race: Race<Args> = Rc::new(RefCell::new(RaceState {
            outcome: None,
            settled: false,
            waker: None,
            timer: None,
            connection: None,
        }));
        let weak_timers: Weak<dyn TimerService> = match timers {
            Some(timers) => Rc::downgrade(timers),
            None => Weak::<crate::core::timers::TimerQueue>::new(),
        };

        let guard = DisconnectGuard {
            race: Rc::clone(&race),
            timers: weak_timers.clone(),
        };
        let connection = signal.connect_with(bus, source, ConnectFlags::ONE_SHOT, move |args| {
            if settle(&guard.race, Ok(args)) {
                cancel_timer(&guard.race, &guard.timers);
            }
        })?;
        race.borrow_mut().connection = Some(connection);

        if let (Some(timers), Some(seconds)) = (timers, timeout) {
            let on_timeout = Rc::clone(&race);
            let timer = timers.schedule(
                seconds,
                Box::new(move || {
                    on_timeout.borrow_mut().timer = None;
                    if settle(&on_timeout, Err(AwaitError::Timeout)) {
                        let connection = on_timeout.borrow_mut().connection.take();
                        drop(connection);
                    }
                }),
            );
            race.borrow_mut().timer = Some(timer);
        }

        Ok(Self {
            race,
            timers: weak_timers,
        })
    }

    /// Whether neither the signal nor the timeout has settled yet.
    pub fn is_pending(&self) -> bool {
        !self.race.borrow().settled
    }
}

impl<Args> Future for TimedWait<Args> {
    type Output = Result<Args, AwaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.race.borrow_mut();
        if let Some(outcome) = state.outcome.take() {
            return Poll::Ready(outcome);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<Args> Drop for TimedWait<Args> {
    fn drop(&mut self) {
        let connection = {
            let mut state = self.race.borrow_mut();
            state.settled = true;
            state.connection.take()
        };
        drop(connection);
        cancel_timer(&self.race, &self.timers);
    }
}

impl<Args: SignalArgs> Signal<Args> {
    /// Await the next firing on `source`.
    pub fn wait(&self, bus: &BusHandle, source: ObjectId) -> Result<SignalFuture<Args>, HostError> {
        let (sender, receiver) = oneshot::channel();
        let mut sender = Some(sender);
        let connection = self.connect_with(bus, source, ConnectFlags::ONE_SHOT, move |args| {
            if let Some(sender) = sender.take() {
                // Receiver gone means the awaiting task was dropped.
                let _ = sender.send(args);
            }
        })?;
        Ok(SignalFuture {
            receiver,
            connection,
        })
    }

    /// Await the next firing, failing with `Disconnected` if the source is
    /// freed first.
    pub fn wait_checked(&self, bus: &BusHandle, source: ObjectId) -> Result<TimedWait<Args>, HostError> {
        TimedWait::start(self, bus, None, source, None)
    }

    /// Await the next firing for at most `seconds` of host time.
    pub fn wait_timeout(
        &self,
        bus: &BusHandle,
        timers: &TimerHandle,
        source: ObjectId,
        seconds: f64,
    ) -> Result<TimedWait<Args>, HostError> {
        TimedWait::start(self, bus, Some(timers), source, Some(seconds))
    }
}

/// Resolves after `seconds` of host time. Dropping it cancels the timer.
pub struct Sleep {
    receiver: oneshot::Receiver<()>,
    timer: TimerId,
    timers: Weak<dyn TimerService>,
}

pub fn sleep(timers: &TimerHandle, seconds: f64) -> Sleep {
    let (sender, receiver) = oneshot::channel();
    let timer = timers.schedule(
        seconds,
        Box::new(move || {
            let _ = sender.send(());
        }),
    );
    Sleep {
        receiver,
        timer,
        timers: Rc::downgrade(timers),
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            Poll::Ready(Err(oneshot::Canceled)) | Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timers) = self.timers.upgrade() {
            timers.cancel(self.timer);
        }
    }
}
