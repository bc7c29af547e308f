use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use crate::api::host::TimerService;
use crate::api::types::TimerId;

struct PendingTimer {
    id: TimerId,
    remaining: f64,
    callback: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct TimerState {
    timers: Vec<PendingTimer>,
    next_id: u64,
}

/// One-shot timers counted down by scaled host time.
///
/// Callbacks run outside the internal borrow, so they may schedule or
/// cancel other timers.
#[derive(Default)]
pub struct TimerQueue {
    state: RefCell<TimerState>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every timer down by `dt` and fire the expired ones, earliest
    /// expiry first. A panicking callback is logged and does not stop the
    /// rest. Returns how many fired.
    pub fn advance(&self, dt: f64) -> usize {
        let mut expired = {
            let mut state = self.state.borrow_mut();
            for timer in state.timers.iter_mut() {
                timer.remaining -= dt;
            }
            let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.timers)
                .into_iter()
                .partition(|t| t.remaining <= 0.0);
            state.timers = pending;
            expired
        };
        expired.sort_by(|a, b| a.remaining.total_cmp(&b.remaining));

        let fired = expired.len();
        for timer in expired {
            log::trace!("timer {} fired", timer.id.0);
            if panic::catch_unwind(AssertUnwindSafe(timer.callback)).is_err() {
                log::error!("timer {}: callback panicked; continuing", timer.id.0);
            }
        }
        fired
    }

    /// Number of timers still pending.
    pub fn len(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimerService for TimerQueue {
    fn schedule(&self, seconds: f64, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        state.timers.push(PendingTimer {
            id,
            remaining: seconds,
            callback,
        });
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let index = state.timers.iter().position(|t| t.id == timer);
            index.map(|i| state.timers.remove(i))
        };
        removed.is_some()
    }

    fn is_pending(&self, timer: TimerId) -> bool {
        self.state.borrow().timers.iter().any(|t| t.id == timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn fires_after_enough_time() {
        let timers = TimerQueue::new();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let id = timers.schedule(1.0, Box::new(move || f.set(true)));
        assert_eq!(timers.advance(0.5), 0);
        assert!(timers.is_pending(id));
        assert_eq!(timers.advance(0.5), 1);
        assert!(fired.get());
        assert!(!timers.is_pending(id));
    }

    #[test]
    fn fires_in_expiry_order() {
        let timers = TimerQueue::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (tag, secs) in [("late", 0.3), ("early", 0.1), ("mid", 0.2)] {
            let o = Rc::clone(&order);
            timers.schedule(secs, Box::new(move || o.borrow_mut().push(tag)));
        }
        timers.advance(1.0);
        assert_eq!(*order.borrow(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let timers = TimerQueue::new();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let id = timers.schedule(0.1, Box::new(move || f.set(true)));
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        timers.advance(1.0);
        assert!(!fired.get());
    }

    #[test]
    fn panicking_callback_does_not_stop_later_timers() {
        let timers = TimerQueue::new();
        timers.schedule(0.1, Box::new(|| panic!("boom")));
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        timers.schedule(0.2, Box::new(move || f.set(true)));

        assert_eq!(timers.advance(1.0), 2);
        assert!(fired.get());
        assert!(timers.is_empty());
    }

    #[test]
    fn callback_can_schedule_another_timer() {
        let timers = Rc::new(TimerQueue::new());
        let t = Rc::clone(&timers);
        timers.schedule(
            0.1,
            Box::new(move || {
                t.schedule(0.1, Box::new(|| {}));
            }),
        );
        assert_eq!(timers.advance(0.1), 1);
        assert_eq!(timers.len(), 1);
    }
}
