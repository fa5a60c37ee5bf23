//! Timed lifecycle transitions.
//!
//! The scheduler is a pure delay queue: it never reorders timers beyond
//! deadline and insertion order. Executing due work is left to the caller.

mod clock;
mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timer::{Slot, TimerKey, TimerQueue};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::voice::VoiceHandle;

pub struct Scheduler<A> {
    clock: Arc<dyn Clock>,
    queue: Mutex<TimerQueue<A>>,
    wake: Condvar,
}

impl<A> Scheduler<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(TimerQueue::new()),
            wake: Condvar::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Schedules `action` at clock time `at`, replacing whatever `key` held.
    pub fn schedule_at(&self, key: TimerKey, at: Duration, action: A) {
        let replaced = self.queue.lock().schedule(key, at, action).is_some();
        if replaced {
            tracing::trace!(?key, ?at, "timer replaced");
        }
        self.wake.notify_all();
    }

    /// Schedules `action` under a fresh key `delay` from now.
    pub fn defer(&self, delay: Duration, action: A) -> TimerKey {
        let at = self.now().saturating_add(delay);
        let key = {
            let mut queue = self.queue.lock();
            let key = queue.deferred_key();
            queue.schedule(key, at, action);
            key
        };
        self.wake.notify_all();
        key
    }

    pub fn cancel(&self, key: TimerKey) -> bool {
        self.queue.lock().cancel(key).is_some()
    }

    pub fn cancel_voice(&self, handle: VoiceHandle) -> usize {
        self.queue.lock().cancel_voice(handle)
    }

    pub fn deadline(&self, key: TimerKey) -> Option<Duration> {
        self.queue.lock().deadline(key)
    }

    /// Removes and returns every timer due now, earliest first.
    pub fn take_due(&self) -> Vec<(TimerKey, A)> {
        let now = self.now();
        let mut queue = self.queue.lock();
        std::iter::from_fn(|| queue.pop_due(now)).collect()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.lock().next_deadline()
    }

    /// Blocks until the next timer is due, a new timer is scheduled, or
    /// `max_wait` elapses.
    pub fn wait(&self, max_wait: Duration) {
        let mut queue = self.queue.lock();
        let now = self.now();
        let wait = match queue.next_deadline() {
            Some(at) if at <= now => return,
            Some(at) => (at - now).min(max_wait),
            None => max_wait,
        };
        let _ = self.wake.wait_for(&mut queue, wait);
    }

    /// Wakes a thread blocked in [`Scheduler::wait`].
    pub fn notify(&self) {
        self.wake.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_due_follows_the_clock() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Scheduler::new(clock.clone());
        let key = TimerKey::Voice(VoiceHandle(100), Slot::Release);
        scheduler.schedule_at(key, Duration::from_millis(500), "release");
        assert!(scheduler.take_due().is_empty());
        clock.advance(Duration::from_millis(500));
        assert_eq!(scheduler.take_due(), vec![(key, "release")]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn defer_is_relative_to_now() {
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_secs(2));
        let scheduler = Scheduler::new(clock.clone());
        let key = scheduler.defer(Duration::from_millis(250), ());
        assert_eq!(scheduler.deadline(key), Some(Duration::from_millis(2250)));
        assert!(scheduler.cancel(key));
        assert!(!scheduler.cancel(key));
    }

    #[test]
    fn wait_returns_immediately_when_due() {
        let scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        scheduler.schedule_at(TimerKey::Deferred(0), Duration::ZERO, ());
        scheduler.wait(Duration::from_secs(60));
        assert_eq!(scheduler.take_due().len(), 1);
    }
}
