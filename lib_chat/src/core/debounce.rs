//! # Debounce
//!
//! A poll-driven debouncer over an injectable [`Clock`], and the local typing
//! notifier built on it. Neither spawns timers: the owner asks for the next
//! deadline, sleeps until then (or advances a [`ManualClock`] in tests), and
//! polls.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Now.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A clock frozen at the moment of creation.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.origin + offset
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        self.as_ref().now()
    }
}

/// # Debouncer
///
/// Holds the latest value handed to [`call`](Self::call) and releases it once
/// `delay` has passed without another call.
#[derive(Debug)]
pub struct Debouncer<T, C: Clock = SystemClock> {
    delay: Duration,
    clock: C,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T, SystemClock> {
    /// A debouncer on the system clock.
    pub fn new(delay: Duration) -> Self {
        Self::with_clock(delay, SystemClock)
    }
}

impl<T, C: Clock> Debouncer<T, C> {
    /// A debouncer on a specific clock.
    pub fn with_clock(delay: Duration, clock: C) -> Self {
        Self {
            delay,
            clock,
            pending: None,
        }
    }

    /// The quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending value and restart the quiet period.
    pub fn call(&mut self, value: T) {
        let deadline = self.clock.now() + self.delay;
        self.pending = Some((value, deadline));
    }

    /// Release the pending value if its quiet period has elapsed.
    pub fn poll(&mut self) -> Option<T> {
        let due = matches!(&self.pending, Some((_, deadline)) if self.clock.now() >= *deadline);
        if due {
            self.pending.take().map(|(value, _)| value)
        } else {
            None
        }
    }

    /// Drop the pending value without releasing it.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Whether a value is waiting.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value will be released.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }
}

/// What the local client should broadcast about its own typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    /// Announce that the local user started typing.
    Start,
    /// Announce that the local user stopped.
    Stop,
}

/// # Typing Notifier
///
/// Turns raw keystrokes into at most one `Start` per burst and one `Stop` after
/// the burst has been idle for the debounce delay (or a message was sent).
#[derive(Debug)]
pub struct TypingNotifier<C: Clock = SystemClock> {
    idle: Debouncer<(), C>,
    typing: bool,
}

impl TypingNotifier<SystemClock> {
    /// A notifier on the system clock.
    pub fn new(idle_delay: Duration) -> Self {
        Self::with_clock(idle_delay, SystemClock)
    }
}

impl<C: Clock> TypingNotifier<C> {
    /// A notifier on a specific clock.
    pub fn with_clock(idle_delay: Duration, clock: C) -> Self {
        Self {
            idle: Debouncer::with_clock(idle_delay, clock),
            typing: false,
        }
    }

    /// Whether a `Start` has been emitted without its `Stop`.
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Record a keystroke.
    pub fn keystroke(&mut self) -> Option<TypingSignal> {
        self.idle.call(());
        if self.typing {
            None
        } else {
            self.typing = true;
            Some(TypingSignal::Start)
        }
    }

    /// Emit `Stop` once the burst has gone idle.
    pub fn poll(&mut self) -> Option<TypingSignal> {
        if self.idle.poll().is_some() && self.typing {
            self.typing = false;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }

    /// The message was sent: stop immediately.
    pub fn message_sent(&mut self) -> Option<TypingSignal> {
        self.idle.cancel();
        if self.typing {
            self.typing = false;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }

    /// When [`poll`](Self::poll) may next emit.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.idle.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    #[test]
    fn debouncer_releases_only_after_quiet_period() {
        let clock = Arc::new(ManualClock::new());
        let mut debouncer = Debouncer::with_clock(DELAY, Arc::clone(&clock));

        debouncer.call("a");
        clock.advance(Duration::from_millis(200));
        debouncer.call("b");
        clock.advance(Duration::from_millis(200));
        assert_eq!(debouncer.poll(), None);

        clock.advance(Duration::from_millis(100));
        assert_eq!(debouncer.poll(), Some("b"));
        assert_eq!(debouncer.poll(), None);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn cancel_drops_pending_value() {
        let clock = Arc::new(ManualClock::new());
        let mut debouncer = Debouncer::with_clock(DELAY, Arc::clone(&clock));
        debouncer.call(1);
        assert!(debouncer.deadline().is_some());
        assert_eq!(debouncer.cancel(), Some(1));
        clock.advance(DELAY * 2);
        assert_eq!(debouncer.poll(), None);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn notifier_starts_once_per_burst_and_stops_when_idle() {
        let clock = Arc::new(ManualClock::new());
        let mut notifier = TypingNotifier::with_clock(DELAY, Arc::clone(&clock));

        assert_eq!(notifier.keystroke(), Some(TypingSignal::Start));
        for _ in 0..5 {
            clock.advance(Duration::from_millis(100));
            assert_eq!(notifier.keystroke(), None);
            assert_eq!(notifier.poll(), None);
        }
        clock.advance(DELAY);
        assert_eq!(notifier.poll(), Some(TypingSignal::Stop));
        assert!(!notifier.is_typing());
        assert_eq!(notifier.poll(), None);

        assert_eq!(notifier.keystroke(), Some(TypingSignal::Start));
    }

    #[test]
    fn sending_a_message_stops_immediately() {
        let clock = Arc::new(ManualClock::new());
        let mut notifier = TypingNotifier::with_clock(DELAY, Arc::clone(&clock));
        assert_eq!(notifier.message_sent(), None);

        notifier.keystroke();
        assert_eq!(notifier.message_sent(), Some(TypingSignal::Stop));
        assert_eq!(notifier.next_deadline(), None);
        clock.advance(DELAY);
        assert_eq!(notifier.poll(), None);
    }
}
