//! Fixed-interval loops with an injectable clock.
//!
//! The monitor and dispatcher loops both go through [`run_every`]. Time comes
//! from a [`Clock`], so tests drive many ticks with a [`ManualClock`] without
//! sleeping, and a [`CancellationToken`] stops the loop between ticks.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Longest single sleep, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on or advanced.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Shared flag asking a loop to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Call `tick` every `interval` until `cancel` is tripped.
///
/// The token is checked before each tick and throughout the sleep between
/// ticks; a tick in progress always runs to completion. Returns the number of
/// ticks run.
pub fn run_every(
    clock: &dyn Clock,
    interval: Duration,
    cancel: &CancellationToken,
    mut tick: impl FnMut(),
) -> usize {
    let mut ticks = 0;
    while !cancel.is_cancelled() {
        tick();
        ticks += 1;

        let mut remaining = interval;
        while !remaining.is_zero() && !cancel.is_cancelled() {
            let step = remaining.min(SLEEP_SLICE);
            clock.sleep(step);
            remaining -= step;
        }
    }
    tracing::debug!(ticks, "loop stopped");
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn manual_clock_moves_only_when_asked() {
        let clock = ManualClock::new(start());
        assert_eq!(clock.now(), start());
        clock.sleep(Duration::from_secs(90));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(90));
    }

    #[test]
    fn run_every_stops_when_cancelled_from_tick() {
        let clock = ManualClock::new(start());
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let ticks = run_every(&clock, Duration::from_secs(30), &cancel, || {
            seen.push(clock.now());
            if seen.len() == 4 {
                cancel.cancel();
            }
        });

        assert_eq!(ticks, 4);
        let expected: Vec<_> = (0..4)
            .map(|i| start() + chrono::Duration::seconds(30 * i))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn pre_cancelled_token_runs_nothing() {
        let clock = ManualClock::new(start());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(run_every(&clock, Duration::from_secs(1), &cancel, || {}), 0);
    }

    #[test]
    fn cancellation_interrupts_the_sleep() {
        let clock = ManualClock::new(start());
        let cancel = CancellationToken::new();

        run_every(&clock, Duration::from_secs(3600), &cancel, || cancel.cancel());

        // Cancelled during the first tick, so no time passes.
        assert_eq!(clock.now(), start());
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }
}
