//! Countdown descriptor: pure data describing an in-flight
//! countdown. The background task that actually waits it out and the
//! cancellation plumbing live in the server crate — this type only knows
//! how to report time remaining.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What triggered the countdown, and therefore who may cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownKind {
    /// Started by `SendMatchRequest`; the host (or requester) may cancel
    /// it early via the matching stop request.
    UserInitiated,
    /// Started automatically when the room's auto-start duration elapses
    /// after becoming full of Ready users; not cancellable.
    AutoStart,
}

impl CountdownKind {
    pub fn is_cancellable(self) -> bool {
        matches!(self, CountdownKind::UserInitiated)
    }
}

/// A running countdown. `start_instant` is a monotonic clock reading, never
/// serialized directly to clients — `time_remaining` is computed fresh on
/// every read instead of drifting via a stored deadline.
#[derive(Debug, Clone, Copy)]
pub struct CountdownDescriptor {
    pub kind: CountdownKind,
    pub duration: Duration,
    start_instant: Instant,
}

impl CountdownDescriptor {
    pub fn start(kind: CountdownKind, duration: Duration, now: Instant) -> Self {
        Self {
            kind,
            duration,
            start_instant: now,
        }
    }

    pub fn time_remaining(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.start_instant);
        self.duration.saturating_sub(elapsed)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.time_remaining(now).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_remaining_counts_down() {
        let start = Instant::now();
        let cd = CountdownDescriptor::start(CountdownKind::UserInitiated, Duration::from_secs(10), start);
        assert_eq!(cd.time_remaining(start), Duration::from_secs(10));
        assert_eq!(
            cd.time_remaining(start + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn time_remaining_saturates_at_zero() {
        let start = Instant::now();
        let cd = CountdownDescriptor::start(CountdownKind::AutoStart, Duration::from_secs(5), start);
        assert!(cd.is_expired(start + Duration::from_secs(999)));
    }

    #[test]
    fn only_user_initiated_is_cancellable() {
        assert!(CountdownKind::UserInitiated.is_cancellable());
        assert!(!CountdownKind::AutoStart.is_cancellable());
    }
}
