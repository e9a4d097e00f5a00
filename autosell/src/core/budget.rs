//! Shared time budget helpers for deadline-bounded waits.

use std::time::{Duration, Instant};

/// Remaining time until `deadline` as seen at `now`, or `None` once it has passed.
pub fn remaining(deadline: Instant, now: Instant) -> Option<Duration> {
    let remaining = deadline
        .checked_duration_since(now)
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return None;
    }
    Some(remaining)
}

/// True once `now` has reached `deadline`.
pub fn is_expired(deadline: Instant, now: Instant) -> bool {
    remaining(deadline, now).is_none()
}

/// True once at least `window` has elapsed since `since`.
pub fn has_elapsed(since: Instant, window: Duration, now: Instant) -> bool {
    now.saturating_duration_since(since) >= window
}
