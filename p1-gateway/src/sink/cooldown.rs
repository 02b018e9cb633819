/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-window reconnect suppression.

use std::time::{Duration, Instant};

/// After [`trip`](Cooldown::trip), reports an active window for `window`.
///
/// Each trip restarts the window from `now`; there is no growth between
/// consecutive failures.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    until: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn trip(&mut self, now: Instant) {
        self.until = Some(now + self.window);
    }

    pub fn reset(&mut self) {
        self.until = None;
    }

    /// Time left in the current window, `None` when attempts are allowed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn idle_until_tripped() {
        let c = Cooldown::new(WINDOW);
        assert!(!c.is_active(Instant::now()));
        assert_eq!(c.remaining(Instant::now()), None);
    }

    #[test]
    fn active_inside_window_only() {
        let t0 = Instant::now();
        let mut c = Cooldown::new(WINDOW);
        c.trip(t0);
        assert!(c.is_active(t0));
        assert_eq!(c.remaining(t0 + Duration::from_secs(10)), Some(Duration::from_secs(20)));
        assert!(!c.is_active(t0 + WINDOW));
        assert!(!c.is_active(t0 + WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn retrip_restarts_fixed_window() {
        let t0 = Instant::now();
        let mut c = Cooldown::new(WINDOW);
        c.trip(t0);
        let t1 = t0 + Duration::from_secs(25);
        c.trip(t1);
        assert_eq!(c.remaining(t1), Some(WINDOW));
    }

    #[test]
    fn reset_clears_window() {
        let t0 = Instant::now();
        let mut c = Cooldown::new(WINDOW);
        c.trip(t0);
        c.reset();
        assert!(!c.is_active(t0));
    }
}
