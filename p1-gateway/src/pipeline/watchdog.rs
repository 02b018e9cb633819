/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Upper bound on the lifetime of one run.
//!
//! The watchdog does not look at stage health.  It counts cycles and raises
//! the stop signal when the budget is spent, so even a run that looks fine
//! is periodically rebuilt from scratch.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    remaining: u32,
}

impl Watchdog {
    pub fn new(lifetime_cycles: u32) -> Self {
        Self {
            remaining: lifetime_cycles,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Count one elapsed cycle; `true` once the budget is spent.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    /// Tick once per `cycle` until expiry (raising `stop`) or until `stop`
    /// is raised by someone else.
    pub async fn run(mut self, cycle: Duration, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(cycle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(remaining = self.remaining, "watchdog released");
                    return;
                }
                _ = ticker.tick() => {
                    if self.tick() {
                        warn!("watchdog lifetime reached, stopping run");
                        stop.cancel();
                        return;
                    }
                }
            }
        }
    }
}
