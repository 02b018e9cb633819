/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cron trigger helpers.
//!
//! These are free functions rather than methods so they can be used by the
//! configuration validator and tested independently of the `ScheduleEngine`.

use std::str::FromStr;

use chrono::{DateTime, Local, Timelike, Utc};
use cron::Schedule as CronSchedule;

use super::ScheduleError;

/// Parse a cron expression.
///
/// Accepts the classic 5-field form (`m h dom mon dow`, fires at second 0)
/// as well as the 6/7-field form with a leading seconds field and optional
/// trailing year.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, ScheduleError> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        _ => {
            return Err(ScheduleError::InvalidCron {
                expr: expr.to_string(),
                reason: format!("expected 5, 6 or 7 fields, found {}", fields),
            })
        }
    };
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Drop the sub-second part of `t`.
pub fn truncate_subsec(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

/// First occurrence of `cron` strictly after `after`, evaluated in the local
/// timezone and truncated to whole seconds.
///
/// Returns `None` when the expression has no further occurrences.
pub fn next_after(cron: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after = truncate_subsec(after).with_timezone(&Local);
    cron.after(&after)
        .next()
        .map(|t| truncate_subsec(t.with_timezone(&Utc)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
