/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the schedule engine.

use thiserror::Error;

/// Failure building a [`Schedule`](super::Schedule) from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The cron expression could not be parsed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// The schedule lists no applicable codes.
    #[error("schedule '{schedule}' has no applicable codes")]
    NoApplicableCodes { schedule: String },
}
