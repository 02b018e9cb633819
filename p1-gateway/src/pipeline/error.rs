/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fatal stage failures.  Any of these ends the current run.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Nothing arrived within one cycle length while the run was still live.
    #[error("{stage} stage received nothing for {waited:?}")]
    Starved {
        stage: &'static str,
        waited: Duration,
    },

    /// The stage on the other end of a channel is gone.
    #[error("{stage} stage lost its channel peer")]
    Disconnected { stage: &'static str },
}
