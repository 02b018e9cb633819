/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Blocking stage loops.
//!
//! Each loop runs on its own thread and checks the stop signal between units
//! of work.  Every wait is bounded by the cycle length, so a stop takes at
//! most about one cycle to be observed.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::StageError;
use crate::schedule::ScheduleEngine;
use crate::sink::SinkRegistry;
use crate::telegram::{Sequence, TelegramDecoder};
use crate::transform::TransformationEngine;
use crate::transport::LineSource;

/// Transport → channel 1.
pub(crate) fn run_source(
    mut source: Box<dyn LineSource>,
    lines: Sender<String>,
    stop: &CancellationToken,
) -> Result<(), StageError> {
    while !stop.is_cancelled() {
        match source.next_line() {
            Ok(Some(line)) => {
                trace!(line = %line, "line received");
                lines
                    .send(line)
                    .map_err(|_| StageError::Disconnected { stage: "source" })?;
            }
            Ok(None) => {}
            // closing the transport is how the supervisor unblocks this stage
            Err(_) if stop.is_cancelled() => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Channel 1 → decoder → channel 2.
pub(crate) fn run_decode(
    mut decoder: TelegramDecoder,
    lines: Receiver<String>,
    sequences: Sender<Sequence>,
    stop: &CancellationToken,
    wait: Duration,
) -> Result<(), StageError> {
    while let Some(line) = receive(&lines, stop, wait, "decode")? {
        if let Some(sequence) = decoder.feed(&line) {
            debug!(
                header = sequence.header().unwrap_or_default(),
                message_time = ?sequence.message_time(),
                "sequence finalized"
            );
            sequences
                .send(sequence)
                .map_err(|_| StageError::Disconnected { stage: "decode" })?;
        }
    }
    Ok(())
}

/// Channel 2 → transformations → schedules → sinks.
pub(crate) fn run_dispatch(
    transforms: &TransformationEngine,
    schedules: &mut ScheduleEngine,
    sinks: &Arc<SinkRegistry>,
    sequences: Receiver<Sequence>,
    stop: &CancellationToken,
    wait: Duration,
) -> Result<(), StageError> {
    while let Some(mut sequence) = receive(&sequences, stop, wait, "dispatch")? {
        transforms.apply(&mut sequence);
        let routed = schedules.process(&sequence, sinks);
        if routed > 0 {
            debug!(routed, "dispatches routed");
        }
    }
    Ok(())
}

/// Bounded pop.  `Ok(None)` means the run is stopping; a timeout or a lost
/// producer while the run is live is fatal.
fn receive<T>(
    rx: &Receiver<T>,
    stop: &CancellationToken,
    wait: Duration,
    stage: &'static str,
) -> Result<Option<T>, StageError> {
    if stop.is_cancelled() {
        return Ok(None);
    }
    match rx.recv_timeout(wait) {
        Ok(item) => Ok(Some(item)),
        Err(_) if stop.is_cancelled() => Ok(None),
        Err(RecvTimeoutError::Timeout) => Err(StageError::Starved {
            stage,
            waited: wait,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(StageError::Disconnected { stage }),
    }
}
