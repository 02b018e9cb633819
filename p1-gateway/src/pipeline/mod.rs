/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One run of the gateway: three stages, an optional watchdog, one stop
//! signal.
//!
//! ```text
//!  transport ─▶ [source] ─ch1─▶ [decode] ─ch2─▶ [dispatch] ─▶ sinks
//!                   ▲              ▲               ▲
//!                   └──────── stop signal ─────────┘◀── watchdog / supervisor
//! ```
//!
//! Stages run on blocking threads and own their data exclusively: lines and
//! Sequences move through the channels, schedule state lives in the dispatch
//! thread.  Whatever ends first (a stage failing or returning, the watchdog,
//! an operator interrupt) raises the stop signal, and the whole run is torn
//! down with [`Pipeline::shutdown`].

pub mod error;
pub mod stages;
pub mod supervisor;
pub mod watchdog;

pub use error::StageError;
pub use supervisor::Supervisor;
pub use watchdog::Watchdog;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::config::GatewayConfig;
use crate::schedule::ScheduleEngine;
use crate::sink::SinkRegistry;
use crate::telegram::TelegramDecoder;
use crate::transform::TransformationEngine;
use crate::transport::{self, Closer, LineSource};

// ── PipelineParts ─────────────────────────────────────────────────────────────

/// Everything one run needs, built fresh for every run.
pub struct PipelineParts {
    pub source: Box<dyn LineSource>,
    pub decoder: TelegramDecoder,
    pub transforms: TransformationEngine,
    pub schedules: ScheduleEngine,
    pub sinks: SinkRegistry,
    pub cycle_length: Duration,
    /// Lifetime budget in cycles; `None` disables the watchdog.
    pub watchdog: Option<u32>,
}

impl PipelineParts {
    /// Build sinks, schedules and transport from `config`.
    ///
    /// Sinks built before a later failure are closed again.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let schedules = ScheduleEngine::from_config(&config.schedules, Utc::now())
            .context("failed to arm schedules")?;
        let sinks = SinkRegistry::from_config(&config.sinks).context("failed to build sinks")?;
        let source = match transport::open(&config.transport, config.cycle_length) {
            Ok(source) => source,
            Err(e) => {
                sinks.close_all();
                return Err(e).context("failed to open transport");
            }
        };

        Ok(Self {
            source,
            decoder: TelegramDecoder::new(config.filter_set(), config.meter_timezone),
            transforms: TransformationEngine::new(config.transformations.clone()),
            schedules,
            sinks,
            cycle_length: config.cycle_length,
            watchdog: config
                .watchdog
                .enabled
                .then_some(config.watchdog.lifetime_cycles),
        })
    }
}

// ── RunSummary ────────────────────────────────────────────────────────────────

/// How the stages of one run ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Stages that returned an error or panicked.
    pub failed: Vec<&'static str>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

type StageHandle = JoinHandle<Result<(), StageError>>;

pub struct Pipeline {
    stop: CancellationToken,
    closer: Option<Closer>,
    sinks: Arc<SinkRegistry>,
    stages: Vec<(&'static str, StageHandle)>,
    watchdog: Option<JoinHandle<()>>,
    cycle_length: Duration,
}

impl Pipeline {
    /// Start every stage.  `stop` is this run's stop signal.
    ///
    /// # Errors
    /// The transport refused to hand out a closer; nothing has been started
    /// and the sinks are closed.
    pub fn launch(parts: PipelineParts, stop: CancellationToken) -> Result<Self> {
        let PipelineParts {
            source,
            decoder,
            transforms,
            mut schedules,
            sinks,
            cycle_length,
            watchdog,
        } = parts;

        let closer = match source.closer() {
            Ok(closer) => closer,
            Err(e) => {
                sinks.close_all();
                return Err(e).context("transport has no closer");
            }
        };
        let sinks = Arc::new(sinks);
        let (line_tx, line_rx) = mpsc::channel();
        let (seq_tx, seq_rx) = mpsc::channel();

        let mut handles = Vec::with_capacity(3);
        handles.push((
            "source",
            spawn_stage("source", &stop, move |stop| {
                stages::run_source(source, line_tx, stop)
            }),
        ));
        handles.push((
            "decode",
            spawn_stage("decode", &stop, move |stop| {
                stages::run_decode(decoder, line_rx, seq_tx, stop, cycle_length)
            }),
        ));
        let dispatch_sinks = Arc::clone(&sinks);
        handles.push((
            "dispatch",
            spawn_stage("dispatch", &stop, move |stop| {
                stages::run_dispatch(
                    &transforms,
                    &mut schedules,
                    &dispatch_sinks,
                    seq_rx,
                    stop,
                    cycle_length,
                )
            }),
        ));

        let watchdog = watchdog.map(|cycles| {
            info!(cycles, "watchdog armed");
            tokio::spawn(Watchdog::new(cycles).run(cycle_length, stop.clone()))
        });

        info!(cycle_ms = cycle_length.as_millis() as u64, "pipeline started");
        Ok(Self {
            stop,
            closer: Some(closer),
            sinks,
            stages: handles,
            watchdog,
            cycle_length,
        })
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Resolve once the stop signal is raised or a stage has ended.
    ///
    /// Stage threads are polled once per cycle length.
    pub async fn wait(&self) {
        let mut poll = tokio::time::interval(self.cycle_length);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = poll.tick() => {
                    if let Some((name, _)) = self.stages.iter().find(|(_, h)| h.is_finished()) {
                        warn!(stage = name, "stage ended, stopping run");
                        self.stop.cancel();
                        return;
                    }
                }
            }
        }
    }

    /// Tear the run down: raise stop, close the transport, join every stage,
    /// close every sink.
    pub async fn shutdown(mut self) -> RunSummary {
        self.stop.cancel();
        if let Some(close) = self.closer.take() {
            close();
            debug!("transport closed");
        }

        let mut summary = RunSummary::default();
        for (name, handle) in self.stages.drain(..) {
            match handle.await {
                Ok(Ok(())) => debug!(stage = name, "stage joined"),
                Ok(Err(_)) => summary.failed.push(name),
                Err(e) => {
                    error!(stage = name, error = %e, "stage panicked");
                    summary.failed.push(name);
                }
            }
        }
        if let Some(watchdog) = self.watchdog.take() {
            if let Err(e) = watchdog.await {
                warn!(error = %e, "watchdog task failed");
            }
        }

        self.sinks.close_all();
        info!(failed = ?summary.failed, "pipeline stopped");
        summary
    }
}

/// Run `body` on a blocking thread.  The stop signal is raised when the
/// stage returns or unwinds.
fn spawn_stage<F>(name: &'static str, stop: &CancellationToken, body: F) -> StageHandle
where
    F: FnOnce(&CancellationToken) -> Result<(), StageError> + Send + 'static,
{
    let stop = stop.clone();
    tokio::task::spawn_blocking(move || {
        let _span = info_span!("stage", stage = name).entered();
        let _raise_on_exit = stop.clone().drop_guard();
        let result = body(&stop);
        match &result {
            Ok(()) => info!("stage stopped"),
            Err(e) => error!(error = %e, "stage failed"),
        }
        result
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
