/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Crash-only restart loop.
//!
//! Every run starts from a freshly loaded configuration and fresh state.
//! Whatever ends a run, the supervisor tears it down completely and, unless
//! the program is stopping or restarts are disabled, builds a new one after
//! one cycle length.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Pipeline, PipelineParts, RunSummary};
use crate::config::GatewayConfig;

/// Delay between configuration load attempts.
pub const CONFIG_RETRY: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config_path: PathBuf,
    stop_program: CancellationToken,
    config_retry: Duration,
}

impl Supervisor {
    /// `stop_program` is the persistent operator stop request; every run's
    /// stop signal is a child of it.
    pub fn new(config_path: PathBuf, stop_program: CancellationToken) -> Self {
        Self {
            config_path,
            stop_program,
            config_retry: CONFIG_RETRY,
        }
    }

    pub fn with_config_retry(mut self, retry: Duration) -> Self {
        self.config_retry = retry;
        self
    }

    /// Run until the operator stops the program or a run ends with restarts
    /// disabled.  Returns the number of runs started.
    pub async fn run(&self) -> u32 {
        let mut runs = 0;
        loop {
            let Some(config) = self.load_config().await else {
                break;
            };

            runs += 1;
            info!(run = runs, "starting pipeline run");
            match self.run_once(&config).await {
                Some(summary) if summary.is_clean() => info!(run = runs, "run ended"),
                Some(summary) => warn!(run = runs, failed = ?summary.failed, "run failed"),
                None => warn!(run = runs, "run could not start"),
            }

            if self.stop_program.is_cancelled() {
                info!("stop requested, not restarting");
                break;
            }
            if !config.restart_on_failure {
                warn!("restart_on_failure is disabled, exiting");
                break;
            }

            info!(delay = ?config.cycle_length, "restarting pipeline");
            tokio::select! {
                _ = self.stop_program.cancelled() => break,
                _ = tokio::time::sleep(config.cycle_length) => {}
            }
        }
        info!(runs, "supervisor stopped");
        runs
    }

    /// Load configuration, retrying until it succeeds.  `None` when the
    /// program is stopped while waiting.
    async fn load_config(&self) -> Option<GatewayConfig> {
        loop {
            if self.stop_program.is_cancelled() {
                return None;
            }
            match GatewayConfig::load_from_file(&self.config_path) {
                Ok(config) => return Some(config),
                Err(e) => error!(
                    retry_in = ?self.config_retry,
                    "Failed to load configuration: {:#}", e
                ),
            }
            tokio::select! {
                _ = self.stop_program.cancelled() => return None,
                _ = tokio::time::sleep(self.config_retry) => {}
            }
        }
    }

    async fn run_once(&self, config: &GatewayConfig) -> Option<RunSummary> {
        let stop = self.stop_program.child_token();

        let parts = match PipelineParts::from_config(config) {
            Ok(parts) => parts,
            Err(e) => {
                error!("Failed to build pipeline: {:#}", e);
                return None;
            }
        };
        let pipeline = match Pipeline::launch(parts, stop) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("Failed to launch pipeline: {:#}", e);
                return None;
            }
        };

        pipeline.wait().await;
        Some(pipeline.shutdown().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tempfile_with(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    /// Configuration replaying `capture` once per run.
    fn config_for(capture: &NamedTempFile, restart: bool) -> NamedTempFile {
        tempfile_with(&format!(
            r#"
cycle_length_secs: 1
restart_on_failure: {restart}
transport:
  type: file
  path: "{}"
schedules:
  - cron: "* * * * * *"
    mode: immediate
    sink: journal
    apply_to: ["1-0:1.7.0"]
sinks:
  journal:
    type: logger
    topics:
      "1-0:1.7.0": power
"#,
            capture.path().display()
        ))
    }

    const CAPTURE: &str = "/FLU5\\253769484_A\r\n0-0:1.0.0(231215120005W)\r\n1-0:1.7.0(00.500*kW)\r\n!AAAA\r\n";

    #[tokio::test(flavor = "multi_thread")]
    async fn single_run_when_restart_disabled() {
        let capture = tempfile_with(CAPTURE);
        let config = config_for(&capture, false);
        let supervisor = Supervisor::new(config.path().to_path_buf(), CancellationToken::new());

        let runs = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .unwrap();
        assert_eq!(runs, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_runs_are_restarted_until_stop_program() {
        let capture = tempfile_with(CAPTURE);
        let config = config_for(&capture, true);
        let stop_program = CancellationToken::new();
        let supervisor = Supervisor::new(config.path().to_path_buf(), stop_program.clone());

        let stopper = stop_program.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            stopper.cancel();
        });

        let runs = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .unwrap();
        assert!(runs >= 2, "expected a restart, got {runs} run(s)");
    }

    #[tokio::test]
    async fn missing_config_is_retried_until_stopped() {
        let stop_program = CancellationToken::new();
        let supervisor = Supervisor::new(PathBuf::from("/nonexistent/gateway.yaml"), stop_program.clone())
            .with_config_retry(Duration::from_millis(20));

        let stopper = stop_program.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let runs = tokio::time::timeout(Duration::from_secs(2), supervisor.run())
            .await
            .unwrap();
        assert_eq!(runs, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_transport_counts_as_failed_run() {
        let config = tempfile_with(
            r#"
cycle_length_secs: 1
restart_on_failure: false
transport:
  type: file
  path: /nonexistent/ttyUSB0
sinks: {}
"#,
        );
        let supervisor = Supervisor::new(config.path().to_path_buf(), CancellationToken::new());
        let runs = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
            .await
            .unwrap();
        assert_eq!(runs, 1);
    }
}
