/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Downstream consumers of dispatched readings.
//!
//! A [`Sink`] receives `(label, value, unit)` triples.  Labels come from the
//! sink's own topic mapping (OBIS code → label), so the same reading can be
//! published as `home/energy/t1` on MQTT and as `T1 import` on the console.
//!
//! Sinks are built once per pipeline run by [`SinkRegistry::from_config`],
//! used only by the dispatch stage, and closed by the supervisor during
//! every teardown.
//!
//! | `type` | Sink | Delivery |
//! |---|---|---|
//! | `print` | [`PrintSink`] | stdout |
//! | `logger` | [`LoggerSink`] | `tracing` event at a configured level |
//! | `mqtt` | [`MqttSink`] | best effort, dropped while disconnected |

pub mod cooldown;
pub mod logger;
pub mod mqtt;
pub mod print;

pub use cooldown::Cooldown;
pub use logger::LoggerSink;
pub use mqtt::MqttSink;
pub use print::PrintSink;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::SinkConfig;
use crate::telegram::{Sequence, Value};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Recoverable sink failures; logged by the caller, never fatal to the run.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be constructed from its configuration.
    #[error("sink '{sink}' could not be created: {reason}")]
    Build { sink: String, reason: String },

    /// A single reading could not be handed to the downstream system.
    #[error("sink '{sink}' failed to publish '{label}': {reason}")]
    Publish {
        sink: String,
        label: String,
        reason: String,
    },

    #[error("sink '{sink}' I/O error: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Sink capability ───────────────────────────────────────────────────────────

/// A downstream consumer of readings.
pub trait Sink: Send + Sync {
    /// Registry name of this sink.
    fn name(&self) -> &str;

    /// OBIS code → label mapping.
    fn topics(&self) -> &BTreeMap<String, String>;

    /// Deliver one reading.
    fn process_information(&self, label: &str, value: &Value, unit: Option<&str>)
        -> Result<(), SinkError>;

    /// Deliver every code of `apply_to` that is present both in `sequence`
    /// and in this sink's topic mapping.
    ///
    /// A failing reading is logged and does not stop the others.
    fn process_sequence(&self, sequence: &Sequence, apply_to: &[String]) {
        for code in apply_to {
            let (Some(slot), Some(label)) = (sequence.slot(code), self.topics().get(code)) else {
                continue;
            };
            if let Err(e) = self.process_information(label, &slot.value, slot.unit.as_deref()) {
                warn!(sink = self.name(), code = %code, error = %e, "reading dropped");
            }
        }
    }

    /// Release resources.  Called once per teardown, successful or not.
    fn close(&self) {}
}

// ── SinkRegistry ──────────────────────────────────────────────────────────────

/// Name → sink, built once per run.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: BTreeMap<String, Box<dyn Sink>>,
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured sink.
    ///
    /// Must run inside a Tokio runtime: network sinks spawn their connection
    /// driver on it.
    ///
    /// # Errors
    /// The first sink that fails to build; sinks built before it are closed.
    pub fn from_config(configs: &BTreeMap<String, SinkConfig>) -> Result<Self, SinkError> {
        let mut registry = Self::new();
        for (name, config) in configs {
            match build_sink(name, config) {
                Ok(sink) => {
                    info!(sink = %name, kind = config.kind(), "sink ready");
                    registry.insert(sink);
                }
                Err(e) => {
                    registry.close_all();
                    return Err(e);
                }
            }
        }
        Ok(registry)
    }

    /// Register `sink` under its own name, replacing any previous entry.
    pub fn insert(&mut self, sink: Box<dyn Sink>) {
        self.sinks.insert(sink.name().to_string(), sink);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Sink> {
        self.sinks.get(name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Close every sink.
    pub fn close_all(&self) {
        for (name, sink) in &self.sinks {
            sink.close();
            info!(sink = %name, "sink closed");
        }
    }
}

/// Constructor table: one arm per supported sink kind.
fn build_sink(name: &str, config: &SinkConfig) -> Result<Box<dyn Sink>, SinkError> {
    Ok(match config {
        SinkConfig::Print(c) => Box::new(PrintSink::new(name, c.topics.clone())),
        SinkConfig::Logger(c) => Box::new(LoggerSink::new(name, c.topics.clone(), c.level)),
        SinkConfig::Mqtt(c) => Box::new(MqttSink::connect(name, c)?),
    })
}

// ── Test double ───────────────────────────────────────────────────────────────


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::config::{LogLevel, LoggerSinkConfig, PrintSinkConfig};
    use crate::telegram::ValueSlot;
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;

    fn sequence() -> Sequence {
        let mut seq = Sequence::new(None);
        seq.add_information(
            "1-0:1.8.1",
            vec![ValueSlot::new(Value::Number(Decimal::new(1234567, 3)), Some("kWh".into()))],
        )
        .unwrap();
        seq.add_information(
            "1-0:99.1",
            vec![
                ValueSlot::new(Value::Number(Decimal::ONE), None),
                ValueSlot::new(Value::Text("b".into()), None),
            ],
        )
        .unwrap();
        seq
    }

    #[test]
    fn process_sequence_needs_code_in_sequence_and_topics() {
        let sink = RecordingSink::new("rec", &["1-0:1.8.1", "1-0:2.8.1", "1-0:99.1/1"]);
        let records = sink.records.clone();
        let apply_to: Vec<String> = ["1-0:1.8.1", "1-0:2.8.1", "1-0:99.1", "1-0:99.1/1"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        sink.process_sequence(&sequence(), &apply_to);

        let got = records.lock().unwrap().clone();
        assert_eq!(
            got,
            vec![
                ("1-0:1.8.1".to_string(), "1234.567".to_string(), Some("kWh".to_string())),
                ("1-0:99.1/1".to_string(), "b".to_string(), None),
            ]
        );
    }

    #[test]
    fn registry_builds_local_sinks_by_kind() {
        let mut configs = BTreeMap::new();
        configs.insert("console".to_string(), SinkConfig::Print(PrintSinkConfig::default()));
        configs.insert(
            "journal".to_string(),
            SinkConfig::Logger(LoggerSinkConfig {
                topics: BTreeMap::new(),
                level: LogLevel::Debug,
            }),
        );

        let registry = SinkRegistry::from_config(&configs).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["console", "journal"]);
        assert!(registry.get("journal").is_some());
        assert!(registry.get("broker").is_none());
    }

    #[test]
    fn close_all_closes_every_sink() {
        let a = RecordingSink::new("a", &[]);
        let b = RecordingSink::new("b", &[]);
        let (a_closed, b_closed) = (a.closed.clone(), b.closed.clone());

        let mut registry = SinkRegistry::new();
        registry.insert(Box::new(a));
        registry.insert(Box::new(b));
        registry.close_all();

        assert!(a_closed.load(Ordering::SeqCst));
        assert!(b_closed.load(Ordering::SeqCst));
    }
}
