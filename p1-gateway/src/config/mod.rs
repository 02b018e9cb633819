//! Gateway configuration loading and validation.
//!
//! The expected YAML structure is:
//! ```yaml
//! cycle_length_secs: 10
//! meter_timezone: Europe/Brussels
//! restart_on_failure: true
//! watchdog:
//!   enabled: true
//!   lifetime_cycles: 2160
//! transport:
//!   type: serial
//!   path: /dev/ttyUSB0
//!   baud_rate: 115200
//! transformations:
//!   - id: "1-0:1.8.x"
//!     operation: sum
//!     operands: ["1-0:1.8.1", "1-0:1.8.2"]
//!     unit: kWh
//! schedules:
//!   - name: live-power
//!     cron: "*/5 * * * *"
//!     mode: average
//!     sink: broker
//!     apply_to: ["1-0:1.7.0"]
//! sinks:
//!   broker:
//!     type: mqtt
//!     broker: localhost
//!     topics:
//!       "1-0:1.7.0": home/power/import
//! ```
//!
//! Sink and transport definitions are tagged by `type`; an unknown tag is a
//! load error, so the set of supported kinds is checked once at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::schedule::trigger::parse_cron;
use crate::telegram::CodeFilter;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// Kept private; callers work with [`GatewayConfig`].
#[derive(Debug, Deserialize)]
struct GatewayConfigFile {
    #[serde(default = "default_cycle_length_secs")]
    cycle_length_secs: u64,
    #[serde(default = "default_meter_timezone")]
    meter_timezone: String,
    #[serde(default = "default_true")]
    restart_on_failure: bool,
    #[serde(default)]
    watchdog: WatchdogConfig,
    transport: TransportConfig,
    #[serde(default)]
    transformations: Vec<TransformRule>,
    #[serde(default)]
    schedules: Vec<ScheduleConfig>,
    #[serde(default)]
    sinks: BTreeMap<String, SinkConfig>,
}

fn default_cycle_length_secs() -> u64 {
    10
}

fn default_meter_timezone() -> String {
    String::from("Europe/Brussels")
}

fn default_true() -> bool {
    true
}

fn default_lifetime_cycles() -> u32 {
    2160
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    String::from("p1-gateway")
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_cooldown_secs() -> u64 {
    30
}

// ── Public configuration types ────────────────────────────────────────────────

/// Lifetime watchdog: forces a full restart after `lifetime_cycles` cycles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_lifetime_cycles")]
    pub lifetime_cycles: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lifetime_cycles: default_lifetime_cycles(),
        }
    }
}

/// Where raw telegram lines come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// The meter's P1 port on a local serial adapter.
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// A serial-to-network bridge (ser2net or similar).
    Tcp { address: String },
    /// A captured telegram file, replayed once.
    File { path: PathBuf },
}

/// Operations a transformation rule may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOp {
    Sum,
}

/// One derived field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransformRule {
    /// OBIS id the result is stored under.
    pub id: String,
    pub operation: TransformOp,
    pub operands: Vec<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// How a schedule aggregates between firings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Immediate,
    Average,
    Changed,
}

/// One dispatch rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// 5-field (minute resolution) or 6/7-field (seconds first) cron expression.
    pub cron: String,
    pub mode: ScheduleMode,
    /// Name of the target sink in [`GatewayConfig::sinks`].
    pub sink: String,
    /// OBIS codes (optionally `code/index`) this schedule dispatches.
    pub apply_to: Vec<String>,
}

/// Severity used by the logger sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[serde(alias = "TRACE")]
    Trace,
    #[serde(alias = "DEBUG")]
    Debug,
    #[default]
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "WARN", alias = "WARNING")]
    Warn,
    #[serde(alias = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PrintSinkConfig {
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggerSinkConfig {
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MqttSinkConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// MQTT quality of service, 0–2.
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    /// Fixed window during which reconnects are suppressed after a failure.
    #[serde(default = "default_reconnect_cooldown_secs")]
    pub reconnect_cooldown_secs: u64,
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
}

/// A sink definition, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Print(PrintSinkConfig),
    Logger(LoggerSinkConfig),
    Mqtt(MqttSinkConfig),
}

impl SinkConfig {
    /// OBIS code → label mapping of this sink.
    pub fn topics(&self) -> &BTreeMap<String, String> {
        match self {
            SinkConfig::Print(c) => &c.topics,
            SinkConfig::Logger(c) => &c.topics,
            SinkConfig::Mqtt(c) => &c.topics,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Print(_) => "print",
            SinkConfig::Logger(_) => "logger",
            SinkConfig::Mqtt(_) => "mqtt",
        }
    }
}

// ── GatewayConfig ─────────────────────────────────────────────────────────────

/// Validated gateway configuration.
///
/// Loaded once per pipeline run; a restart reloads it from disk.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bound for every blocking wait (channel pops, transport reads, watchdog tick).
    pub cycle_length: Duration,
    pub meter_timezone: Tz,
    pub restart_on_failure: bool,
    pub watchdog: WatchdogConfig,
    pub transport: TransportConfig,
    pub transformations: Vec<TransformRule>,
    pub schedules: Vec<ScheduleConfig>,
    pub sinks: BTreeMap<String, SinkConfig>,
}

impl GatewayConfig {
    /// Parses and validates the YAML file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is structurally
    /// invalid, or validation fails (unknown sink, bad cron expression,
    /// unknown timezone, …).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading gateway configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: GatewayConfigFile =
            serde_yaml::from_str(content).context("Failed to parse YAML")?;

        let meter_timezone: Tz = file
            .meter_timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("unknown meter timezone '{}': {}", file.meter_timezone, e))?;

        let config = GatewayConfig {
            cycle_length: Duration::from_secs(file.cycle_length_secs),
            meter_timezone,
            restart_on_failure: file.restart_on_failure,
            watchdog: file.watchdog,
            transport: file.transport,
            transformations: file.transformations,
            schedules: file.schedules,
            sinks: file.sinks,
        };
        config.validate()?;

        info!(
            schedules = config.schedules.len(),
            transformations = config.transformations.len(),
            sinks = config.sinks.len(),
            cycle_length = ?config.cycle_length,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cycle_length.is_zero() {
            bail!("cycle_length_secs must be greater than zero");
        }
        if self.watchdog.enabled && self.watchdog.lifetime_cycles == 0 {
            bail!("watchdog.lifetime_cycles must be greater than zero");
        }
        if self.schedules.is_empty() {
            warn!("No schedules configured, nothing will be dispatched");
        }

        for (index, schedule) in self.schedules.iter().enumerate() {
            let name = schedule_name(schedule, index);
            if schedule.apply_to.is_empty() {
                bail!("schedule '{}' has an empty apply_to list", name);
            }
            if !self.sinks.contains_key(&schedule.sink) {
                bail!("schedule '{}' targets unknown sink '{}'", name, schedule.sink);
            }
            parse_cron(&schedule.cron)
                .with_context(|| format!("schedule '{}' has an invalid cron expression", name))?;
            debug!(
                "  Schedule: {} | cron: {} | mode: {:?} | sink: {} | codes: {}",
                name,
                schedule.cron,
                schedule.mode,
                schedule.sink,
                schedule.apply_to.len(),
            );
        }

        if let TransportConfig::File { path } = &self.transport {
            if path.starts_with("/dev") {
                warn!(
                    path = %path.display(),
                    "File transport reads are unbounded, use the serial transport for device nodes"
                );
            }
        }

        for (name, sink) in &self.sinks {
            if let SinkConfig::Mqtt(mqtt) = sink {
                if mqtt.qos > 2 {
                    bail!("sink '{}': qos must be 0, 1 or 2 (got {})", name, mqtt.qos);
                }
            }
            if sink.topics().is_empty() {
                warn!(sink = %name, kind = sink.kind(), "Sink has no topics, it will never publish");
            }
        }

        let filter = self.filter_set();
        for rule in &self.transformations {
            if rule.operands.is_empty() {
                bail!("transformation '{}' has no operands", rule.id);
            }
            for operand in &rule.operands {
                if !operand_is_decoded(&filter, operand) {
                    warn!(
                        transformation = %rule.id,
                        operand = %operand,
                        "Operand is not in any schedule's apply_to list and will always read as zero"
                    );
                }
            }
        }

        Ok(())
    }

    /// Codes the decoder retains: the union of every schedule's `apply_to`.
    pub fn filter_set(&self) -> CodeFilter {
        CodeFilter::only(self.schedules.iter().flat_map(|s| s.apply_to.iter()))
    }
}

/// Display name of the schedule at `index`.
pub fn schedule_name(schedule: &ScheduleConfig, index: usize) -> String {
    schedule
        .name
        .clone()
        .unwrap_or_else(|| format!("schedule-{}", index + 1))
}

fn operand_is_decoded(filter: &CodeFilter, operand: &str) -> bool {
    crate::telegram::split_code(operand)
        .map(|(base, _)| filter.accepts(base))
        .unwrap_or(false)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
