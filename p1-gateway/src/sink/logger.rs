/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::collections::BTreeMap;

use tracing::{debug, error, info, trace, warn};

use super::print::render_line;
use super::{Sink, SinkError};
use crate::config::LogLevel;
use crate::telegram::Value;

/// Emits each reading as a `tracing` event at a fixed level.
pub struct LoggerSink {
    name: String,
    topics: BTreeMap<String, String>,
    level: LogLevel,
}

impl LoggerSink {
    pub fn new(name: &str, topics: BTreeMap<String, String>, level: LogLevel) -> Self {
        Self {
            name: name.to_string(),
            topics,
            level,
        }
    }
}

impl Sink for LoggerSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> &BTreeMap<String, String> {
        &self.topics
    }

    fn process_information(
        &self,
        label: &str,
        value: &Value,
        unit: Option<&str>,
    ) -> Result<(), SinkError> {
        let line = render_line(label, value, unit);
        let sink = self.name.as_str();
        // tracing levels are static per callsite
        match self.level {
            LogLevel::Trace => trace!(sink, "{line}"),
            LogLevel::Debug => debug!(sink, "{line}"),
            LogLevel::Info => info!(sink, "{line}"),
            LogLevel::Warn => warn!(sink, "{line}"),
            LogLevel::Error => error!(sink, "{line}"),
        }
        Ok(())
    }
}
