/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::collections::BTreeMap;
use std::io::Write;

use super::{Sink, SinkError};
use crate::telegram::Value;

/// Writes `label: value unit` lines to stdout.
pub struct PrintSink {
    name: String,
    topics: BTreeMap<String, String>,
}

impl PrintSink {
    pub fn new(name: &str, topics: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            topics,
        }
    }
}

/// `label: value unit`, or `label: value` without a unit.
pub(crate) fn render_line(label: &str, value: &Value, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{label}: {value} {unit}"),
        None => format!("{label}: {value}"),
    }
}

impl Sink for PrintSink {
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
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", render_line(label, value, unit)).map_err(|source| SinkError::Io {
            sink: self.name.clone(),
            source,
        })
    }
}
