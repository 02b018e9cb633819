/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Decoded P1 telegrams.
//!
//! A meter emits one telegram per reporting interval:
//!
//! ```text
//! /FLU5\253769484_A                  ← frame start (header)
//!
//! 0-0:1.0.0(231215120000S)           ← message timestamp
//! 1-0:1.8.1(001234.567*kWh)          ← one value slot with unit
//! 0-1:24.2.3(231215115500S)(00012.345*m3)   ← two value slots
//! !1A2B                              ← frame end (signature)
//! ```
//!
//! [`TelegramDecoder`] turns those lines into a [`Sequence`]: a map from OBIS
//! code to its ordered value slots.  Multi-valued codes are addressed as
//! `code/index` (`0-1:24.2.3/1` is the gas volume above); a bare code means
//! index 0.
//!
//! # Ownership model
//! A `Sequence` is created by the decoder, **moved** to the dispatch stage
//! once its signature is recorded, transformed exactly once and then only
//! read.  Nothing keeps a reference to it after dispatch; schedules that need
//! history copy the values they care about.

pub mod decoder;
pub mod error;

pub use decoder::{CodeFilter, TelegramDecoder};
pub use error::DecodeError;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// The OBIS code carrying the telegram's own timestamp.
pub const TIMESTAMP_CODE: &str = "0-0:1.0.0";

// ── Values ────────────────────────────────────────────────────────────────────

/// Semantic value of one parenthesized segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Numeric reading, kept at the meter's precision (`001234.567` → `1234.567`).
    Number(Decimal),
    /// Free text, e.g. an equipment identifier or a text message.
    Text(String),
    /// A meter-local date normalized to UTC.
    Timestamp(DateTime<Utc>),
    /// A reference to another OBIS code (used by event logs).
    Code(String),
}

impl Value {
    /// The numeric payload, or `None` for non-numeric values.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(d) => Some(*d),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(Decimal::ZERO)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(d) => write!(f, "{d}"),
            Value::Text(s) | Value::Code(s) => f.write_str(s),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// One value with its optional unit (`kWh`, `kW`, `V`, `A`, `m3`, `s`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSlot {
    pub value: Value,
    pub unit: Option<String>,
}

impl ValueSlot {
    pub fn new(value: Value, unit: Option<String>) -> Self {
        Self { value, unit }
    }
}

/// Split `code/index` into its base code and slot index.
///
/// A code without `/` addresses index 0.  Returns `None` when the index part
/// is not a number, so lookups with a malformed address never match.
pub fn split_code(code: &str) -> Option<(&str, usize)> {
    match code.split_once('/') {
        Some((base, index)) => index.parse().ok().map(|i| (base, i)),
        None => Some((code, 0)),
    }
}

// ── Sequence ──────────────────────────────────────────────────────────────────

/// In-memory representation of one decoded telegram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    header: Option<String>,
    signature: Option<String>,
    message_time: Option<DateTime<Utc>>,
    /// `BTreeMap` so iteration (logs, snapshots, `p1-decode` output) is
    /// ordered by code.
    fields: BTreeMap<String, Vec<ValueSlot>>,
    transformed: bool,
}

impl Sequence {
    pub fn new(header: Option<String>) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// `true` once the frame-end line has been recorded.
    pub fn is_closed(&self) -> bool {
        self.signature.is_some()
    }

    pub(crate) fn close(&mut self, signature: String) {
        self.signature = Some(signature);
    }

    /// Telegram timestamp, `None` until the `0-0:1.0.0` line was decoded.
    pub fn message_time(&self) -> Option<DateTime<Utc>> {
        self.message_time
    }

    pub fn set_message_time(&mut self, time: DateTime<Utc>) {
        self.message_time = Some(time);
    }

    /// Append decoded slots for `code`.
    ///
    /// A code seen twice in one telegram keeps both: the new slots follow the
    /// existing ones.
    ///
    /// # Errors
    /// [`DecodeError::SequenceClosed`] once the signature is recorded.
    pub fn add_information(&mut self, code: &str, slots: Vec<ValueSlot>) -> Result<(), DecodeError> {
        if self.is_closed() {
            return Err(DecodeError::SequenceClosed {
                code: code.to_string(),
            });
        }
        self.fields.entry(code.to_string()).or_default().extend(slots);
        Ok(())
    }

    /// The slot addressed by `code` (`base` or `base/index`).
    pub fn slot(&self, code: &str) -> Option<&ValueSlot> {
        let (base, index) = split_code(code)?;
        self.fields.get(base)?.get(index)
    }

    pub fn has_information(&self, code: &str) -> bool {
        self.slot(code).is_some()
    }

    /// Value addressed by `code`; zero when absent.
    pub fn value(&self, code: &str) -> Value {
        self.slot(code).map(|s| s.value.clone()).unwrap_or_default()
    }

    /// Numeric value addressed by `code`; zero when absent or not numeric.
    pub fn number(&self, code: &str) -> Decimal {
        self.slot(code)
            .and_then(|s| s.value.as_decimal())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn unit(&self, code: &str) -> Option<&str> {
        self.slot(code).and_then(|s| s.unit.as_deref())
    }

    /// All slots stored under a base code.
    pub fn slots(&self, base: &str) -> &[ValueSlot] {
        self.fields.get(base).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Base codes present in this Sequence, in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    /// Store a derived field, replacing whatever `code` held.
    ///
    /// Only the transformation engine writes here, and only before
    /// [`mark_transformed`](Self::mark_transformed).
    pub(crate) fn insert_derived(&mut self, code: &str, value: Decimal, unit: Option<String>) {
        self.fields.insert(
            code.to_string(),
            vec![ValueSlot::new(Value::Number(value), unit)],
        );
    }

    pub(crate) fn mark_transformed(&mut self) {
        self.transformed = true;
    }

    /// Set the value addressed by `code`.
    ///
    /// An existing slot keeps its unit.  A missing slot is created with
    /// `unit`, padding lower indices with default slots.  Used on
    /// per-schedule dispatch copies only.
    pub(crate) fn set_value(&mut self, code: &str, value: Value, unit: Option<String>) {
        let Some((base, index)) = split_code(code) else {
            return;
        };
        let slots = self.fields.entry(base.to_string()).or_default();
        match slots.get_mut(index) {
            Some(slot) => slot.value = value,
            None => {
                slots.resize(index, ValueSlot::new(Value::default(), None));
                slots.push(ValueSlot::new(value, unit));
            }
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence {}", self.header.as_deref().unwrap_or("<no header>"))?;
        if let Some(sig) = &self.signature {
            write!(f, " [{sig}]")?;
        }
        match self.message_time {
            Some(t) => writeln!(f, " @ {}", t.to_rfc3339())?,
            None => writeln!(f, " @ <no timestamp>")?,
        }
        for (code, slots) in &self.fields {
            for (i, slot) in slots.iter().enumerate() {
                let label = if i == 0 {
                    code.clone()
                } else {
                    format!("{code}/{i}")
                };
                match &slot.unit {
                    Some(unit) => writeln!(f, "  {label} = {} {unit}", slot.value)?,
                    None => writeln!(f, "  {label} = {}", slot.value)?,
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
