/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Line-driven telegram decoder.
//!
//! [`TelegramDecoder::feed`] classifies every line as one of:
//!
//! | Line | Example | Effect |
//! |---|---|---|
//! | frame start | `/FLU5\253769484_A` | discard the in-progress Sequence, open a new one |
//! | frame end | `!1A2B` | record the signature, hand the Sequence off |
//! | timestamp | `0-0:1.0.0(231215120000S)` | set the message time |
//! | interior | `1-0:1.8.1(001234.567*kWh)` | add value slots (filtered) |
//!
//! Interior value segments are classified in precedence order: number with
//! optional `*unit`, `YYMMDDhhmmss[SW]` date, OBIS code reference, raw text.
//! A malformed interior line is logged and skipped; it never aborts the
//! Sequence.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use super::error::DecodeError;
use super::{split_code, Sequence, Value, ValueSlot, TIMESTAMP_CODE};

// ── Grammar ───────────────────────────────────────────────────────────────────

static FRAME_START: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^/\w{3}\d?\\"));

static FRAME_END: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^!([0-9A-Fa-f]{4})?$"));

static LINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^\d+-\d+:\d+\.\d+\.\d+(?:\.\d+)?(?:\*\d+)?"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^(\d+(?:\.\d+)?)(?:\*(\S+))?$"));

static STAMP: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^(\d{12})([SW])$"));

static CODE_REF: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^\d+-\d+:\d+\.\d+\.\d+$"));

/// Equipment identifiers are hex-encoded text that may happen to be all digits.
static EQUIPMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^0-\d+:96\.1\.\d+"));

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // every pattern is forced by `grammar_patterns_compile`
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

// ── Code filter ───────────────────────────────────────────────────────────────

/// Which OBIS codes the decoder retains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeFilter {
    /// Keep every code (used for offline inspection).
    Any,
    /// Keep only these base codes.
    Only(BTreeSet<String>),
}

impl CodeFilter {
    /// Build a filter from applicable-code addresses; `/index` suffixes are
    /// stripped so `1-0:99.1/1` retains the whole `1-0:99.1` line.
    pub fn only<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = codes
            .into_iter()
            .filter_map(|c| split_code(c.as_ref()).map(|(base, _)| base.to_string()))
            .collect();
        CodeFilter::Only(set)
    }

    pub fn accepts(&self, code: &str) -> bool {
        match self {
            CodeFilter::Any => true,
            CodeFilter::Only(set) => set.contains(code),
        }
    }
}

// ── Line classification ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    /// Blank or a single stray character.
    Noise,
    FrameStart,
    FrameEnd,
    Interior,
}

fn classify(line: &str) -> LineKind {
    // frame markers first: a bare `!` is one character long
    if FRAME_START.is_match(line) {
        LineKind::FrameStart
    } else if FRAME_END.is_match(line) {
        LineKind::FrameEnd
    } else if line.chars().nth(1).is_none() {
        LineKind::Noise
    } else {
        LineKind::Interior
    }
}

/// Split an interior line into its OBIS code and raw segment contents.
fn split_segments(line: &str) -> Result<(&str, Vec<&str>), DecodeError> {
    let code = LINE_CODE
        .find(line)
        .ok_or_else(|| DecodeError::MissingCode {
            line: line.to_string(),
        })?
        .as_str();

    let mut segments = Vec::new();
    let mut offset = code.len();
    let mut rest = &line[offset..];

    while !rest.is_empty() {
        let Some(body) = rest.strip_prefix('(') else {
            return Err(DecodeError::UnexpectedToken {
                code: code.to_string(),
                token: rest.to_string(),
            });
        };
        let close = body.find(')').ok_or(DecodeError::UnterminatedSegment {
            code: code.to_string(),
            offset,
        })?;
        segments.push(&body[..close]);
        offset += close + 2;
        rest = &body[close + 1..];
    }

    if segments.is_empty() {
        return Err(DecodeError::NoValue {
            code: code.to_string(),
        });
    }
    Ok((code, segments))
}

/// Localize a `YYMMDDhhmmss` + `S`/`W` stamp in `zone` and normalize to UTC.
///
/// The flag only matters for the repeated hour when daylight saving ends:
/// `S` picks the earlier (summer) instant, `W` the later (winter) one.
pub fn parse_meter_time(digits: &str, flag: &str, zone: Tz) -> Result<DateTime<Utc>, DecodeError> {
    let raw = format!("{digits}{flag}");
    let invalid = || DecodeError::InvalidTimestamp { raw: raw.clone() };

    let field = |range: std::ops::Range<usize>| -> Result<u32, DecodeError> {
        digits
            .get(range)
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)
    };

    let (year, month, day) = (2000 + field(0..2)? as i32, field(2..4)?, field(4..6)?);
    let (hour, minute, second) = (field(6..8)?, field(8..10)?, field(10..12)?);
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)?;

    let local = match zone.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(a, b) => {
            let (summer, winter) = if a <= b { (a, b) } else { (b, a) };
            if flag == "S" {
                summer
            } else {
                winter
            }
        }
        LocalResult::None => {
            return Err(DecodeError::NonexistentLocalTime {
                raw,
                zone: zone.name().to_string(),
            })
        }
    };
    Ok(local.with_timezone(&Utc))
}

// ── TelegramDecoder ───────────────────────────────────────────────────────────

/// Builds [`Sequence`]s from raw telegram lines.
///
/// Owned by the decode stage; holds at most one in-progress Sequence.
#[derive(Debug)]
pub struct TelegramDecoder {
    filter: CodeFilter,
    zone: Tz,
    current: Option<Sequence>,
}

impl TelegramDecoder {
    /// Create a decoder retaining `filter` codes and localizing meter
    /// timestamps in `zone`.
    pub fn new(filter: CodeFilter, zone: Tz) -> Self {
        Self {
            filter,
            zone,
            current: None,
        }
    }

    /// The Sequence being populated, if a frame is open.
    pub fn in_progress(&self) -> Option<&Sequence> {
        self.current.as_ref()
    }

    /// Feed one raw line.
    ///
    /// Returns the finalized Sequence when `line` is a frame end that closes
    /// an open frame.
    pub fn feed(&mut self, line: &str) -> Option<Sequence> {
        let line = line.trim();

        match classify(line) {
            LineKind::Noise => {
                if !line.is_empty() {
                    trace!(line, "noise line skipped");
                }
                None
            }
            LineKind::FrameStart => {
                if let Some(stale) = self.current.take() {
                    debug!(
                        header = stale.header().unwrap_or_default(),
                        "discarding incomplete sequence"
                    );
                }
                self.current = Some(Sequence::new(Some(line.to_string())));
                None
            }
            LineKind::FrameEnd => match self.current.take() {
                Some(mut seq) => {
                    seq.close(line.to_string());
                    Some(seq)
                }
                None => {
                    debug!(signature = line, "frame end outside a frame, ignored");
                    None
                }
            },
            LineKind::Interior => {
                if self.current.is_none() {
                    trace!(line, "line outside a frame, ignored");
                    return None;
                }
                if let Err(e) = self.feed_interior(line) {
                    warn!(error = %e, line, "skipping telegram line");
                }
                None
            }
        }
    }

    fn feed_interior(&mut self, line: &str) -> Result<(), DecodeError> {
        let (code, segments) = split_segments(line)?;
        let zone = self.zone;

        if code == TIMESTAMP_CODE {
            let caps = STAMP
                .captures(segments[0])
                .ok_or_else(|| DecodeError::InvalidTimestamp {
                    raw: segments[0].to_string(),
                })?;
            let time = parse_meter_time(&caps[1], &caps[2], zone)?;
            if let Some(seq) = self.current.as_mut() {
                seq.set_message_time(time);
            }
            return Ok(());
        }

        if !self.filter.accepts(code) {
            trace!(code, "code not in filter set, dropped");
            return Ok(());
        }

        let keep_text = EQUIPMENT_ID.is_match(code);
        let slots = segments
            .into_iter()
            .map(|raw| classify_segment(raw, keep_text, zone))
            .collect::<Result<Vec<_>, _>>()?;

        match self.current.as_mut() {
            Some(seq) => seq.add_information(code, slots),
            None => Ok(()),
        }
    }
}

fn classify_segment(raw: &str, keep_text: bool, zone: Tz) -> Result<ValueSlot, DecodeError> {
    if keep_text {
        return Ok(ValueSlot::new(Value::Text(raw.to_string()), None));
    }
    if let Some(caps) = NUMBER.captures(raw) {
        // The pattern only admits digits and one dot, which always parse.
        if let Ok(number) = caps[1].parse::<Decimal>() {
            let unit = caps.get(2).map(|m| m.as_str().to_string());
            return Ok(ValueSlot::new(Value::Number(number), unit));
        }
    }
    if let Some(caps) = STAMP.captures(raw) {
        let time = parse_meter_time(&caps[1], &caps[2], zone)?;
        return Ok(ValueSlot::new(Value::Timestamp(time), None));
    }
    if CODE_REF.is_match(raw) {
        return Ok(ValueSlot::new(Value::Code(raw.to_string()), None));
    }
    Ok(ValueSlot::new(Value::Text(raw.to_string()), None))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
