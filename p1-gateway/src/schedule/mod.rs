/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-schedule dispatch decisions.
//!
//! Every [`Schedule`] is a two-state machine driven by Sequence timestamps,
//! not by a wall clock:
//!
//! ```text
//!   WAITING  message_time <  next_trigger   → accumulate (average mode only)
//!   FIRING   message_time >= next_trigger   → dispatch, advance next_trigger
//! ```
//!
//! A schedule therefore fires on the first Sequence that reaches or passes
//! its trigger.  After firing, the next trigger is the first cron occurrence
//! strictly after the previous trigger, so a late Sequence catches up one
//! occurrence at a time.
//!
//! The engine owns all schedule state.  [`ScheduleEngine::evaluate`] only
//! decides; [`ScheduleEngine::process`] additionally routes each decision to
//! the target sink.

pub mod error;
pub mod trigger;

pub use error::ScheduleError;

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use crate::config::{schedule_name, ScheduleConfig, ScheduleMode};
use crate::sink::SinkRegistry;
use crate::telegram::{Sequence, Value};

/// Decimal places of a dispatched average.
const AVERAGE_SCALE: u32 = 3;

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// One firing: which codes of which Sequence go to which sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch<'a> {
    pub schedule: String,
    pub sink: String,
    /// Borrowed for `immediate`/`changed`; an averaged copy for `average`.
    pub sequence: Cow<'a, Sequence>,
    pub codes: Vec<String>,
}

// ── Schedule ──────────────────────────────────────────────────────────────────

/// Numeric values of one code collected while waiting, with the last unit
/// they carried.
#[derive(Debug, Clone, Default)]
struct AverageBuffer {
    values: Vec<Decimal>,
    unit: Option<String>,
}

#[derive(Debug, Clone)]
enum ModeState {
    Immediate,
    Average(BTreeMap<String, AverageBuffer>),
    /// Values at the last firing; `None` until the first one.
    Changed(Option<BTreeMap<String, Option<Value>>>),
}

#[derive(Debug, Clone)]
pub struct Schedule {
    name: String,
    sink: String,
    apply_to: Vec<String>,
    cron: CronSchedule,
    next_trigger: Option<DateTime<Utc>>,
    state: ModeState,
}

impl Schedule {
    /// Build a schedule whose first trigger is the first occurrence after
    /// `start`.
    pub fn new(
        name: String,
        config: &ScheduleConfig,
        start: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        if config.apply_to.is_empty() {
            return Err(ScheduleError::NoApplicableCodes { schedule: name });
        }
        let cron = trigger::parse_cron(&config.cron)?;
        let next_trigger = trigger::next_after(&cron, start);
        if next_trigger.is_none() {
            warn!(schedule = %name, cron = %config.cron, "cron expression has no future occurrence");
        }
        let state = match config.mode {
            ScheduleMode::Immediate => ModeState::Immediate,
            ScheduleMode::Average => ModeState::Average(BTreeMap::new()),
            ScheduleMode::Changed => ModeState::Changed(None),
        };
        Ok(Self {
            name,
            sink: config.sink.clone(),
            apply_to: config.apply_to.clone(),
            cron,
            next_trigger,
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    pub fn apply_to(&self) -> &[String] {
        &self.apply_to
    }

    /// `None` once the cron expression is exhausted.
    pub fn next_trigger(&self) -> Option<DateTime<Utc>> {
        self.next_trigger
    }

    pub fn mode(&self) -> ScheduleMode {
        match self.state {
            ModeState::Immediate => ScheduleMode::Immediate,
            ModeState::Average(_) => ScheduleMode::Average,
            ModeState::Changed(_) => ScheduleMode::Changed,
        }
    }

    /// Number of values waiting in the average buffer of `code`.
    pub fn pending(&self, code: &str) -> usize {
        match &self.state {
            ModeState::Average(buffers) => buffers.get(code).map_or(0, |b| b.values.len()),
            _ => 0,
        }
    }

    /// Feed one timestamped Sequence; returns a dispatch when firing.
    fn evaluate<'a>(&mut self, sequence: &'a Sequence, at: DateTime<Utc>) -> Option<Dispatch<'a>> {
        let trigger = self.next_trigger?;

        if at < trigger {
            if let ModeState::Average(buffers) = &mut self.state {
                for code in &self.apply_to {
                    let Some(slot) = sequence.slot(code) else {
                        continue;
                    };
                    if let Some(v) = slot.value.as_decimal() {
                        let buffer = buffers.entry(code.clone()).or_default();
                        buffer.values.push(v);
                        buffer.unit.clone_from(&slot.unit);
                    }
                }
            }
            return None;
        }

        let (view, codes) = match &mut self.state {
            ModeState::Immediate => (Cow::Borrowed(sequence), self.apply_to.clone()),
            ModeState::Average(buffers) => {
                let mut copy = sequence.clone();
                // a code missing from the firing Sequence is still sent as its mean
                for (code, buffer) in std::mem::take(buffers) {
                    if let Some(mean) = mean(&buffer.values) {
                        copy.set_value(&code, Value::Number(mean), buffer.unit);
                    }
                }
                (Cow::Owned(copy), self.apply_to.clone())
            }
            ModeState::Changed(last) => {
                let current: BTreeMap<String, Option<Value>> = self
                    .apply_to
                    .iter()
                    .map(|code| (code.clone(), sequence.slot(code).map(|s| s.value.clone())))
                    .collect();
                let codes = match last.as_ref() {
                    None => self.apply_to.clone(),
                    Some(previous) => self
                        .apply_to
                        .iter()
                        .filter(|code| previous.get(*code) != current.get(*code))
                        .cloned()
                        .collect(),
                };
                *last = Some(current);
                (Cow::Borrowed(sequence), codes)
            }
        };

        self.advance(trigger);
        debug!(
            schedule = %self.name,
            sink = %self.sink,
            trigger = %trigger,
            codes = codes.len(),
            "schedule fired"
        );

        Some(Dispatch {
            schedule: self.name.clone(),
            sink: self.sink.clone(),
            sequence: view,
            codes,
        })
    }

    fn advance(&mut self, fired: DateTime<Utc>) {
        self.next_trigger = trigger::next_after(&self.cron, fired);
        if self.next_trigger.is_none() {
            warn!(schedule = %self.name, "cron expression exhausted, schedule retired");
        }
    }
}

/// Mean rounded half-even to [`AVERAGE_SCALE`] places; `None` when empty.
fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().sum();
    let mean = sum / Decimal::from(values.len());
    Some(mean.round_dp_with_strategy(AVERAGE_SCALE, RoundingStrategy::MidpointNearestEven))
}

// ── ScheduleEngine ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ScheduleEngine {
    schedules: Vec<Schedule>,
}

impl ScheduleEngine {
    /// Build every configured schedule, in declaration order.
    pub fn from_config(
        configs: &[ScheduleConfig],
        start: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let schedules = configs
            .iter()
            .enumerate()
            .map(|(i, c)| Schedule::new(schedule_name(c, i), c, start))
            .collect::<Result<Vec<_>, _>>()?;
        for s in &schedules {
            info!(
                schedule = %s.name,
                mode = ?s.mode(),
                sink = %s.sink,
                codes = s.apply_to.len(),
                first_trigger = ?s.next_trigger,
                "schedule armed"
            );
        }
        Ok(Self { schedules })
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Run every schedule against `sequence`.
    ///
    /// A Sequence without a timestamp leaves every schedule untouched.
    pub fn evaluate<'a>(&mut self, sequence: &'a Sequence) -> Vec<Dispatch<'a>> {
        let Some(at) = sequence.message_time() else {
            debug!("sequence without timestamp, schedules skipped");
            return Vec::new();
        };
        self.schedules
            .iter_mut()
            .filter_map(|s| s.evaluate(sequence, at))
            .collect()
    }

    /// Evaluate and hand every decision to its sink; returns the number of
    /// dispatches routed.
    pub fn process(&mut self, sequence: &Sequence, sinks: &SinkRegistry) -> usize {
        let mut routed = 0;
        for dispatch in self.evaluate(sequence) {
            match sinks.get(&dispatch.sink) {
                Some(sink) => {
                    sink.process_sequence(&dispatch.sequence, &dispatch.codes);
                    routed += 1;
                }
                None => warn!(
                    schedule = %dispatch.schedule,
                    sink = %dispatch.sink,
                    "target sink not registered"
                ),
            }
        }
        routed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;
    use crate::telegram::ValueSlot;
    use chrono::TimeZone;

    const A: &str = "1-0:1.7.0";
    const B: &str = "1-0:2.7.0";

    fn at(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap() + chrono::Duration::seconds(s as i64)
    }

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn seq_at(s: u32, values: &[(&str, &str)]) -> Sequence {
        let mut seq = Sequence::new(Some("/ABC\\".into()));
        seq.set_message_time(at(s));
        for (code, v) in values {
            seq.add_information(code, vec![ValueSlot::new(Value::Number(d(v)), Some("kW".into()))])
                .unwrap();
        }
        seq
    }

    fn config(mode: ScheduleMode, codes: &[&str]) -> ScheduleConfig {
        ScheduleConfig {
            name: Some("s".into()),
            cron: "*/10 * * * * *".into(),
            mode,
            sink: "rec".into(),
            apply_to: codes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn engine(mode: ScheduleMode, codes: &[&str]) -> ScheduleEngine {
        ScheduleEngine::from_config(&[config(mode, codes)], at(0)).unwrap()
    }

    // ── triggers ──────────────────────────────────────────────────────────────

    #[test]
    fn first_trigger_follows_start() {
        let e = engine(ScheduleMode::Immediate, &[A]);
        assert_eq!(e.schedules()[0].next_trigger(), Some(at(10)));
    }

    #[test]
    fn next_trigger_strictly_increases() {
        let mut e = engine(ScheduleMode::Immediate, &[A]);
        let mut last = e.schedules()[0].next_trigger().unwrap();
        for s in [10, 20, 30, 40] {
            assert_eq!(e.evaluate(&seq_at(s, &[(A, "1")])).len(), 1);
            let next = e.schedules()[0].next_trigger().unwrap();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn late_sequence_catches_up_one_occurrence_at_a_time() {
        let mut e = engine(ScheduleMode::Immediate, &[A]);
        assert_eq!(e.evaluate(&seq_at(60, &[(A, "1")])).len(), 1);
        assert_eq!(e.schedules()[0].next_trigger(), Some(at(20)));
        assert_eq!(e.evaluate(&seq_at(61, &[(A, "1")])).len(), 1);
        assert_eq!(e.schedules()[0].next_trigger(), Some(at(30)));
    }

    #[test]
    fn sequence_without_timestamp_skips_every_schedule() {
        let mut e = ScheduleEngine::from_config(
            &[config(ScheduleMode::Average, &[A]), config(ScheduleMode::Immediate, &[A])],
            at(0),
        )
        .unwrap();
        let mut seq = Sequence::new(None);
        seq.add_information(A, vec![ValueSlot::new(Value::Number(d("5")), None)])
            .unwrap();

        assert!(e.evaluate(&seq).is_empty());
        assert_eq!(e.schedules()[0].pending(A), 0);
        assert_eq!(e.schedules()[1].next_trigger(), Some(at(10)));
    }

    #[test]
    fn exhausted_cron_retires_schedule() {
        let mut c = config(ScheduleMode::Immediate, &[A]);
        c.cron = "0 0 0 1 1 * 2001".into();
        let mut e = ScheduleEngine::from_config(&[c], at(0)).unwrap();
        assert_eq!(e.schedules()[0].next_trigger(), None);
        assert!(e.evaluate(&seq_at(3600, &[(A, "1")])).is_empty());
    }

    #[test]
    fn empty_apply_to_is_rejected() {
        let err = ScheduleEngine::from_config(&[config(ScheduleMode::Immediate, &[])], at(0))
            .unwrap_err();
        assert_eq!(err, ScheduleError::NoApplicableCodes { schedule: "s".into() });
    }

    // ── immediate ─────────────────────────────────────────────────────────────

    #[test]
    fn immediate_waits_then_dispatches_full_set() {
        let mut e = engine(ScheduleMode::Immediate, &[A, B]);
        assert!(e.evaluate(&seq_at(5, &[(A, "1")])).is_empty());

        let seq = seq_at(10, &[(A, "1")]);
        let out = e.evaluate(&seq);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].codes, vec![A.to_string(), B.to_string()]);
        assert_eq!(out[0].sink, "rec");
        assert!(matches!(out[0].sequence, Cow::Borrowed(_)));
    }

    // ── average ───────────────────────────────────────────────────────────────

    #[test]
    fn average_dispatches_rounded_mean_of_waiting_values() {
        let mut e = engine(ScheduleMode::Average, &[A, B]);
        for (s, v) in [(1, "1"), (2, "2"), (3, "2")] {
            assert!(e.evaluate(&seq_at(s, &[(A, v)])).is_empty());
        }
        assert_eq!(e.schedules()[0].pending(A), 3);

        let firing = seq_at(10, &[(A, "100"), (B, "7.5")]);
        let out = e.evaluate(&firing);
        assert_eq!(out.len(), 1);
        let view = &out[0].sequence;
        assert_eq!(view.number(A), d("1.667"));
        assert_eq!(view.unit(A), Some("kW"));
        // no buffered values: dispatched as received
        assert_eq!(view.number(B), d("7.5"));
        // the decoded Sequence itself is untouched
        assert_eq!(firing.number(A), d("100"));
        drop(out);
        assert_eq!(e.schedules()[0].pending(A), 0);
    }

    #[test]
    fn average_rounds_half_to_even() {
        let mut e = engine(ScheduleMode::Average, &[A]);
        e.evaluate(&seq_at(1, &[(A, "1.0005")]));
        let firing = seq_at(10, &[(A, "9")]);
        let out = e.evaluate(&firing);
        assert_eq!(out[0].sequence.number(A), d("1.000"));

        e.evaluate(&seq_at(11, &[(A, "1.0015")]));
        let firing = seq_at(20, &[(A, "9")]);
        let out = e.evaluate(&firing);
        assert_eq!(out[0].sequence.number(A), d("1.002"));
    }

    #[test]
    fn average_sends_mean_for_code_missing_from_firing_sequence() {
        let mut e = engine(ScheduleMode::Average, &[A, B]);
        e.evaluate(&seq_at(1, &[(A, "2")]));
        e.evaluate(&seq_at(2, &[(A, "4")]));

        let firing = seq_at(10, &[(B, "1")]);
        let out = e.evaluate(&firing);
        let view = &out[0].sequence;
        assert!(view.has_information(A));
        assert_eq!(view.number(A), d("3"));
        assert_eq!(view.unit(A), Some("kW"));
        assert!(!firing.has_information(A));
        drop(out);
        assert_eq!(e.schedules()[0].pending(A), 0);
    }

    #[test]
    fn average_ignores_non_numeric_values() {
        let mut e = engine(ScheduleMode::Average, &[A]);
        let mut seq = Sequence::new(None);
        seq.set_message_time(at(1));
        seq.add_information(A, vec![ValueSlot::new(Value::Text("n/a".into()), None)])
            .unwrap();
        e.evaluate(&seq);
        assert_eq!(e.schedules()[0].pending(A), 0);
    }

    // ── changed ───────────────────────────────────────────────────────────────

    #[test]
    fn changed_first_firing_sends_full_set_then_only_differences() {
        let mut e = engine(ScheduleMode::Changed, &[A, B]);

        let first = seq_at(10, &[(A, "1"), (B, "2")]);
        let out = e.evaluate(&first);
        assert_eq!(out[0].codes, vec![A.to_string(), B.to_string()]);

        // values between firings are not compared
        assert!(e.evaluate(&seq_at(15, &[(A, "9"), (B, "9")])).is_empty());

        let second = seq_at(20, &[(A, "1"), (B, "3")]);
        let out = e.evaluate(&second);
        assert_eq!(out[0].codes, vec![B.to_string()]);

        let unchanged = seq_at(30, &[(A, "1"), (B, "3")]);
        let out = e.evaluate(&unchanged);
        assert!(out[0].codes.is_empty());
    }

    #[test]
    fn changed_treats_disappearing_code_as_change() {
        let mut e = engine(ScheduleMode::Changed, &[A, B]);
        e.evaluate(&seq_at(10, &[(A, "1"), (B, "2")]));
        let without_b = seq_at(20, &[(A, "1")]);
        let out = e.evaluate(&without_b);
        assert_eq!(out[0].codes, vec![B.to_string()]);
    }

    // ── routing ───────────────────────────────────────────────────────────────

    #[test]
    fn process_routes_to_target_sink() {
        let sink = RecordingSink::new("rec", &[A, B]);
        let records = sink.records.clone();
        let mut sinks = SinkRegistry::new();
        sinks.insert(Box::new(sink));

        let mut e = engine(ScheduleMode::Average, &[A]);
        assert_eq!(e.process(&seq_at(1, &[(A, "4")]), &sinks), 0);
        assert_eq!(e.process(&seq_at(10, &[(A, "8"), (B, "1")]), &sinks), 1);

        let got = records.lock().unwrap().clone();
        assert_eq!(got, vec![(A.to_string(), "4".to_string(), Some("kW".to_string()))]);
    }

    #[test]
    fn process_skips_unknown_sink() {
        let mut e = engine(ScheduleMode::Immediate, &[A]);
        assert_eq!(e.process(&seq_at(10, &[(A, "1")]), &SinkRegistry::new()), 0);
    }
}
