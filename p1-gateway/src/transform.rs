/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Derived fields computed on finalized Sequences.
//!
//! Rules are evaluated in declaration order against the fields the telegram
//! itself carried; a rule never sees another rule's output.  All sums are
//! computed before any result is written back, so declaration order only
//! decides which rule wins when two share a target code.

use rust_decimal::Decimal;
use tracing::trace;

use crate::config::{TransformOp, TransformRule};
use crate::telegram::Sequence;

#[derive(Debug, Clone, Default)]
pub struct TransformationEngine {
    rules: Vec<TransformRule>,
}

impl TransformationEngine {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    /// Inject every rule's result into `sequence`.
    ///
    /// Returns `false` without touching the Sequence when it was already
    /// transformed.
    pub fn apply(&self, sequence: &mut Sequence) -> bool {
        if sequence.is_transformed() {
            return false;
        }

        let results: Vec<(&TransformRule, Decimal)> = self
            .rules
            .iter()
            .map(|rule| (rule, evaluate(rule, sequence)))
            .collect();

        for (rule, value) in results {
            trace!(code = %rule.id, value = %value, "derived field");
            sequence.insert_derived(&rule.id, value, rule.unit.clone());
        }
        sequence.mark_transformed();
        true
    }
}

/// Missing or non-numeric operands count as zero.
fn evaluate(rule: &TransformRule, sequence: &Sequence) -> Decimal {
    match rule.operation {
        TransformOp::Sum => rule.operands.iter().map(|code| sequence.number(code)).sum(),
    }
}
