/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error types for telegram decoding.
//!
//! Every variant is recoverable: the decode stage logs it and skips the
//! offending line, the in-progress [`Sequence`](super::Sequence) keeps
//! accepting the following lines.

use thiserror::Error;

/// Why a single interior line of a telegram was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line does not start with an OBIS code.
    #[error("line does not start with an OBIS code: '{line}'")]
    MissingCode { line: String },

    /// A value segment is not closed by `)` before the end of the line.
    #[error("unterminated value segment for {code} at offset {offset}")]
    UnterminatedSegment { code: String, offset: usize },

    /// Text found between or after the parenthesized value segments.
    #[error("unexpected token '{token}' after {code}")]
    UnexpectedToken { code: String, token: String },

    /// An OBIS code with no value segment at all.
    #[error("{code} carries no value segment")]
    NoValue { code: String },

    /// A `YYMMDDhhmmss[SW]` stamp that does not name a valid wall-clock time.
    #[error("invalid meter timestamp '{raw}'")]
    InvalidTimestamp { raw: String },

    /// The wall-clock time does not exist in the meter timezone
    /// (skipped by a daylight-saving transition).
    #[error("meter timestamp '{raw}' does not exist in timezone {zone}")]
    NonexistentLocalTime { raw: String, zone: String },

    /// The Sequence already carries its signature.
    #[error("sequence is closed, {code} was not added")]
    SequenceClosed { code: String },
}
