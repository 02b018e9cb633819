/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! P1 gateway: decodes smart-meter telegrams and dispatches scheduled
//! readings to sinks.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/      – YAML gateway configuration
//! ├── telegram/    – Sequence model + line decoder
//! ├── transform    – derived `sum` fields
//! ├── schedule/    – cron-driven immediate / average / changed dispatch
//! ├── sink/        – print, logger and MQTT sinks
//! ├── transport    – TCP and file line sources
//! └── pipeline/    – source/decode/dispatch stages, watchdog, supervisor
//! ```

pub mod config;
pub mod pipeline;
pub mod schedule;
pub mod sink;
pub mod telegram;
pub mod transform;
pub mod transport;
