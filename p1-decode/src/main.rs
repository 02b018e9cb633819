/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use clap::Parser;
use tracing::{error, info, warn};

use p1_gateway::telegram::{CodeFilter, Sequence, TelegramDecoder};

/// Replay a captured P1 stream through the gateway decoder.
///
/// Example:
///   p1-decode capture.log --code 1-0:1.8.1 --code 0-1:24.2.3/1
#[derive(Debug, Parser)]
#[command(name = "p1-decode", about = "Decode a captured P1 telegram stream", long_about = None)]
struct Cli {
    /// Capture file, one telegram line per line.
    capture: PathBuf,

    /// OBIS code to keep (repeatable).  Without any, every code is kept.
    #[arg(short = 'c', long = "code")]
    codes: Vec<String>,

    /// Timezone the meter reports in.
    #[arg(short = 't', long = "timezone", default_value = "Europe/Brussels")]
    timezone: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let zone: Tz = cli
        .timezone
        .parse()
        .map_err(|e| anyhow!("unknown timezone '{}': {}", cli.timezone, e))?;
    let filter = if cli.codes.is_empty() {
        CodeFilter::Any
    } else {
        CodeFilter::only(&cli.codes)
    };

    let file = File::open(&cli.capture)
        .with_context(|| format!("Cannot open capture file: {}", cli.capture.display()))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Cannot read capture file: {}", cli.capture.display()))?;

    let mut decoder = TelegramDecoder::new(filter, zone);
    let sequences = decode_lines(&mut decoder, &lines);
    for sequence in &sequences {
        println!("{sequence}");
    }

    if decoder.in_progress().is_some() {
        warn!("capture ends inside an unterminated telegram");
    }
    info!(telegrams = sequences.len(), "capture decoded");
    Ok(())
}

fn decode_lines<S: AsRef<str>>(decoder: &mut TelegramDecoder, lines: &[S]) -> Vec<Sequence> {
    lines
        .iter()
        .filter_map(|line| decoder.feed(line.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &[&str] = &[
        "/FLU5\\253769484_A",
        "0-0:1.0.0(231215120000W)",
        "1-0:1.8.1(001234.567*kWh)",
        "1-0:1.7.0(00.500*kW)",
        "!1A2B",
        "/FLU5\\253769484_A",
        "0-0:1.0.0(231215120001W)",
    ];

    #[test]
    fn decodes_complete_telegrams_only() {
        let mut decoder = TelegramDecoder::new(CodeFilter::Any, chrono_tz::Europe::Brussels);
        let sequences = decode_lines(&mut decoder, CAPTURE);

        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].unit("1-0:1.8.1"), Some("kWh"));
        assert!(sequences[0].has_information("1-0:1.7.0"));
        assert!(decoder.in_progress().is_some());
    }

    #[test]
    fn code_filter_limits_output() {
        let mut decoder =
            TelegramDecoder::new(CodeFilter::only(["1-0:1.7.0"]), chrono_tz::Europe::Brussels);
        let sequences = decode_lines(&mut decoder, CAPTURE);

        assert!(!sequences[0].has_information("1-0:1.8.1"));
        assert!(sequences[0].has_information("1-0:1.7.0"));
    }
}
