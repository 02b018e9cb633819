/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Line-oriented byte sources feeding the source stage.
//!
//! A [`LineSource`] yields one line at a time.  Serial and TCP reads are
//! bounded by the cycle length; a timeout with no complete line is reported
//! as `Ok(None)` and the partial line is kept for the next call.  The
//! supervisor stops a source from another thread through the [`Closer`] it
//! obtained before the run started.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TransportConfig;

/// Unblocks and closes a [`LineSource`] from another thread.
pub type Closer = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("read from {target} failed: {source}")]
    Read {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("{target} reached end of stream")]
    EndOfStream { target: String },

    #[error("{target} was closed")]
    Closed { target: String },
}

pub trait LineSource: Send {
    /// Next complete line without its terminator.
    ///
    /// `Ok(None)` means no complete line arrived within the read timeout.
    fn next_line(&mut self) -> Result<Option<String>, TransportError>;

    /// Handle that closes this source; callable once, from any thread.
    fn closer(&self) -> Result<Closer, TransportError>;

    /// Human-readable endpoint, used in logs.
    fn target(&self) -> &str;
}

/// Open the configured transport with reads bounded by `read_timeout`.
pub fn open(
    config: &TransportConfig,
    read_timeout: Duration,
) -> Result<Box<dyn LineSource>, TransportError> {
    let source: Box<dyn LineSource> = match config {
        TransportConfig::Serial { path, baud_rate } => {
            Box::new(SerialLineSource::open(path, *baud_rate, read_timeout)?)
        }
        TransportConfig::Tcp { address } => Box::new(TcpLineSource::connect(address, read_timeout)?),
        TransportConfig::File { path } => Box::new(FileLineSource::open(path)?),
    };
    info!(endpoint = source.target(), "transport open");
    Ok(source)
}

// ── Shared line reading ───────────────────────────────────────────────────────

/// Outcome of one `read_until` attempt.
enum Chunk {
    Line(String),
    Pending,
    Eof,
}

fn read_chunk<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> io::Result<Chunk> {
    match reader.read_until(b'\n', pending) {
        Ok(0) if pending.is_empty() => Ok(Chunk::Eof),
        // EOF after a partial line: hand it out; the next read reports EOF
        Ok(_) => {
            let raw = std::mem::take(pending);
            let line = String::from_utf8_lossy(&raw);
            Ok(Chunk::Line(line.trim_end_matches(['\r', '\n']).to_string()))
        }
        Err(e) if is_timeout(&e) => Ok(Chunk::Pending),
        Err(e) => Err(e),
    }
}

/// One bounded read on behalf of a [`LineSource`].  `closed` is checked on
/// both sides of the read so a closer raised mid-read wins over its result.
fn next_line_from<R: BufRead>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    closed: &AtomicBool,
    target: &str,
) -> Result<Option<String>, TransportError> {
    let closed_err = || TransportError::Closed {
        target: target.to_string(),
    };
    if closed.load(Ordering::Acquire) {
        return Err(closed_err());
    }
    let chunk = read_chunk(reader, pending);
    if closed.load(Ordering::Acquire) {
        return Err(closed_err());
    }
    match chunk {
        Ok(Chunk::Line(line)) => Ok(Some(line)),
        Ok(Chunk::Pending) => Ok(None),
        Ok(Chunk::Eof) => Err(TransportError::EndOfStream {
            target: target.to_string(),
        }),
        Err(source) => Err(TransportError::Read {
            target: target.to_string(),
            source,
        }),
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ── Serial ────────────────────────────────────────────────────────────────────

/// The meter's P1 port on a local serial adapter (8N1, no flow control).
///
/// Every read returns within the port timeout, so a silent meter holds the
/// source stage for at most one timeout after the closer runs.
pub struct SerialLineSource {
    target: String,
    reader: BufReader<Box<dyn SerialPort>>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl SerialLineSource {
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                target: path.to_string(),
                source: io::Error::from(e),
            })?;
        debug!(endpoint = path, baud_rate, "serial port open");
        Ok(Self::from_port(path, port))
    }

    /// Wrap an already configured port.  Its timeout bounds every read.
    pub fn from_port(target: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            target: target.into(),
            reader: BufReader::new(port),
            pending: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LineSource for SerialLineSource {
    fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        next_line_from(&mut self.reader, &mut self.pending, &self.closed, &self.target)
    }

    fn closer(&self) -> Result<Closer, TransportError> {
        let closed = Arc::clone(&self.closed);
        Ok(Box::new(move || closed.store(true, Ordering::Release)))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

// ── TCP ───────────────────────────────────────────────────────────────────────

/// A meter port exposed over TCP (ser2net, a P1-to-Wi-Fi dongle, …).
pub struct TcpLineSource {
    target: String,
    reader: BufReader<TcpStream>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl TcpLineSource {
    pub fn connect(address: &str, read_timeout: Duration) -> Result<Self, TransportError> {
        let open_err = |source| TransportError::Open {
            target: address.to_string(),
            source,
        };
        let addr = address
            .to_socket_addrs()
            .map_err(open_err)?
            .next()
            .ok_or_else(|| {
                open_err(io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))
            })?;
        let stream = TcpStream::connect_timeout(&addr, read_timeout).map_err(open_err)?;
        stream.set_read_timeout(Some(read_timeout)).map_err(open_err)?;
        debug!(endpoint = address, peer = %addr, "tcp connected");

        Ok(Self {
            target: address.to_string(),
            reader: BufReader::new(stream),
            pending: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl LineSource for TcpLineSource {
    fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        next_line_from(&mut self.reader, &mut self.pending, &self.closed, &self.target)
    }

    fn closer(&self) -> Result<Closer, TransportError> {
        let stream = self
            .reader
            .get_ref()
            .try_clone()
            .map_err(|source| TransportError::Open {
                target: self.target.clone(),
                source,
            })?;
        let closed = Arc::clone(&self.closed);
        Ok(Box::new(move || {
            closed.store(true, Ordering::Release);
            // already-disconnected peers make this fail; nothing left to do then
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

// ── Capture file ──────────────────────────────────────────────────────────────

/// A captured telegram stream, replayed once.
///
/// Plain file reads carry no timeout and the closer only takes effect on the
/// next read, so device nodes belong on [`SerialLineSource`].  End of file is
/// an error.
pub struct FileLineSource {
    target: String,
    reader: BufReader<File>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl FileLineSource {
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let target = path.display().to_string();
        let file = File::open(path).map_err(|source| TransportError::Open {
            target: target.clone(),
            source,
        })?;
        Ok(Self {
            target,
            reader: BufReader::new(file),
            pending: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl LineSource for FileLineSource {
    fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        next_line_from(&mut self.reader, &mut self.pending, &self.closed, &self.target)
    }

    fn closer(&self) -> Result<Closer, TransportError> {
        let closed = Arc::clone(&self.closed);
        Ok(Box::new(move || closed.store(true, Ordering::Release)))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;
    use tempfile::NamedTempFile;

    const TIMEOUT: Duration = Duration::from_millis(50);

    /// Drain `source` until it fails; returns the lines and the final error.
    fn drain(source: &mut dyn LineSource) -> (Vec<String>, usize, TransportError) {
        let mut lines = Vec::new();
        let mut idle = 0;
        loop {
            match source.next_line() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => idle += 1,
                Err(e) => return (lines, idle, e),
            }
        }
    }

    // ── serial ────────────────────────────────────────────────────────────────

    /// A pseudo-terminal pair: the master end plays the meter, the slave end
    /// is the gateway's port with `TIMEOUT` reads.
    #[cfg(unix)]
    fn serial_pair() -> (serialport::TTYPort, SerialLineSource) {
        let (meter, mut port) = serialport::TTYPort::pair().unwrap();
        port.set_timeout(TIMEOUT).unwrap();
        (meter, SerialLineSource::from_port("pty", Box::new(port)))
    }

    #[cfg(unix)]
    #[test]
    fn serial_read_on_silent_meter_times_out() {
        let (_meter, mut source) = serial_pair();

        let started = Instant::now();
        assert_eq!(source.next_line().unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn serial_delivers_lines_from_meter() {
        let (mut meter, mut source) = serial_pair();
        meter.write_all(b"/ABC\\\r\n").unwrap();
        meter.flush().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let line = loop {
            if let Some(line) = source.next_line().unwrap() {
                break line;
            }
            assert!(Instant::now() < deadline, "no line from meter");
        };
        assert_eq!(line, "/ABC\\");
    }

    #[cfg(unix)]
    #[test]
    fn serial_closer_stops_silent_port_within_timeout() {
        let (_meter, mut source) = serial_pair();
        let closer = source.closer().unwrap();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            closer();
        });

        let started = Instant::now();
        let (lines, idle, err) = drain(&mut source);
        assert!(lines.is_empty());
        assert!(idle > 0);
        assert!(matches!(err, TransportError::Closed { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn missing_serial_device_is_open_error() {
        assert!(matches!(
            SerialLineSource::open("/nonexistent/ttyUSB9", 115_200, TIMEOUT),
            Err(TransportError::Open { .. })
        ));
    }

    // ── tcp ───────────────────────────────────────────────────────────────────

    #[test]
    fn tcp_keeps_partial_line_across_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let writer = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"/ABC\\\r\n1-0:1.8").unwrap();
            peer.flush().unwrap();
            thread::sleep(Duration::from_millis(300));
            peer.write_all(b".1(000001.000*kWh)\r\n").unwrap();
        });

        let mut source = TcpLineSource::connect(&address, TIMEOUT).unwrap();
        let (lines, idle, err) = drain(&mut source);
        writer.join().unwrap();

        assert_eq!(lines, vec!["/ABC\\", "1-0:1.8.1(000001.000*kWh)"]);
        assert!(idle > 0);
        assert!(matches!(err, TransportError::EndOfStream { .. }));
    }

    #[test]
    fn tcp_closer_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let holder = thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(peer);
        });

        let mut source = TcpLineSource::connect(&address, TIMEOUT).unwrap();
        let closer = source.closer().unwrap();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            closer();
        });

        let (lines, _, err) = drain(&mut source);
        holder.join().unwrap();
        assert!(lines.is_empty());
        assert!(matches!(err, TransportError::Closed { .. }));
    }

    #[test]
    fn tcp_connect_refused_is_open_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            TcpLineSource::connect(&address, TIMEOUT),
            Err(TransportError::Open { .. })
        ));
    }

    // ── file ──────────────────────────────────────────────────────────────────

    #[test]
    fn file_replays_lines_then_reports_end() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"/ABC\\\r\n!1A2B\r\ntail").unwrap();
        f.flush().unwrap();

        let mut source = open(
            &TransportConfig::File {
                path: f.path().to_path_buf(),
            },
            TIMEOUT,
        )
        .unwrap();
        let (lines, _, err) = drain(source.as_mut());
        assert_eq!(lines, vec!["/ABC\\", "!1A2B", "tail"]);
        assert!(matches!(err, TransportError::EndOfStream { .. }));
    }

    #[test]
    fn file_closer_stops_next_read() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"a\nb\n").unwrap();
        f.flush().unwrap();

        let mut source = FileLineSource::open(f.path()).unwrap();
        assert_eq!(source.next_line().unwrap().as_deref(), Some("a"));
        (source.closer().unwrap())();
        assert!(matches!(source.next_line(), Err(TransportError::Closed { .. })));
    }

    #[test]
    fn missing_file_is_open_error() {
        assert!(matches!(
            FileLineSource::open(Path::new("/nonexistent/p1.log")),
            Err(TransportError::Open { .. })
        ));
    }
}
