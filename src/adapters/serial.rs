//! Serial line transport to the probe interface board.
//!
//! A reader thread owns a clone of the port, splits the byte stream on
//! `\r` and pushes complete lines into a bounded channel.  The executor
//! side only ever awaits that channel, so a slow or silent board never
//! blocks the controller.
//!
//! ```text
//!  serial port ──▶ reader thread ──▶ Channel<String, 32> ──▶ read_line().await
//!  send() ──────────────────────────────────────────────────▶ serial port
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future;
use log::{debug, error, info, warn};
use serialport::{ClearBuffer, SerialPort};

use crate::app::ports::LineTransport;
use crate::config::SerialConfig;
use crate::error::SensorError;

const LINE_QUEUE: usize = 32;
/// Longest line kept; the probe board never sends more than a few bytes.
pub const MAX_LINE: usize = 64;
/// Reader thread wake-up interval when the board is silent.
const READ_POLL: Duration = Duration::from_millis(100);

type LineQueue = Channel<CriticalSectionRawMutex, String, LINE_QUEUE>;

/// Splits a byte stream into `\r`-terminated lines.
///
/// A line longer than [`MAX_LINE`] is dropped whole, up to and including
/// its terminator.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: heapless::Vec<u8, MAX_LINE>,
    overlong: bool,
}

impl LineSplitter {
    pub fn clear(&mut self) {
        self.partial.clear();
        self.overlong = false;
    }

    /// Feed bytes; returns every line completed by them, terminator and
    /// surrounding whitespace stripped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\r' {
                if self.overlong {
                    warn!("dropped serial line longer than {} bytes", MAX_LINE);
                } else {
                    lines.push(String::from_utf8_lossy(&self.partial).trim().to_string());
                }
                self.clear();
            } else if !self.overlong && self.partial.push(b).is_err() {
                self.partial.clear();
                self.overlong = true;
            }
        }
        lines
    }
}

struct ReaderFlags {
    discard: AtomicBool,
    stop: AtomicBool,
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: Arc<LineQueue>,
    flags: Arc<ReaderFlags>,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, SensorError> {
        let port = serialport::new(config.device.as_str(), config.baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| SensorError::Io(format!("{}: {}", config.device, e)))?;
        let reader = port.try_clone().map_err(|e| SensorError::Io(e.to_string()))?;

        let lines = Arc::new(LineQueue::new());
        let flags = Arc::new(ReaderFlags {
            discard: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });
        {
            let lines = Arc::clone(&lines);
            let flags = Arc::clone(&flags);
            thread::Builder::new()
                .name("probe-serial".into())
                .spawn(move || reader_loop(reader, &lines, &flags))
                .map_err(|e| SensorError::Io(e.to_string()))?;
        }
        info!("Serial: {} @ {} baud", config.device, config.baud_rate);
        Ok(Self { port, lines, flags })
    }
}

fn reader_loop(mut port: Box<dyn SerialPort>, lines: &LineQueue, flags: &ReaderFlags) {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 64];
    while !flags.stop.load(Ordering::Acquire) {
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => {
                error!("Serial read failed, reader stopping: {}", e);
                return;
            }
        };
        if flags.discard.swap(false, Ordering::AcqRel) {
            splitter.clear();
        }
        for line in splitter.feed(&buf[..n]) {
            debug!("serial <- {:?}", line);
            if lines.try_send(line).is_err() {
                warn!("Serial line queue full, dropping line");
            }
        }
    }
    debug!("Serial reader stopped");
}

impl LineTransport for SerialTransport {
    fn discard_input(&mut self) -> Result<(), SensorError> {
        self.flags.discard.store(true, Ordering::Release);
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| SensorError::Io(e.to_string()))?;
        while self.lines.try_receive().is_ok() {}
        Ok(())
    }

    fn send(&mut self, command: &str) -> Result<(), SensorError> {
        debug!("serial -> {:?}", command);
        self.port
            .write_all(format!("{command}\r").as_bytes())
            .and_then(|()| self.port.flush())
            .map_err(|e| SensorError::Io(e.to_string()))
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, SensorError> {
        future::or(async { Ok(self.lines.receive().await) }, async {
            async_io_mini::Timer::after(timeout).await;
            Err(SensorError::Timeout)
        })
        .await
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.flags.stop.store(true, Ordering::Release);
    }
}
