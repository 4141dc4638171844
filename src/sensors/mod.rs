//! Serial sensor channel: temperature, pH and ORP probes behind one UART.
//!
//! The three probe circuits share a single serial line through an analog
//! multiplexer addressed by two digital outputs:
//!
//! ```text
//!            mux X  mux Y
//!  TEMP        0      0
//!  PH          0      1
//!  ORP         1      0
//! ```
//!
//! Per read: select the probe, discard buffered input, send `R`, await the
//! value line within the (long) reading timeout, then await `*OK` within
//! the (short) response timeout.  pH reads first push `T,<temperature>`
//! for compensation, acknowledged by its own `*OK`.
//!
//! [`SensorChannel::run`] repeats temperature → pH → ORP while polling is
//! enabled and emits one [`Reading`] per completed cycle.

use core::cell::Cell;
use core::time::Duration;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::yield_now;
use log::{debug, info, warn};
use serde::Serialize;

use crate::app::ports::LineTransport;
use crate::config::SystemConfig;
use crate::drivers::gpio::DigitalIo;
use crate::error::SensorError;

/// Acknowledgement line terminating every probe response.
pub const ACK: &str = "*OK";

/// One completed temperature → pH → ORP cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: f64,
    pub ph: f64,
    pub orp: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Temperature,
    Ph,
    Orp,
}

impl Probe {
    /// `(x, y)` multiplexer address.
    pub const fn mux(self) -> (bool, bool) {
        match self {
            Self::Temperature => (false, false),
            Self::Ph => (false, true),
            Self::Orp => (true, false),
        }
    }

    pub const fn from_mux(x: bool, y: bool) -> Option<Self> {
        match (x, y) {
            (false, false) => Some(Self::Temperature),
            (false, true) => Some(Self::Ph),
            (true, false) => Some(Self::Orp),
            (true, true) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Poll control
// ---------------------------------------------------------------------------

/// Enable flag shared between the circulation supervisor and the polling loop.
pub struct PollControl {
    enabled: Cell<bool>,
    changed: Signal<NoopRawMutex, ()>,
}

impl PollControl {
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(false),
            changed: Signal::new(),
        }
    }

    /// Idempotent; enabling an already running loop does nothing.
    pub fn enable(&self, on: bool) {
        if self.enabled.replace(on) != on {
            info!("Sensor polling {}", if on { "enabled" } else { "disabled" });
            self.changed.signal(());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    async fn wait_enabled(&self) {
        while !self.enabled.get() {
            self.changed.wait().await;
        }
    }
}

impl Default for PollControl {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct SensorChannel<T: LineTransport> {
    transport: T,
    io: Rc<DigitalIo>,
    mux_x: u32,
    mux_y: u32,
    response_timeout: Duration,
    reading_timeout: Duration,
    retry_budget: u32,
    failures: u32,
}

impl<T: LineTransport> SensorChannel<T> {
    pub fn new(transport: T, io: Rc<DigitalIo>, config: &SystemConfig) -> Self {
        Self {
            transport,
            io,
            mux_x: config.pins.mux_x,
            mux_y: config.pins.mux_y,
            response_timeout: Duration::from_millis(config.serial.response_timeout_ms),
            reading_timeout: Duration::from_millis(config.serial.reading_timeout_ms),
            retry_budget: config.serial.retry_budget,
            failures: 0,
        }
    }

    async fn select(&self, probe: Probe) -> Result<(), SensorError> {
        let (x, y) = probe.mux();
        self.io.set(self.mux_x, x).await.map_err(SensorError::Select)?;
        self.io.set(self.mux_y, y).await.map_err(SensorError::Select)
    }

    async fn expect_ack(&mut self) -> Result<(), SensorError> {
        let line = self.transport.read_line(self.response_timeout).await?;
        if line.trim() == ACK {
            Ok(())
        } else {
            Err(SensorError::BadAcknowledgement(line))
        }
    }

    async fn request_value(&mut self) -> Result<f64, SensorError> {
        self.transport.discard_input()?;
        self.transport.send("R")?;
        let line = self.transport.read_line(self.reading_timeout).await?;
        let raw = line.trim();
        if raw.is_empty() {
            return Err(SensorError::EmptyReading);
        }
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| SensorError::BadValue(raw.to_owned()))?;
        self.expect_ack().await?;
        Ok(value)
    }

    pub async fn read_temperature(&mut self) -> Result<f64, SensorError> {
        self.select(Probe::Temperature).await?;
        self.request_value().await
    }

    /// pH with temperature compensation.
    pub async fn read_ph(&mut self, temperature: f64) -> Result<f64, SensorError> {
        self.select(Probe::Ph).await?;
        self.transport.discard_input()?;
        self.transport.send(&format!("T,{temperature}"))?;
        self.expect_ack().await?;
        self.request_value().await
    }

    pub async fn read_orp(&mut self) -> Result<f64, SensorError> {
        self.select(Probe::Orp).await?;
        self.request_value().await
    }

    pub async fn poll_cycle(&mut self) -> Result<Reading, SensorError> {
        let temperature = self.read_temperature().await?;
        let ph = self.read_ph(temperature).await?;
        let orp = self.read_orp().await?;
        Ok(Reading {
            temperature,
            ph,
            orp,
            timestamp: Utc::now(),
        })
    }

    /// Poll continuously while `control` is enabled.
    ///
    /// A successful cycle resets the failure counter.  Once consecutive
    /// failures exceed the retry budget, polling is disabled and the
    /// channel error is returned.
    pub async fn run(&mut self, control: &PollControl, mut on_reading: impl FnMut(Reading)) -> SensorError {
        loop {
            control.wait_enabled().await;
            match self.poll_cycle().await {
                Ok(reading) => {
                    self.failures = 0;
                    if control.is_enabled() {
                        debug!(
                            "reading: {:.1} C, pH {:.2}, ORP {:.0} mV",
                            reading.temperature, reading.ph, reading.orp
                        );
                        on_reading(reading);
                    }
                }
                Err(e) => {
                    self.failures += 1;
                    warn!(
                        "Sensor cycle failed ({}/{}): {}",
                        self.failures, self.retry_budget, e
                    );
                    if self.failures > self.retry_budget {
                        control.enable(false);
                        let failures = core::mem::take(&mut self.failures);
                        return SensorError::RetriesExhausted(failures);
                    }
                }
            }
            yield_now().await;
        }
    }
}
