//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Driven adapters (sysfs pins, the serial port, the journal, outbound
//! hooks, config storage) implement these traits.  The
//! [`Controller`](super::service::Controller) receives them at
//! construction, so the domain core never touches the OS directly and
//! the whole stack runs against in-memory doubles in tests.
//!
//! ## Notes
//!
//! - **ConfigPort** implementations MUST validate before handing out a config.
//! - **Notifier** and **HeaterPort** failures are logged by the caller and
//!   never escalate into controller state.

use core::future::Future;
use core::time::Duration;

use crate::config::SystemConfig;
use crate::drivers::gpio::{Direction, Edge};
use crate::error::{GpioError, SensorError};
use crate::sensors::Reading;

use super::events::LogEvent;
use super::status::StatusSnapshot;

// ───────────────────────────────────────────────────────────────
// Pin backend (driven adapter: domain ↔ digital I/O)
// ───────────────────────────────────────────────────────────────

/// Raw per-pin access.  The [`DigitalIo`](crate::drivers::gpio::DigitalIo)
/// set layers declaration checks, pre-ready queueing and edge detection
/// on top of this.
pub trait PinBackend {
    /// Export the pin and apply direction and edge mode.
    fn configure(&mut self, pin: u32, direction: Direction, edge: Edge) -> Result<(), GpioError>;

    fn read(&mut self, pin: u32) -> Result<bool, GpioError>;

    fn write(&mut self, pin: u32, value: bool) -> Result<(), GpioError>;
}

// ───────────────────────────────────────────────────────────────
// Line transport (driven adapter: domain ↔ serial sensor bus)
// ───────────────────────────────────────────────────────────────

/// Carriage-return delimited line I/O to the probe interface board.
pub trait LineTransport {
    /// Drop every buffered line and any pending input.
    fn discard_input(&mut self) -> Result<(), SensorError>;

    /// Write one command; the transport appends the `\r` terminator.
    fn send(&mut self, command: &str) -> Result<(), SensorError>;

    /// Next complete line, or [`SensorError::Timeout`] after `timeout`.
    fn read_line(&mut self, timeout: Duration) -> impl Future<Output = Result<String, SensorError>>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → durable journal)
// ───────────────────────────────────────────────────────────────

/// Append-only journal for events and accurate readings.
pub trait EventSink {
    fn record_event(&mut self, event: &LogEvent);

    fn record_reading(&mut self, reading: &Reading);
}

// ───────────────────────────────────────────────────────────────
// Notifier port (driven adapter: domain → operator)
// ───────────────────────────────────────────────────────────────

/// Delivers error / fatal events together with the current status.
pub trait Notifier {
    fn notify(&mut self, event: &LogEvent, status: &StatusSnapshot) -> Result<(), String>;
}

// ───────────────────────────────────────────────────────────────
// Heater port (driven adapter: domain → heater controller)
// ───────────────────────────────────────────────────────────────

/// Best-effort heater shutoff, requested on confirmed over-temperature.
pub trait HeaterPort {
    fn heater_off(&mut self) -> Result<(), String>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted(String),
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted(msg) => write!(f, "config corrupted: {}", msg),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
