//! Unified error types for the hot tub controller.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! state machines and the service see one error shape.  Sub-enums stay
//! small and descriptive; the ones carrying OS detail own a `String`.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A digital pin could not be configured, read, or written.
    Gpio(GpioError),
    /// The serial sensor channel failed.
    Sensor(SensorError),
    /// The state machine engine rejected an operation.
    Machine(MachineError),
    /// An operator action was refused in the current state.
    Action(ActionError),
    /// Configuration is invalid or could not be loaded.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpio(e) => write!(f, "gpio: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Machine(e) => write!(f, "state machine: {e}"),
            Self::Action(e) => write!(f, "action: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T, E = Error> = core::result::Result<T, E>;

// ---------------------------------------------------------------------------
// GPIO errors
// ---------------------------------------------------------------------------

/// Configuration-class failures are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpioError {
    /// The pin was not part of the declared pin map.
    Undeclared(u32),
    /// A write was attempted on a pin configured as input.
    NotOutput(u32),
    /// An edge subscription was requested for a pin with edge mode `none`.
    NotEdgeArmed(u32),
    /// The OS rejected an export / direction / edge / value operation.
    Io { pin: u32, detail: String },
    /// The value file held something other than `0` or `1`.
    BadValue { pin: u32, raw: String },
    /// Setup failed earlier; queued operations cannot be replayed.
    SetupFailed,
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undeclared(pin) => write!(f, "pin {pin} not configured"),
            Self::NotOutput(pin) => write!(f, "pin {pin} is an input"),
            Self::NotEdgeArmed(pin) => write!(f, "pin {pin} has no edge armed"),
            Self::Io { pin, detail } => write!(f, "pin {pin}: {detail}"),
            Self::BadValue { pin, raw } => write!(f, "pin {pin}: unknown value {raw:?}"),
            Self::SetupFailed => write!(f, "pin setup failed"),
        }
    }
}

impl From<GpioError> for Error {
    fn from(e: GpioError) -> Self {
        Self::Gpio(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor channel errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// No line arrived within the allotted timeout.
    Timeout,
    /// The value line was empty.
    EmptyReading,
    /// The value line did not parse as a number.
    BadValue(String),
    /// A line other than `*OK` arrived where an acknowledgement was due.
    BadAcknowledgement(String),
    /// The underlying port failed.
    Io(String),
    /// The multiplexer select lines could not be driven.
    Select(GpioError),
    /// Consecutive failures exceeded the retry budget.
    RetriesExhausted(u32),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::EmptyReading => write!(f, "bad reading"),
            Self::BadValue(line) => write!(f, "unparsable reading {line:?}"),
            Self::BadAcknowledgement(line) => write!(f, "bad response line {line:?}"),
            Self::Io(detail) => write!(f, "serial port: {detail}"),
            Self::Select(e) => write!(f, "mux select: {e}"),
            Self::RetriesExhausted(n) => write!(f, "{n} consecutive failures"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// State machine engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// `set_state` / `set_timer` called before `run`.
    NotStarted(&'static str),
    /// `run` called twice on the same instance.
    AlreadyStarted(&'static str),
    /// The requested state has no row in the table.
    UnknownState { machine: &'static str, state: String },
    /// `set_timer` called in a state without an `on_timer` hook.
    NoTimerHook { machine: &'static str, state: &'static str },
    /// Timer duration was negative, NaN or too large.
    InvalidDuration(String),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted(m) => write!(f, "{m}: setState called before run"),
            Self::AlreadyStarted(m) => write!(f, "{m}: run called when already started"),
            Self::UnknownState { machine, state } => {
                write!(f, "{machine}: invalid state {state}")
            }
            Self::NoTimerHook { machine, state } => {
                write!(f, "{machine}: setTimer called on {state} but onTimer is not defined")
            }
            Self::InvalidDuration(raw) => write!(f, "invalid timer duration {raw}"),
        }
    }
}

impl From<MachineError> for Error {
    fn from(e: MachineError) -> Self {
        Self::Machine(e)
    }
}

// ---------------------------------------------------------------------------
// Operator action errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Reset requested outside `RESETTABLE_ERROR`.
    NotResettable(&'static str),
    /// Pause / resume / dispense refused while in an error state.
    ErrorState(&'static str),
    /// Manual dispense while a dose is already running.
    Busy(&'static str),
    /// Manual dispense duration outside `(0, 60]` seconds.
    InvalidDuration(String),
    /// Manual dispense without confirmed flow.
    NoFlow,
    /// The pump is not enabled in the dosing configuration.
    PumpDisabled(&'static str),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotResettable(state) => write!(f, "cannot reset from {state}"),
            Self::ErrorState(state) => write!(f, "refused while in {state}"),
            Self::Busy(state) => write!(f, "busy in {state}"),
            Self::InvalidDuration(raw) => write!(f, "invalid pump duration {raw}"),
            Self::NoFlow => write!(f, "no confirmed flow"),
            Self::PumpDisabled(pump) => write!(f, "{pump} pump is disabled"),
        }
    }
}

impl From<ActionError> for Error {
    fn from(e: ActionError) -> Self {
        Self::Action(e)
    }
}
