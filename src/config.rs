//! System configuration parameters
//!
//! All tunable parameters for the controller, grouped by concern.
//! Every section is `#[serde(default)]`, so a config file only needs the
//! values it overrides.  [`SystemConfig::validate`] is applied by the
//! [`ConfigPort`](crate::app::ports::ConfigPort) before anything runs.

use serde::{Deserialize, Serialize};

use crate::pins;

/// Core system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub pins: PinConfig,
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub dosing: DosingConfig,
    pub bounds: BoundsConfig,
    pub journal: JournalConfig,
    pub hooks: HookConfig,
}

// --- Pins ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub circulation_pump: u32,
    pub acid_pump: u32,
    pub bleach_pump: u32,
    pub base_pump: u32,
    pub flow_switch: u32,
    pub failsafe: u32,
    pub mux_x: u32,
    pub mux_y: u32,
    /// Scan interval for edge-armed inputs (milliseconds)
    pub edge_poll_ms: u64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            circulation_pump: pins::CIRCULATION_PUMP,
            acid_pump: pins::ACID_PUMP,
            bleach_pump: pins::BLEACH_PUMP,
            base_pump: pins::BASE_PUMP,
            flow_switch: pins::FLOW_SWITCH,
            failsafe: pins::FAILSAFE,
            mux_x: pins::MUX_X,
            mux_y: pins::MUX_Y,
            edge_poll_ms: 20,
        }
    }
}

// --- Serial sensor bus ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    /// Deadline for an acknowledgement line (milliseconds)
    pub response_timeout_ms: u64,
    /// Deadline for a value line; probes can be slow to settle (milliseconds)
    pub reading_timeout_ms: u64,
    /// Consecutive failed cycles tolerated before the channel faults
    pub retry_budget: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyAMA0".into(),
            baud_rate: 9600,
            response_timeout_ms: 1000,
            reading_timeout_ms: 2000,
            retry_budget: 5,
        }
    }
}

impl SerialConfig {
    /// Worst-case length of one temperature → pH → ORP cycle in seconds.
    ///
    /// Three value lines plus four acknowledgements (the pH compensation
    /// command has its own).
    pub fn cycle_secs(&self) -> f64 {
        let values = self.reading_timeout_ms.saturating_mul(3);
        let acks = self.response_timeout_ms.saturating_mul(4);
        values.saturating_add(acks) as f64 / 1000.0
    }
}

// --- Timing (seconds) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pump on without flow for this long escalates a flow error
    pub flow_timeout_secs: f64,
    /// Stable flow required before readings are trusted
    pub flow_settle_secs: f64,
    /// Delay after flow-good before MEASURE_DELAY takes its reading
    pub measure_settle_secs: f64,
    /// How long MEASURE_DELAY waits for an accurate reading before re-arming
    pub measure_reading_timeout_secs: f64,
    pub mix_secs: f64,
    pub idle_secs: f64,
    /// Auto-resume after a pause
    pub pause_secs: f64,
    /// Circulation stays demanded this long after a status poll
    pub status_hold_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            flow_timeout_secs: 120.0,
            flow_settle_secs: 30.0,
            measure_settle_secs: 10.0,
            measure_reading_timeout_secs: 120.0,
            mix_secs: 30.0 * 60.0,
            idle_secs: 15.0 * 60.0,
            pause_secs: 60.0 * 60.0,
            status_hold_secs: 30.0,
        }
    }
}

// --- Dosing policy ---

/// One chemical's proportional dosing rule.
///
/// `seconds = min(((|value - target|) * gain + extra) * seconds_per_unit, max_seconds)`,
/// rounded to one decimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemicalPolicy {
    pub enabled: bool,
    /// Ceiling for acid, floor for bleach and base
    pub target: f64,
    pub gain: f64,
    pub extra: f64,
    pub seconds_per_unit: f64,
    pub max_seconds: f64,
}

impl Default for ChemicalPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            target: 0.0,
            gain: 1.0,
            extra: 0.0,
            seconds_per_unit: 35.0,
            max_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DosingConfig {
    pub acid: ChemicalPolicy,
    pub bleach: ChemicalPolicy,
    pub base: ChemicalPolicy,
    /// Consecutive non-decreasing doses of one chemical tolerated
    pub no_progress_limit: u32,
    /// Upper bound for an operator-requested dispense
    pub manual_max_secs: f64,
}

impl Default for DosingConfig {
    fn default() -> Self {
        Self {
            acid: ChemicalPolicy {
                target: 7.6,
                gain: 0.8,
                extra: 0.1,
                ..ChemicalPolicy::default()
            },
            bleach: ChemicalPolicy {
                target: 650.0,
                gain: 0.004,
                extra: 0.1,
                ..ChemicalPolicy::default()
            },
            base: ChemicalPolicy {
                enabled: false,
                target: 7.2,
                gain: 0.8,
                extra: 0.1,
                ..ChemicalPolicy::default()
            },
            no_progress_limit: 4,
            manual_max_secs: 60.0,
        }
    }
}

// --- Safety bounds ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub ph_min: f64,
    pub ph_max: f64,
    pub orp_min: f64,
    pub orp_max: f64,
    /// Water temperature (Celsius) that trips the heater cutoff
    pub max_temperature_c: f64,
    /// Status band edges between the hard bounds and the dosing targets
    pub ph_low: f64,
    pub orp_high: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            ph_min: 5.8,
            ph_max: 9.2,
            orp_min: 100.0,
            orp_max: 900.0,
            max_temperature_c: 41.0,
            ph_low: 7.2,
            orp_high: 800.0,
        }
    }
}

// --- Persistence and outbound hooks ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub events_path: String,
    pub readings_path: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            events_path: "events.csv".into(),
            readings_path: "readings.csv".into(),
        }
    }
}

/// External commands (program followed by arguments).  Empty = disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub heater_off: Vec<String>,
    /// Receives the event and status snapshot as JSON on stdin
    pub notify: Vec<String>,
}

impl SystemConfig {
    /// Range-check every field the controller depends on.
    pub fn validate(&self) -> Result<(), &'static str> {
        let b = &self.bounds;
        if b.ph_min >= b.ph_max {
            return Err("bounds.ph_min must be below bounds.ph_max");
        }
        if b.orp_min >= b.orp_max {
            return Err("bounds.orp_min must be below bounds.orp_max");
        }
        if !(b.ph_min..=b.ph_max).contains(&self.dosing.acid.target) {
            return Err("dosing.acid.target must lie inside the pH bounds");
        }
        if !(b.orp_min..=b.orp_max).contains(&self.dosing.bleach.target) {
            return Err("dosing.bleach.target must lie inside the ORP bounds");
        }
        if self.dosing.base.enabled && self.dosing.base.target >= self.dosing.acid.target {
            return Err("dosing.base.target must be below dosing.acid.target");
        }
        for policy in [&self.dosing.acid, &self.dosing.bleach, &self.dosing.base] {
            if policy.gain <= 0.0 || policy.seconds_per_unit <= 0.0 || policy.max_seconds <= 0.0 {
                return Err("dosing gains, seconds_per_unit and max_seconds must be positive");
            }
        }
        if self.dosing.manual_max_secs <= 0.0 {
            return Err("dosing.manual_max_secs must be positive");
        }

        let t = &self.timing;
        let durations = [
            t.flow_timeout_secs,
            t.flow_settle_secs,
            t.measure_settle_secs,
            t.measure_reading_timeout_secs,
            t.mix_secs,
            t.idle_secs,
            t.pause_secs,
            t.status_hold_secs,
        ];
        if durations.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err("timing values must be positive seconds");
        }
        if t.flow_settle_secs <= self.serial.cycle_secs() + 1.0 {
            return Err("timing.flow_settle_secs must exceed the sensor cycle plus one second");
        }

        let s = &self.serial;
        if s.response_timeout_ms == 0 || s.reading_timeout_ms == 0 {
            return Err("serial timeouts must be non-zero");
        }
        let p = &self.pins;
        if p.edge_poll_ms == 0 {
            return Err("pins.edge_poll_ms must be non-zero");
        }
        let numbers = [
            p.circulation_pump,
            p.acid_pump,
            p.bleach_pump,
            p.base_pump,
            p.flow_switch,
            p.failsafe,
            p.mux_x,
            p.mux_y,
        ];
        if numbers.iter().enumerate().any(|(i, n)| numbers[i + 1..].contains(n)) {
            return Err("pins must all be distinct");
        }
        Ok(())
    }
}
