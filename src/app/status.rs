//! Status snapshot for operators and notifications.
//!
//! Readings are banded against the configured targets and hard bounds:
//!
//! ```text
//!  pH   SUPER_LOW < ph_min ≤ LOW < ph_low ≤ OK ≤ acid.target < HIGH ≤ ph_max < SUPER_HIGH
//!  ORP  SUPER_LOW < orp_min ≤ LOW < bleach.target ≤ OK ≤ orp_high < HIGH ≤ orp_max < SUPER_HIGH
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SystemConfig;
use crate::fsm::circulation::{CircState, CirculationMachine};
use crate::fsm::context::Shared;
use crate::fsm::dosing::{MainMachine, MainPayload};
use crate::sensors::Reading;

use super::events::LogEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Band {
    SuperLow,
    Low,
    Ok,
    High,
    SuperHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowBand {
    /// Circulation pump not running.
    Off,
    NoFlow,
    Good,
}

impl FlowBand {
    pub fn of(state: Option<CircState>) -> Self {
        match state {
            None | Some(CircState::Off) => Self::Off,
            Some(CircState::OnNoFlow) => Self::NoFlow,
            Some(CircState::OnFlowGood | CircState::OnReadingsAccurate) => Self::Good,
        }
    }
}

pub fn ph_band(config: &SystemConfig, ph: f64) -> Band {
    let b = &config.bounds;
    if ph < b.ph_min {
        Band::SuperLow
    } else if ph > b.ph_max {
        Band::SuperHigh
    } else if ph > config.dosing.acid.target {
        Band::High
    } else if ph < b.ph_low {
        Band::Low
    } else {
        Band::Ok
    }
}

pub fn orp_band(config: &SystemConfig, orp: f64) -> Band {
    let b = &config.bounds;
    if orp < b.orp_min {
        Band::SuperLow
    } else if orp > b.orp_max {
        Band::SuperHigh
    } else if orp < config.dosing.bleach.target {
        Band::Low
    } else if orp > b.orp_high {
        Band::High
    } else {
        Band::Ok
    }
}

pub fn temperature_band(config: &SystemConfig, celsius: f64) -> Band {
    if celsius > config.bounds.max_temperature_c {
        Band::High
    } else {
        Band::Ok
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingStatus {
    #[serde(flatten)]
    pub reading: Reading,
    /// Taken while circulation had settled.
    pub accurate: bool,
    pub temperature_band: Band,
    pub ph_band: Band,
    pub orp_band: Band,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub reading: Option<ReadingStatus>,
    pub flow: FlowBand,
    /// RFC 3339 timestamp, or `"never"`.
    pub flow_last_good: String,
    pub main_state: &'static str,
    pub main_payload: Option<MainPayload>,
    pub circulation_state: &'static str,
    /// Oldest first.
    pub recent_events: Vec<LogEvent>,
    /// Oldest first.
    pub recent_readings: Vec<Reading>,
}

impl StatusSnapshot {
    pub fn capture(shared: &Shared, main: &MainMachine, circulation: &CirculationMachine) -> Self {
        let config = &shared.config;
        let reading = shared.last_reading().map(|r| ReadingStatus {
            reading: r,
            accurate: shared.readings_accurate(),
            temperature_band: temperature_band(config, r.temperature),
            ph_band: ph_band(config, r.ph),
            orp_band: orp_band(config, r.orp),
        });
        Self {
            taken_at: Utc::now(),
            reading,
            flow: FlowBand::of(circulation.state()),
            flow_last_good: shared
                .flow_last_good()
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
            main_state: main.state_name(),
            main_payload: main.payload(),
            circulation_state: circulation.state_name(),
            recent_events: shared.recent_events(),
            recent_readings: shared.recent_readings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ph_bands_follow_targets_and_bounds() {
        let c = SystemConfig::default();
        assert_eq!(ph_band(&c, 5.0), Band::SuperLow);
        assert_eq!(ph_band(&c, 7.0), Band::Low);
        assert_eq!(ph_band(&c, 7.4), Band::Ok);
        assert_eq!(ph_band(&c, 7.6), Band::Ok);
        assert_eq!(ph_band(&c, 7.8), Band::High);
        assert_eq!(ph_band(&c, 9.5), Band::SuperHigh);
    }

    #[test]
    fn orp_bands_follow_targets_and_bounds() {
        let c = SystemConfig::default();
        assert_eq!(orp_band(&c, 50.0), Band::SuperLow);
        assert_eq!(orp_band(&c, 600.0), Band::Low);
        assert_eq!(orp_band(&c, 700.0), Band::Ok);
        assert_eq!(orp_band(&c, 850.0), Band::High);
        assert_eq!(orp_band(&c, 950.0), Band::SuperHigh);
    }

    #[test]
    fn temperature_and_flow_bands() {
        let c = SystemConfig::default();
        assert_eq!(temperature_band(&c, 38.0), Band::Ok);
        assert_eq!(temperature_band(&c, 42.0), Band::High);
        assert_eq!(FlowBand::of(None), FlowBand::Off);
        assert_eq!(FlowBand::of(Some(CircState::OnNoFlow)), FlowBand::NoFlow);
        assert_eq!(FlowBand::of(Some(CircState::OnReadingsAccurate)), FlowBand::Good);
    }

    #[test]
    fn band_serializes_screaming() {
        assert_eq!(serde_json::to_string(&Band::SuperHigh).unwrap(), "\"SUPER_HIGH\"");
    }
}
