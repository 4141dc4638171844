//! Hard safety bounds.
//!
//! Applied to every accurate reading before any dosing decision.  A
//! reading outside these bounds means either the water or a probe is in
//! a state where automatic dosing must stop until an operator looks at
//! it.  Over-temperature is checked first because it also triggers the
//! heater cutoff.

use core::fmt;

use crate::config::BoundsConfig;
use crate::sensors::Reading;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundsFault {
    OverTemperature(f64),
    PhOutOfRange(f64),
    OrpOutOfRange(f64),
}

impl BoundsFault {
    pub fn is_over_temperature(&self) -> bool {
        matches!(self, Self::OverTemperature(_))
    }
}

impl fmt::Display for BoundsFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverTemperature(t) => write!(f, "water too hot: {t:.1} C"),
            Self::PhOutOfRange(ph) => write!(f, "pH reading out of range: {ph:.2}"),
            Self::OrpOutOfRange(orp) => write!(f, "ORP reading out of range: {orp:.0} mV"),
        }
    }
}

/// First bound the reading violates, if any.  A temperature that is not a
/// finite number counts as over-temperature.
pub fn check_reading(bounds: &BoundsConfig, reading: &Reading) -> Option<BoundsFault> {
    if !reading.temperature.is_finite() || reading.temperature > bounds.max_temperature_c {
        return Some(BoundsFault::OverTemperature(reading.temperature));
    }
    if !(bounds.ph_min..=bounds.ph_max).contains(&reading.ph) {
        return Some(BoundsFault::PhOutOfRange(reading.ph));
    }
    if !(bounds.orp_min..=bounds.orp_max).contains(&reading.orp) {
        return Some(BoundsFault::OrpOutOfRange(reading.orp));
    }
    None
}
