//! Proportional dosing policy.
//!
//! Pure functions over a [`Reading`]; no I/O.  The dosing state machine
//! calls [`decide`] once per accurate reading after the hard bounds in
//! [`crate::safety`] have passed.
//!
//! Duration for one chemical:
//!
//! ```text
//! seconds = round1( min( (deviation * gain + extra) * seconds_per_unit, max_seconds ) )
//! ```
//!
//! where `deviation` is how far the reading sits past the policy target
//! (pH above the acid ceiling, pH below the base floor, ORP below the
//! bleach floor).
//!
//! Repeating the same chemical with a duration that did not shrink counts
//! as *no progress*; past the configured limit the controller stops and
//! asks for an operator (empty reservoir or failed pump).

use serde::Serialize;

use crate::config::{ChemicalPolicy, DosingConfig};
use crate::drivers::pump::PumpKind;
use crate::sensors::Reading;

/// A pump run request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dose {
    pub pump: PumpKind,
    pub seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Dose(Dose),
    /// Water is in range.
    Idle,
    /// Same chemical, no shrinking duration, too many times in a row.
    NoProgress { pump: PumpKind, repeats: u32 },
}

/// Round to one decimal place.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn dose_seconds(policy: &ChemicalPolicy, deviation: f64) -> f64 {
    let raw = (deviation * policy.gain + policy.extra) * policy.seconds_per_unit;
    round_tenths(raw.min(policy.max_seconds).max(0.0))
}

/// Chemical and duration the reading calls for, if any.
///
/// pH is corrected before sanitiser: acid, then base, then bleach.
pub fn select_dose(dosing: &DosingConfig, reading: &Reading) -> Option<Dose> {
    let candidates = [
        (PumpKind::Acid, &dosing.acid, reading.ph - dosing.acid.target),
        (PumpKind::Base, &dosing.base, dosing.base.target - reading.ph),
        (PumpKind::Bleach, &dosing.bleach, dosing.bleach.target - reading.orp),
    ];
    candidates
        .into_iter()
        .find(|(_, policy, deviation)| policy.enabled && *deviation > 0.0)
        .map(|(pump, policy, deviation)| Dose {
            pump,
            seconds: dose_seconds(policy, deviation),
        })
}

/// Previous dose and the running no-progress count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoseMemory {
    last: Option<Dose>,
    no_progress: u32,
}

impl DoseMemory {
    pub fn last(&self) -> Option<Dose> {
        self.last
    }

    pub fn no_progress(&self) -> u32 {
        self.no_progress
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Remember `dose`; returns the repeat count once it exceeds `limit`.
    ///
    /// The memory is cleared when it escalates so a reset starts counting
    /// afresh.
    pub fn record(&mut self, dose: Dose, limit: u32) -> Option<u32> {
        match self.last {
            Some(prev) if prev.pump == dose.pump && dose.seconds >= prev.seconds => {
                self.no_progress += 1;
            }
            _ => self.no_progress = 0,
        }
        self.last = Some(dose);
        if self.no_progress > limit {
            let repeats = self.no_progress;
            self.clear();
            Some(repeats)
        } else {
            None
        }
    }
}

/// Full decision for one in-bounds reading.
pub fn decide(dosing: &DosingConfig, memory: &mut DoseMemory, reading: &Reading) -> Decision {
    let Some(dose) = select_dose(dosing, reading) else {
        memory.clear();
        return Decision::Idle;
    };
    match memory.record(dose, dosing.no_progress_limit) {
        Some(repeats) => Decision::NoProgress {
            pump: dose.pump,
            repeats,
        },
        None => Decision::Dose(dose),
    }
}
