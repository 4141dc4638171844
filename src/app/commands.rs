//! Inbound commands to the controller.
//!
//! Operator surfaces (the stdin console, tests) send these to the
//! [`Controller`](super::service::Controller).  They deserialize from
//! one JSON object per line, for example
//! `{"command":"dispense","pump":"acid","seconds":5}`.

use serde::Deserialize;

use crate::drivers::pump::PumpKind;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AppCommand {
    /// Status snapshot; also keeps circulation running briefly.
    Status,

    /// Leave RESETTABLE_ERROR and measure again.
    Reset,

    /// Stop dosing until resumed or the pause timer expires.
    Pause {
        #[serde(default)]
        reason: String,
    },

    Resume,

    /// Run one pump for a fixed time.
    Dispense { pump: PumpKind, seconds: f64 },
}
