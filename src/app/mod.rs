//! Application core.
//!
//! Operator-facing API for the controller: the [`service::Controller`]
//! that runs both state machines, the commands it accepts, the status
//! snapshot it reports and the event records it emits.  All interaction
//! with hardware happens through the **port traits** in [`ports`], so this
//! layer runs unchanged against the in-memory adapters in tests.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod status;
