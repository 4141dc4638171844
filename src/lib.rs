//! Hot tub water-chemistry controller.
//!
//! Library half of the `hottub` binary: the state machines, the sensor
//! channel, the dosing policy and every adapter, exposed so the
//! integration tests can drive the whole controller against in-memory
//! hardware.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod pins;
pub mod safety;
pub mod sensors;

pub use error::{Error, Result};
