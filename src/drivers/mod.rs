//! Digital I/O and the pump relays hanging off it.

pub mod gpio;
pub mod pump;
