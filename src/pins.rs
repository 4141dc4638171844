//! Default GPIO assignments for the spa controller board (BCM numbering).
//!
//! Single source of truth for the defaults in [`PinConfig`](crate::config::PinConfig);
//! drivers receive pin numbers through configuration rather than hard-coding them.

// ---------------------------------------------------------------------------
// Relay outputs
// ---------------------------------------------------------------------------

/// Circulation pump relay (active HIGH).
pub const CIRCULATION_PUMP: u32 = 24;
/// Sodium hypochlorite (bleach) peristaltic pump.
pub const BLEACH_PUMP: u32 = 25;
/// Acid (pH down) peristaltic pump.
pub const ACID_PUMP: u32 = 11;
/// Base (pH up) peristaltic pump.  Unused unless base dosing is enabled.
pub const BASE_PUMP: u32 = 9;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Paddle flow switch: HIGH = water moving past the probes.
pub const FLOW_SWITCH: u32 = 7;
/// Hardware failsafe (float switch / over-temp cutout), rising edge armed.
pub const FAILSAFE: u32 = 8;

// ---------------------------------------------------------------------------
// Probe multiplexer
// ---------------------------------------------------------------------------

/// Analog mux address bit X.
pub const MUX_X: u32 = 18;
/// Analog mux address bit Y.
pub const MUX_Y: u32 = 23;

// x=0 y=0 temperature, x=0 y=1 pH, x=1 y=0 ORP
