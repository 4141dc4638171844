//! Dosing pump relays (acid, bleach, base).
//!
//! Each pump is a plain on/off output.  This driver only maps a pump
//! kind to its pin; run-time limits are enforced by the dosing state
//! machine, which always switches the pin off when leaving `DISPENSE`.

use core::fmt;

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::config::PinConfig;
use crate::drivers::gpio::DigitalIo;
use crate::error::GpioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpKind {
    Acid,
    #[serde(alias = "chlorine")]
    Bleach,
    Base,
}

impl PumpKind {
    pub const ALL: [Self; 3] = [Self::Acid, Self::Bleach, Self::Base];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acid => "acid",
            Self::Bleach => "bleach",
            Self::Base => "base",
        }
    }

    pub const fn pin(self, pins: &PinConfig) -> u32 {
        match self {
            Self::Acid => pins.acid_pump,
            Self::Bleach => pins.bleach_pump,
            Self::Base => pins.base_pump,
        }
    }
}

impl fmt::Display for PumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switch every dosing pump off, attempting all of them even if one fails.
pub async fn all_off(io: &DigitalIo, pins: &PinConfig) -> Result<(), GpioError> {
    let mut first_error = None;
    for pump in PumpKind::ALL {
        if let Err(e) = io.set(pump.pin(pins), false).await {
            error!("failed to stop {} pump: {}", pump, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => {
            warn!("All dosing pumps off");
            Ok(())
        }
    }
}
