//! Linux sysfs GPIO adapter.
//!
//! Implements [`PinBackend`] over `/sys/class/gpio`:
//!
//! ```text
//!   <root>/export              ← "<pin>"
//!   <root>/gpio<pin>/direction ← "in" | "out"
//!   <root>/gpio<pin>/edge      ← "none" | "rising" | "falling" | "both"
//!   <root>/gpio<pin>/value     ↔ "0" | "1"
//! ```
//!
//! After an export the kernel creates the pin directory asynchronously and
//! udev may still be fixing permissions, so the first attribute write is
//! retried for a short while.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::app::ports::PinBackend;
use crate::drivers::gpio::{Direction, Edge};
use crate::error::GpioError;

pub const DEFAULT_ROOT: &str = "/sys/class/gpio";

const EXPORT_ATTEMPTS: u32 = 20;
const EXPORT_BACKOFF: Duration = Duration::from_millis(50);

pub struct SysfsPins {
    root: PathBuf,
}

impl SysfsPins {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("SysfsPins: {}", root.display());
        Self { root }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn attr(&self, pin: u32, name: &str) -> PathBuf {
        self.pin_dir(pin).join(name)
    }

    fn io_error(pin: u32, path: &Path, e: &io::Error) -> GpioError {
        GpioError::Io {
            pin,
            detail: format!("{}: {}", path.display(), e),
        }
    }

    fn write_attr(&self, pin: u32, name: &str, value: &str) -> Result<(), GpioError> {
        let path = self.attr(pin, name);
        fs::write(&path, value).map_err(|e| Self::io_error(pin, &path, &e))
    }

    /// Write with retries while a freshly exported pin settles.
    fn write_attr_settling(&self, pin: u32, name: &str, value: &str) -> Result<(), GpioError> {
        let path = self.attr(pin, name);
        let mut attempt = 1;
        loop {
            match fs::write(&path, value) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < EXPORT_ATTEMPTS => {
                    debug!("gpio{}: {} not ready ({}), retrying", pin, name, e);
                    attempt += 1;
                    thread::sleep(EXPORT_BACKOFF);
                }
                Err(e) => return Err(Self::io_error(pin, &path, &e)),
            }
        }
    }

    fn export(&self, pin: u32) -> Result<(), GpioError> {
        if self.pin_dir(pin).exists() {
            return Ok(());
        }
        let path = self.root.join("export");
        fs::write(&path, pin.to_string()).map_err(|e| Self::io_error(pin, &path, &e))
    }
}

impl PinBackend for SysfsPins {
    fn configure(&mut self, pin: u32, direction: Direction, edge: Edge) -> Result<(), GpioError> {
        self.export(pin)?;
        self.write_attr_settling(pin, "direction", direction.as_str())?;
        if direction == Direction::Input {
            self.write_attr(pin, "edge", edge.as_str())?;
        }
        debug!("gpio{}: {} edge={}", pin, direction.as_str(), edge.as_str());
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool, GpioError> {
        let path = self.attr(pin, "value");
        let raw = fs::read_to_string(&path).map_err(|e| Self::io_error(pin, &path, &e))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(GpioError::BadValue {
                pin,
                raw: other.to_string(),
            }),
        }
    }

    fn write(&mut self, pin: u32, value: bool) -> Result<(), GpioError> {
        self.write_attr(pin, "value", if value { "1" } else { "0" })
    }
}
