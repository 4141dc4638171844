//! Outbound application events.
//!
//! Every state transition and every dosing / warning / error / reset
//! decision becomes a [`LogEvent`].  The controller keeps a bounded
//! history for the status query and hands each event to the
//! [`EventSink`](super::ports::EventSink) port; adapters decide where
//! it goes (CSV journal, stderr, test recorder).

use chrono::{DateTime, Utc};
use core::fmt;
use serde::Serialize;

/// Severity tag attached to each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    Info,
    Dispense,
    Warning,
    Reset,
    Error,
    Fatal,
}

impl EventLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Dispense => "DISPENSE",
            Self::Warning => "WARNING",
            Self::Reset => "RESET",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// Levels that also go out through the [`Notifier`](super::ports::Notifier).
    pub const fn notifies(self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub level: EventLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn now(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
