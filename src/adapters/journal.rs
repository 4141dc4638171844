//! CSV journal adapter.
//!
//! Implements [`EventSink`] by appending one row per event and one row
//! per accurate reading to two CSV files:
//!
//! ```text
//! events.csv    timestamp,level,message
//! readings.csv  timestamp,temperature,ph,orp
//! ```
//!
//! Files are opened in append mode for every row, so rotating them from
//! outside never needs a restart.  A failed write is logged and dropped;
//! the controller keeps running without its journal.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use log::{error, info};

use crate::app::events::LogEvent;
use crate::app::ports::EventSink;
use crate::config::JournalConfig;
use crate::sensors::Reading;

const EVENTS_HEADER: &str = "timestamp,level,message";
const READINGS_HEADER: &str = "timestamp,temperature,ph,orp";

pub struct CsvJournal {
    events: PathBuf,
    readings: PathBuf,
}

impl CsvJournal {
    pub fn new(config: &JournalConfig) -> Self {
        info!("Journal: events -> {}, readings -> {}", config.events_path, config.readings_path);
        Self {
            events: config.events_path.clone().into(),
            readings: config.readings_path.clone().into(),
        }
    }

    fn append(path: &Path, header: &str, row: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                if file.metadata()?.len() == 0 {
                    writeln!(file, "{header}")?;
                }
                writeln!(file, "{row}")
            });
        if let Err(e) = result {
            error!("journal write to {} failed: {}", path.display(), e);
        }
    }
}

/// Quote a CSV field when it needs it.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl EventSink for CsvJournal {
    fn record_event(&mut self, event: &LogEvent) {
        let row = format!(
            "{},{},{}",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.level,
            csv_field(&event.message)
        );
        Self::append(&self.events, EVENTS_HEADER, &row);
    }

    fn record_reading(&mut self, reading: &Reading) {
        let row = format!(
            "{},{:.2},{:.2},{:.1}",
            reading.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            reading.temperature,
            reading.ph,
            reading.orp
        );
        Self::append(&self.readings, READINGS_HEADER, &row);
    }
}
