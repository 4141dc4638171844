//! Shared controller context.
//!
//! `Shared` is the blackboard both state machines and the status query
//! read from.  Each field has a single writer:
//!
//! | Field               | Written by                          |
//! |---------------------|-------------------------------------|
//! | `last_reading`      | sensor polling loop                 |
//! | `readings_accurate` | circulation `ON_READINGS_ACCURATE`  |
//! | `flow_last_good`    | circulation supervisor              |
//! | `doses`             | main controller `MEASURE_DELAY`     |
//! | `status_hold_until` | status query                        |
//! | event history       | [`Shared::log`]                     |

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use heapless::HistoryBuffer;
use log::{debug, error, info, warn};

use crate::app::events::{EventLevel, LogEvent};
use crate::app::ports::{EventSink, HeaterPort};
use crate::config::SystemConfig;
use crate::control::dosing::DoseMemory;
use crate::drivers::gpio::DigitalIo;
use crate::sensors::{PollControl, Reading};

/// Events kept for the status query.
pub const EVENT_HISTORY: usize = 64;
/// Accurate readings kept for the status query.
pub const READING_HISTORY: usize = 128;
/// Pending operator notifications.
const NOTIFY_QUEUE: usize = 8;

/// Seconds from config to a `Duration`; non-finite or negative becomes zero.
pub fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

pub struct Shared {
    pub config: SystemConfig,
    pub io: Rc<DigitalIo>,
    pub polling: PollControl,
    pub doses: RefCell<DoseMemory>,

    events: RefCell<HistoryBuffer<LogEvent, EVENT_HISTORY>>,
    readings: RefCell<HistoryBuffer<Reading, READING_HISTORY>>,
    sink: RefCell<Box<dyn EventSink>>,
    heater: RefCell<Box<dyn HeaterPort>>,
    notifications: Channel<NoopRawMutex, LogEvent, NOTIFY_QUEUE>,

    last_reading: Cell<Option<Reading>>,
    readings_accurate: Cell<bool>,
    /// Fresh accurate readings; awaited only by `MEASURE_DELAY`.
    accurate: Signal<NoopRawMutex, Reading>,
    flow_last_good: Cell<Option<DateTime<Utc>>>,

    /// Poked whenever circulation demand may have changed.
    demand: Signal<NoopRawMutex, ()>,
    status_hold_until: Cell<Option<Instant>>,
}

impl Shared {
    pub fn new(
        config: SystemConfig,
        io: Rc<DigitalIo>,
        sink: Box<dyn EventSink>,
        heater: Box<dyn HeaterPort>,
    ) -> Self {
        Self {
            config,
            io,
            polling: PollControl::new(),
            doses: RefCell::new(DoseMemory::default()),
            events: RefCell::new(HistoryBuffer::new()),
            readings: RefCell::new(HistoryBuffer::new()),
            sink: RefCell::new(sink),
            heater: RefCell::new(heater),
            notifications: Channel::new(),
            last_reading: Cell::new(None),
            readings_accurate: Cell::new(false),
            accurate: Signal::new(),
            flow_last_good: Cell::new(None),
            demand: Signal::new(),
            status_hold_until: Cell::new(None),
        }
    }

    // ── Event journal ─────────────────────────────────────────

    /// Record a domain event: process log, history ring, durable sink,
    /// and the notification queue for notifying levels.
    pub fn log(&self, level: EventLevel, message: impl Into<String>) {
        let event = LogEvent::now(level, message);
        match level {
            EventLevel::Info | EventLevel::Dispense | EventLevel::Reset => {
                info!("[{}] {}", level, event.message);
            }
            EventLevel::Warning => warn!("[{}] {}", level, event.message),
            EventLevel::Error | EventLevel::Fatal => error!("[{}] {}", level, event.message),
        }
        self.sink.borrow_mut().record_event(&event);
        if level.notifies() && self.notifications.try_send(event.clone()).is_err() {
            warn!("notification queue full, dropping: {}", event.message);
        }
        self.events.borrow_mut().write(event);
    }

    pub fn recent_events(&self) -> Vec<LogEvent> {
        self.events.borrow().oldest_ordered().cloned().collect()
    }

    pub async fn next_notification(&self) -> LogEvent {
        self.notifications.receive().await
    }

    /// Notifications still queued, for delivery during shutdown.
    pub fn drain_notifications(&self) -> Vec<LogEvent> {
        core::iter::from_fn(|| self.notifications.try_receive().ok()).collect()
    }

    // ── Readings ──────────────────────────────────────────────

    /// Sink for the polling loop.  Only readings taken while the
    /// circulation supervisor trusts the probes are kept and journaled.
    pub fn record_reading(&self, reading: Reading) {
        self.last_reading.set(Some(reading));
        if !self.readings_accurate.get() {
            debug!("reading ignored: circulation not settled");
            return;
        }
        self.flow_last_good.set(Some(reading.timestamp));
        self.readings.borrow_mut().write(reading);
        self.sink.borrow_mut().record_reading(&reading);
        self.accurate.signal(reading);
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.last_reading.get()
    }

    pub fn recent_readings(&self) -> Vec<Reading> {
        self.readings.borrow().oldest_ordered().copied().collect()
    }

    pub fn readings_accurate(&self) -> bool {
        self.readings_accurate.get()
    }

    pub fn set_readings_accurate(&self, accurate: bool) {
        self.readings_accurate.set(accurate);
    }

    /// The next accurate reading produced after this call, or `None`.
    pub async fn next_accurate_reading(&self, timeout: Duration) -> Option<Reading> {
        self.accurate.reset();
        future::or(async { Some(self.accurate.wait().await) }, async {
            async_io_mini::Timer::after(timeout).await;
            None
        })
        .await
    }

    // ── Flow ──────────────────────────────────────────────────

    pub fn mark_flow_good(&self) {
        self.flow_last_good.set(Some(Utc::now()));
    }

    pub fn flow_last_good(&self) -> Option<DateTime<Utc>> {
        self.flow_last_good.get()
    }

    // ── Heater ────────────────────────────────────────────────

    /// Best effort; a failure is journaled as a warning and nothing more.
    pub fn heater_off(&self) {
        if let Err(e) = self.heater.borrow_mut().heater_off() {
            self.log(EventLevel::Warning, format!("Heater shutoff failed: {e}"));
        }
    }

    // ── Circulation demand ────────────────────────────────────

    pub fn request_demand_check(&self) {
        self.demand.signal(());
    }

    pub async fn demand_changed(&self) {
        self.demand.wait().await;
    }

    /// Keep circulation demanded for `seconds` from now.
    pub fn hold_circulation(&self, seconds: f64) {
        let until = Instant::now() + secs(seconds);
        if self.status_hold_until.get().is_none_or(|t| t < until) {
            self.status_hold_until.set(Some(until));
        }
        self.request_demand_check();
    }

    /// Time left on the status hold, `None` once it has lapsed.
    pub fn hold_remaining(&self) -> Option<Duration> {
        let until = self.status_hold_until.get()?;
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            self.status_hold_until.set(None);
            None
        } else {
            Some(left)
        }
    }
}
