//! Mock hardware for integration tests.
//!
//! Wires a [`Controller`] to `MemoryPins`, zero-latency `SimulatedProbes`
//! and recording doubles for the heater and notifier, with timings short
//! enough that a full measure → decide cycle completes in a few seconds.

use core::future::Future;
use core::time::Duration;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use futures_lite::future::{block_on, or};

use hottub::adapters::simulation::{MemoryPins, MemorySink, ProbeBench, SimulatedProbes, WaterModel};
use hottub::app::events::{EventLevel, LogEvent};
use hottub::app::ports::{HeaterPort, Notifier};
use hottub::app::service::{Controller, Ports};
use hottub::app::status::StatusSnapshot;
use hottub::config::SystemConfig;

// ── Recording doubles ─────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Rc<RefCell<Vec<(LogEvent, StatusSnapshot)>>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn levels(&self) -> Vec<EventLevel> {
        self.sent.borrow().iter().map(|(e, _)| e.level).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.sent.borrow().iter().any(|(e, _)| e.message.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, event: &LogEvent, status: &StatusSnapshot) -> Result<(), String> {
        self.sent.borrow_mut().push((event.clone(), status.clone()));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingHeater {
    pub calls: Rc<RefCell<u32>>,
}

impl RecordingHeater {
    pub fn calls(&self) -> u32 {
        *self.calls.borrow()
    }
}

impl HeaterPort for RecordingHeater {
    fn heater_off(&mut self) -> Result<(), String> {
        *self.calls.borrow_mut() += 1;
        Ok(())
    }
}

// ── Config ────────────────────────────────────────────────────

/// Defaults with every delay shrunk to test scale.
///
/// The serial timeouts bound one sensor cycle at 0.23 s, so a 1.5 s flow
/// settle still passes validation.
pub fn fast_config() -> SystemConfig {
    let mut c = SystemConfig::default();
    c.serial.response_timeout_ms = 20;
    c.serial.reading_timeout_ms = 50;
    c.serial.retry_budget = 1;
    c.pins.edge_poll_ms = 5;
    c.timing.flow_timeout_secs = 0.5;
    c.timing.flow_settle_secs = 1.5;
    c.timing.measure_settle_secs = 0.1;
    c.timing.measure_reading_timeout_secs = 3.0;
    c.timing.mix_secs = 0.3;
    c.timing.idle_secs = 60.0;
    c.timing.pause_secs = 60.0;
    c.timing.status_hold_secs = 10.0;
    c
}

/// Water inside every band: nothing to dose.
pub fn balanced_water() -> WaterModel {
    WaterModel::steady(38.0, 7.4, 700.0)
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub controller: Controller,
    pub config: SystemConfig,
    pub pins: MemoryPins,
    pub sink: MemorySink,
    pub notifier: RecordingNotifier,
    pub heater: RecordingHeater,
    pub bench: ProbeBench,
    probes: RefCell<Option<SimulatedProbes>>,
}

#[allow(dead_code)]
impl Rig {
    /// Flow follows the circulation pump unless `plumbed` is false.
    pub fn new(config: SystemConfig, water: WaterModel, plumbed: bool) -> Self {
        let pins = MemoryPins::new();
        if plumbed {
            pins.link(config.pins.circulation_pump, config.pins.flow_switch);
        }
        let probes = SimulatedProbes::new(pins.clone(), &config.pins, water).with_latency(Duration::ZERO);
        let bench = probes.bench();
        let sink = MemorySink::default();
        let notifier = RecordingNotifier::default();
        let heater = RecordingHeater::default();
        let ports = Ports {
            pins: Box::new(pins.clone()),
            sink: Box::new(sink.clone()),
            notifier: Box::new(notifier.clone()),
            heater: Box::new(heater.clone()),
        };
        let controller = Controller::new(config.clone(), ports).expect("valid test config");
        Self {
            controller,
            config,
            pins,
            sink,
            notifier,
            heater,
            bench,
            probes: RefCell::new(Some(probes)),
        }
    }

    /// Run the controller alongside `scenario` until the scenario ends.
    ///
    /// Panics if the controller stops first.
    pub fn drive(&self, scenario: impl Future<Output = ()>) {
        let probes = self.probes.borrow_mut().take().expect("rig driven once");
        let outcome = block_on(or(
            async { Some(self.controller.run(probes).await) },
            async {
                scenario.await;
                None
            },
        ));
        if let Some(result) = outcome {
            panic!("controller stopped during the scenario: {result:?}");
        }
    }

    /// Run the controller alongside `scenario` and return what it stops with.
    ///
    /// Panics if it is still running `grace` after the scenario ends.
    pub fn run_to_halt(&self, grace: Duration, scenario: impl Future<Output = ()>) -> hottub::Result<()> {
        let probes = self.probes.borrow_mut().take().expect("rig driven once");
        let outcome = block_on(or(
            async { Some(self.controller.run(probes).await) },
            async {
                scenario.await;
                sleep(grace).await;
                None
            },
        ));
        outcome.expect("controller kept running")
    }
}

/// Poll `cond` every 10 ms until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        async_io_mini::Timer::after(Duration::from_millis(10)).await;
    }
}

pub async fn sleep(duration: Duration) {
    async_io_mini::Timer::after(duration).await;
}
