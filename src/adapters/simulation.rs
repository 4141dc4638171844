//! In-memory hardware for `--simulate` runs and tests.
//!
//! | Type              | Implements     | Stands in for                      |
//! |-------------------|----------------|------------------------------------|
//! | `MemoryPins`      | PinBackend     | sysfs GPIO                         |
//! | `SimulatedProbes` | LineTransport  | probe board behind the mux + UART  |
//! | `MemorySink`      | EventSink      | CSV journal                        |
//!
//! `MemoryPins` can link an output to an input so the flow switch follows
//! the circulation pump.  `SimulatedProbes` answers the probe protocol from
//! a [`WaterModel`] that drifts on its own and responds to whichever dosing
//! pins are high.

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use log::debug;

use crate::app::events::LogEvent;
use crate::app::ports::{EventSink, LineTransport, PinBackend};
use crate::config::PinConfig;
use crate::drivers::gpio::{Direction, Edge};
use crate::error::{GpioError, SensorError};
use crate::sensors::{ACK, Probe, Reading};

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// Writes remembered per pin; older ones are forgotten.
pub const WRITE_HISTORY: usize = 256;

#[derive(Default)]
struct Board {
    levels: BTreeMap<u32, bool>,
    configured: BTreeMap<u32, (Direction, Edge)>,
    writes: BTreeMap<u32, VecDeque<bool>>,
    failing: BTreeSet<u32>,
    /// Pins whose reads and writes fail from now on.
    broken: BTreeSet<u32>,
    /// `(output, input)`: the input mirrors every write to the output.
    links: Vec<(u32, u32)>,
}

/// Shared handle to one simulated board; clones see the same pins.
#[derive(Clone, Default)]
pub struct MemoryPins {
    board: Rc<RefCell<Board>>,
}

impl MemoryPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an input level from outside (switch, sensor).
    pub fn drive(&self, pin: u32, value: bool) {
        self.board.borrow_mut().levels.insert(pin, value);
    }

    pub fn level(&self, pin: u32) -> bool {
        self.board.borrow().levels.get(&pin).copied().unwrap_or(false)
    }

    /// Make `input` follow every write to `output`.
    pub fn link(&self, output: u32, input: u32) {
        self.board.borrow_mut().links.push((output, input));
    }

    pub fn unlink(&self, input: u32) {
        self.board.borrow_mut().links.retain(|(_, i)| *i != input);
    }

    /// The last [`WRITE_HISTORY`] values written to `pin`, oldest first.
    pub fn writes_to(&self, pin: u32) -> Vec<bool> {
        self.board
            .borrow()
            .writes
            .get(&pin)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Make configuring `pin` fail.
    pub fn fail_configure(&self, pin: u32) {
        self.board.borrow_mut().failing.insert(pin);
    }

    /// Make every later read or write of `pin` fail, as a wire coming loose would.
    pub fn break_pin(&self, pin: u32) {
        self.board.borrow_mut().broken.insert(pin);
    }

    pub fn is_configured(&self, pin: u32) -> bool {
        self.board.borrow().configured.contains_key(&pin)
    }
}

impl PinBackend for MemoryPins {
    fn configure(&mut self, pin: u32, direction: Direction, edge: Edge) -> Result<(), GpioError> {
        let mut board = self.board.borrow_mut();
        if board.failing.contains(&pin) {
            return Err(GpioError::Io {
                pin,
                detail: "simulated export failure".into(),
            });
        }
        board.configured.insert(pin, (direction, edge));
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool, GpioError> {
        if self.board.borrow().broken.contains(&pin) {
            return Err(broken(pin));
        }
        Ok(self.level(pin))
    }

    fn write(&mut self, pin: u32, value: bool) -> Result<(), GpioError> {
        let mut board = self.board.borrow_mut();
        if board.broken.contains(&pin) {
            return Err(broken(pin));
        }
        let history = board.writes.entry(pin).or_default();
        if history.len() == WRITE_HISTORY {
            history.pop_front();
        }
        history.push_back(value);
        board.levels.insert(pin, value);
        let followers: Vec<u32> = board
            .links
            .iter()
            .filter(|(out, _)| *out == pin)
            .map(|(_, input)| *input)
            .collect();
        for input in followers {
            board.levels.insert(input, value);
        }
        Ok(())
    }
}

fn broken(pin: u32) -> GpioError {
    GpioError::Io {
        pin,
        detail: "simulated I/O error".into(),
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Keeps every journaled event and reading in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<LogEvent>>>,
    readings: Rc<RefCell<Vec<Reading>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.borrow().clone()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.borrow().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.events.borrow().iter().any(|e| e.message.contains(needle))
    }
}

impl EventSink for MemorySink {
    fn record_event(&mut self, event: &LogEvent) {
        self.events.borrow_mut().push(event.clone());
    }

    fn record_reading(&mut self, reading: &Reading) {
        self.readings.borrow_mut().push(*reading);
    }
}

// ---------------------------------------------------------------------------
// Water and probes
// ---------------------------------------------------------------------------

/// Simulated water chemistry.  Rates are per second.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterModel {
    pub temperature: f64,
    pub ph: f64,
    pub orp: f64,
    /// pH drop while the acid pump runs.
    pub acid_rate: f64,
    /// pH rise while the base pump runs.
    pub base_rate: f64,
    /// ORP rise while the bleach pump runs.
    pub bleach_rate: f64,
    /// Natural pH creep upwards (aeration).
    pub ph_drift: f64,
    /// Natural sanitiser consumption.
    pub orp_decay: f64,
}

impl WaterModel {
    /// Water that only changes when set from outside.
    pub fn steady(temperature: f64, ph: f64, orp: f64) -> Self {
        Self {
            temperature,
            ph,
            orp,
            acid_rate: 0.0,
            base_rate: 0.0,
            bleach_rate: 0.0,
            ph_drift: 0.0,
            orp_decay: 0.0,
        }
    }

    fn step(&mut self, dt: f64, acid: bool, base: bool, bleach: bool) {
        self.ph += self.ph_drift * dt;
        self.orp -= self.orp_decay * dt;
        if acid {
            self.ph -= self.acid_rate * dt;
        }
        if base {
            self.ph += self.base_rate * dt;
        }
        if bleach {
            self.orp += self.bleach_rate * dt;
        }
    }
}

impl Default for WaterModel {
    fn default() -> Self {
        Self {
            temperature: 38.5,
            ph: 7.8,
            orp: 620.0,
            acid_rate: 0.01,
            base_rate: 0.01,
            bleach_rate: 4.0,
            ph_drift: 0.000_02,
            orp_decay: 0.005,
        }
    }
}

/// Outside controls for a running [`SimulatedProbes`].
#[derive(Clone)]
pub struct ProbeBench {
    water: Rc<RefCell<WaterModel>>,
    silent: Rc<Cell<bool>>,
}

impl ProbeBench {
    pub fn water(&self) -> WaterModel {
        self.water.borrow().clone()
    }

    pub fn set_water(&self, temperature: f64, ph: f64, orp: f64) {
        let mut w = self.water.borrow_mut();
        w.temperature = temperature;
        w.ph = ph;
        w.orp = orp;
    }

    /// A silent board never answers, so every read times out.
    pub fn set_silent(&self, silent: bool) {
        self.silent.set(silent);
    }
}

pub struct SimulatedProbes {
    pins: MemoryPins,
    mux: (u32, u32),
    acid: u32,
    base: u32,
    bleach: u32,
    bench: ProbeBench,
    latency: Duration,
    pending: VecDeque<String>,
    last_step: Instant,
}

impl SimulatedProbes {
    pub fn new(pins: MemoryPins, config: &PinConfig, water: WaterModel) -> Self {
        Self {
            pins,
            mux: (config.mux_x, config.mux_y),
            acid: config.acid_pump,
            base: config.base_pump,
            bleach: config.bleach_pump,
            bench: ProbeBench {
                water: Rc::new(RefCell::new(water)),
                silent: Rc::new(Cell::new(false)),
            },
            latency: Duration::from_millis(20),
            pending: VecDeque::new(),
            last_step: Instant::now(),
        }
    }

    /// Delay before each line becomes readable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn bench(&self) -> ProbeBench {
        self.bench.clone()
    }

    fn advance_water(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        let (acid, base, bleach) = (
            self.pins.level(self.acid),
            self.pins.level(self.base),
            self.pins.level(self.bleach),
        );
        self.bench.water.borrow_mut().step(dt, acid, base, bleach);
    }

    fn selected(&self) -> Option<Probe> {
        Probe::from_mux(self.pins.level(self.mux.0), self.pins.level(self.mux.1))
    }
}

impl LineTransport for SimulatedProbes {
    fn discard_input(&mut self) -> Result<(), SensorError> {
        self.pending.clear();
        Ok(())
    }

    fn send(&mut self, command: &str) -> Result<(), SensorError> {
        debug!("sim probe <- {:?}", command);
        if self.bench.silent.get() {
            return Ok(());
        }
        self.advance_water();
        if command == "R" {
            let water = self.bench.water();
            let value = match self.selected() {
                Some(Probe::Temperature) => format!("{:.2}", water.temperature),
                Some(Probe::Ph) => format!("{:.2}", water.ph),
                Some(Probe::Orp) => format!("{:.1}", water.orp),
                None => String::new(),
            };
            self.pending.push_back(value);
            self.pending.push_back(ACK.to_string());
        } else if command.starts_with("T,") {
            self.pending.push_back(ACK.to_string());
        } else {
            self.pending.push_back("*ER".to_string());
        }
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, SensorError> {
        if self.pending.is_empty() {
            async_io_mini::Timer::after(timeout).await;
            return Err(SensorError::Timeout);
        }
        async_io_mini::Timer::after(self.latency.min(timeout)).await;
        self.pending.pop_front().ok_or(SensorError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn linked_input_follows_output() {
        let mut pins = MemoryPins::new();
        pins.link(24, 7);
        pins.write(24, true).unwrap();
        assert!(pins.level(7));
        pins.write(24, false).unwrap();
        assert!(!pins.level(7));
        pins.unlink(7);
        pins.write(24, true).unwrap();
        assert!(!pins.level(7));
    }

    #[test]
    fn write_history_is_bounded() {
        let mut pins = MemoryPins::new();
        for n in 0..WRITE_HISTORY * 4 {
            pins.write(22, n % 2 == 0).unwrap();
        }
        pins.write(24, true).unwrap();
        let mux = pins.writes_to(22);
        assert_eq!(mux.len(), WRITE_HISTORY);
        assert!(!mux[mux.len() - 1]);
        assert_eq!(pins.writes_to(24), vec![true]);
        assert!(pins.writes_to(25).is_empty());
    }

    #[test]
    fn probes_answer_for_selected_channel() {
        let pins = MemoryPins::new();
        let config = PinConfig::default();
        let mut probes = SimulatedProbes::new(pins.clone(), &config, WaterModel::steady(38.0, 7.45, 700.0))
            .with_latency(Duration::ZERO);

        pins.drive(config.mux_x, false);
        pins.drive(config.mux_y, true);
        probes.send("R").unwrap();
        assert_eq!(block_on(probes.read_line(Duration::from_millis(5))).unwrap(), "7.45");
        assert_eq!(block_on(probes.read_line(Duration::from_millis(5))).unwrap(), ACK);

        pins.drive(config.mux_x, true);
        pins.drive(config.mux_y, false);
        probes.send("R").unwrap();
        assert_eq!(block_on(probes.read_line(Duration::from_millis(5))).unwrap(), "700.0");
    }

    #[test]
    fn acid_pump_lowers_ph() {
        let pins = MemoryPins::new();
        let config = PinConfig::default();
        let mut water = WaterModel::steady(38.0, 7.8, 700.0);
        water.acid_rate = 1.0;
        let mut probes = SimulatedProbes::new(pins.clone(), &config, water);
        let bench = probes.bench();
        pins.drive(config.acid_pump, true);
        std::thread::sleep(Duration::from_millis(50));
        probes.send("R").unwrap();
        assert!(bench.water().ph < 7.8);
    }

    #[test]
    fn silent_board_times_out() {
        let mut probes = SimulatedProbes::new(MemoryPins::new(), &PinConfig::default(), WaterModel::default());
        probes.bench().set_silent(true);
        probes.send("R").unwrap();
        assert_eq!(
            block_on(probes.read_line(Duration::from_millis(5))),
            Err(SensorError::Timeout)
        );
    }
}
