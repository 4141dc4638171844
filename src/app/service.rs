//! Controller service: the hexagonal core.
//!
//! [`Controller`] owns both state machines, the shared context and the
//! digital I/O set.  It exposes a hardware-agnostic operator API; all I/O
//! flows through the port traits handed to [`Controller::new`] and the
//! [`LineTransport`] given to [`Controller::run`].
//!
//! ```text
//!  PinBackend ──▶ ┌───────────────────────────────┐ ──▶ EventSink
//!                 │          Controller            │
//! LineTransport ─▶│  main · circulation · sensors  │ ──▶ Notifier
//!                 │  demand · failsafe · edges     │ ──▶ HeaterPort
//!                 └───────────────────────────────┘
//! ```
//!
//! Everything runs as cooperating futures on one local executor.  The
//! first task to fail ends [`Controller::run`]; before returning, the
//! controller forces FATAL_ERROR and switches every pump off.

use core::cell::RefCell;
use core::time::Duration;
use std::rc::Rc;

use futures_lite::future::{self, or};
use log::{error, info, warn};

use crate::config::{PinConfig, SystemConfig};
use crate::control::dosing::round_tenths;
use crate::drivers::gpio::{DigitalIo, Edge, EdgeSubscription, FlowInput, PinSpec};
use crate::drivers::pump::{self, PumpKind};
use crate::error::{ActionError, Error, Result};
use crate::fsm::circulation::{self, CircState, CirculationMachine};
use crate::fsm::context::Shared;
use crate::fsm::dosing::{self, MainMachine, MainPayload, MainState};
use crate::sensors::SensorChannel;

use super::commands::AppCommand;
use super::events::{EventLevel, LogEvent};
use super::ports::{EventSink, HeaterPort, LineTransport, Notifier, PinBackend};
use super::status::StatusSnapshot;

/// Driven adapters the controller is built from.
pub struct Ports {
    pub pins: Box<dyn PinBackend>,
    pub sink: Box<dyn EventSink>,
    pub notifier: Box<dyn Notifier>,
    pub heater: Box<dyn HeaterPort>,
}

/// Every pin the controller drives or watches.
pub fn pin_map(pins: &PinConfig) -> Vec<(u32, PinSpec)> {
    vec![
        (pins.circulation_pump, PinSpec::output()),
        (pins.acid_pump, PinSpec::output()),
        (pins.bleach_pump, PinSpec::output()),
        (pins.base_pump, PinSpec::output()),
        (pins.mux_x, PinSpec::output()),
        (pins.mux_y, PinSpec::output()),
        (pins.flow_switch, PinSpec::input(Edge::Both)),
        (pins.failsafe, PinSpec::input(Edge::Rising)),
    ]
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct Controller {
    shared: Rc<Shared>,
    main: Rc<MainMachine>,
    circulation: Rc<CirculationMachine>,
    failsafe: EdgeSubscription,
    notifier: RefCell<Box<dyn Notifier>>,
}

impl Controller {
    /// Wire the machines to the ports.  Nothing touches hardware until
    /// [`run`](Self::run).
    pub fn new(config: SystemConfig, ports: Ports) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let io = Rc::new(DigitalIo::new(pin_map(&config.pins), ports.pins));
        let flow_pin = config.pins.flow_switch;
        let failsafe = io.subscribe(config.pins.failsafe)?;
        let main_flow = FlowInput::new(&io, flow_pin)?;
        let circulation_flow = FlowInput::new(&io, flow_pin)?;

        let shared = Rc::new(Shared::new(config, io, ports.sink, ports.heater));
        let main = dosing::new_machine(Rc::clone(&shared), main_flow);
        let circulation = circulation::new_machine(Rc::clone(&shared), Rc::clone(&main), circulation_flow);

        Ok(Self {
            shared,
            main,
            circulation,
            failsafe,
            notifier: RefCell::new(ports.notifier),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Run until a task fails.  The main controller starts in
    /// MEASURE_DELAY, circulation in OFF.
    pub async fn run(&self, transport: impl LineTransport) -> Result<()> {
        let mut channel = SensorChannel::new(transport, Rc::clone(&self.shared.io), &self.shared.config);
        info!("Controller starting");

        let result = or(
            self.main.run(MainState::MeasureDelay, MainPayload::None),
            or(
                self.circulation.run(CircState::Off, ()),
                or(
                    self.demand_loop(),
                    or(
                        self.failsafe_loop(),
                        or(
                            self.sensor_loop(&mut channel),
                            or(self.notify_loop(), or(self.edge_loop(), self.bring_up())),
                        ),
                    ),
                ),
            ),
        )
        .await;

        match &result {
            Ok(()) => warn!("Controller stopped"),
            Err(e) => self.shut_down(e).await,
        }
        result
    }

    /// Configure the pins last so every earlier request is queued behind setup.
    async fn bring_up(&self) -> Result<()> {
        self.shared.io.setup().await?;
        future::pending().await
    }

    async fn edge_loop(&self) -> Result<()> {
        let interval = Duration::from_millis(self.shared.config.pins.edge_poll_ms);
        Ok(self.shared.io.watch_edges(interval).await?)
    }

    /// Start or stop circulation as main-controller demand changes.
    async fn demand_loop(&self) -> Result<()> {
        loop {
            let wanted = self.circulation_wanted();
            match self.circulation.state() {
                Some(CircState::Off) if wanted => {
                    self.circulation.set_state(CircState::OnNoFlow, ()).await?;
                }
                Some(state) if state != CircState::Off && !wanted => {
                    self.circulation.set_state(CircState::Off, ()).await?;
                }
                _ => {}
            }
            let hold = self.shared.hold_remaining();
            or(self.shared.demand_changed(), async move {
                match hold {
                    Some(left) => {
                        async_io_mini::Timer::after(left).await;
                    }
                    None => future::pending::<()>().await,
                }
            })
            .await;
        }
    }

    fn circulation_wanted(&self) -> bool {
        let (Some(state), Some(payload)) = (self.main.state(), self.main.payload()) else {
            return false;
        };
        if state == MainState::FatalError {
            return false;
        }
        dosing::needs_circulation(state, &payload) || self.shared.hold_remaining().is_some()
    }

    async fn failsafe_loop(&self) -> Result<()> {
        if self.shared.io.get(self.failsafe.pin()).await? {
            self.trip_failsafe().await?;
        }
        loop {
            if self.failsafe.next().await {
                self.trip_failsafe().await?;
            }
        }
    }

    async fn trip_failsafe(&self) -> Result<()> {
        dosing::raise_fatal(&self.main, "Failsafe input asserted").await
    }

    async fn sensor_loop<T: LineTransport>(&self, channel: &mut SensorChannel<T>) -> Result<()> {
        loop {
            let failure = channel
                .run(&self.shared.polling, |reading| self.shared.record_reading(reading))
                .await;
            let message = format!("Sensor channel failed: {failure}");
            if !dosing::raise_resettable(&self.main, message.as_str(), false).await? {
                self.shared.log(EventLevel::Warning, message);
            }
        }
    }

    async fn notify_loop(&self) -> Result<()> {
        loop {
            let event = self.shared.next_notification().await;
            self.deliver(&event);
        }
    }

    fn deliver(&self, event: &LogEvent) {
        let status = self.status();
        let result = self.notifier.borrow_mut().notify(event, &status);
        if let Err(e) = result {
            self.shared.log(EventLevel::Warning, format!("Notification failed: {e}"));
        }
    }

    /// Last-resort cleanup after a task failure.
    async fn shut_down(&self, cause: &Error) {
        let message = format!("Controller failure: {cause}");
        if self.main.state() == Some(MainState::FatalError) {
            self.shared.log(EventLevel::Fatal, message);
        } else if let Err(e) = dosing::raise_fatal(&self.main, message).await {
            error!("could not enter FATAL_ERROR: {}", e);
        }
        self.shared.polling.enable(false);
        let pins = &self.shared.config.pins;
        let _ = pump::all_off(&self.shared.io, pins).await;
        if let Err(e) = self.shared.io.set(pins.circulation_pump, false).await {
            error!("failed to stop circulation pump: {}", e);
        }
        for event in self.shared.drain_notifications() {
            self.deliver(&event);
        }
    }

    // ── Operator actions ──────────────────────────────────────

    /// Leave RESETTABLE_ERROR for MEASURE_DELAY.
    pub async fn reset(&self) -> Result<()> {
        let state = self.main.state();
        if state != Some(MainState::ResettableError) {
            return Err(ActionError::NotResettable(self.main.state_name()).into());
        }
        self.main.set_state(MainState::MeasureDelay, MainPayload::None).await
    }

    pub async fn pause(&self, reason: impl Into<String>) -> Result<()> {
        self.ensure_no_error()?;
        self.main
            .set_state(MainState::Paused, MainPayload::Hold { reason: reason.into() })
            .await
    }

    pub async fn resume(&self) -> Result<()> {
        self.ensure_no_error()?;
        self.main.set_state(MainState::MeasureDelay, MainPayload::None).await
    }

    /// Run one pump for `seconds` (rounded to tenths), then mix as usual.
    pub async fn dispense(&self, pump: PumpKind, seconds: f64) -> Result<()> {
        self.ensure_no_error()?;
        let max = self.shared.config.dosing.manual_max_secs;
        let rounded = round_tenths(seconds);
        if !(rounded > 0.0 && rounded <= max) {
            return Err(ActionError::InvalidDuration(format!("{seconds} s (allowed 0 to {max} s)")).into());
        }
        if self.main.state() == Some(MainState::Dispense) {
            return Err(ActionError::Busy(MainState::Dispense.name()).into());
        }
        let policy = match pump {
            PumpKind::Acid => &self.shared.config.dosing.acid,
            PumpKind::Bleach => &self.shared.config.dosing.bleach,
            PumpKind::Base => &self.shared.config.dosing.base,
        };
        if !policy.enabled {
            return Err(ActionError::PumpDisabled(pump.as_str()).into());
        }
        if !self.circulation.state().is_some_and(CircState::has_flow) {
            return Err(ActionError::NoFlow.into());
        }
        self.shared
            .log(EventLevel::Info, format!("Manual dispense requested: {pump} for {rounded:.1} s"));
        self.main
            .set_state(MainState::Dispense, MainPayload::dispense(pump, rounded))
            .await
    }

    pub async fn handle_command(&self, cmd: AppCommand) -> Result<Option<StatusSnapshot>> {
        match cmd {
            AppCommand::Status => return Ok(Some(self.poll_status())),
            AppCommand::Reset => self.reset().await?,
            AppCommand::Pause { reason } => self.pause(reason).await?,
            AppCommand::Resume => self.resume().await?,
            AppCommand::Dispense { pump, seconds } => self.dispense(pump, seconds).await?,
        }
        Ok(None)
    }

    fn ensure_no_error(&self) -> Result<()> {
        match self.main.state() {
            Some(state) if state.is_error() => Err(ActionError::ErrorState(state.name()).into()),
            _ => Ok(()),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Snapshot without side effects.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::capture(&self.shared, &self.main, &self.circulation)
    }

    /// Snapshot for an operator; keeps circulation running for the
    /// status hold so the next poll sees fresh readings.
    pub fn poll_status(&self) -> StatusSnapshot {
        self.shared.hold_circulation(self.shared.config.timing.status_hold_secs);
        self.status()
    }

    pub fn main_state(&self) -> Option<MainState> {
        self.main.state()
    }

    pub fn circulation_state(&self) -> Option<CircState> {
        self.circulation.state()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.shared.config
    }

    pub fn io(&self) -> &Rc<DigitalIo> {
        &self.shared.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_map_declares_every_pin_once() {
        let pins = PinConfig::default();
        let map = pin_map(&pins);
        let mut numbers: Vec<u32> = map.iter().map(|(p, _)| *p).collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), map.len());
        let flow = map.iter().find(|(p, _)| *p == pins.flow_switch).unwrap().1;
        assert_eq!(flow, PinSpec::input(Edge::Both));
        let failsafe = map.iter().find(|(p, _)| *p == pins.failsafe).unwrap().1;
        assert_eq!(failsafe, PinSpec::input(Edge::Rising));
    }
}
