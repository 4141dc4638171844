//! Main dosing controller.
//!
//! ```text
//!            ┌──────────────── pause timer ─────────────────┐
//!   PAUSED ──┘                                              ▼
//!                  ┌────────────── MEASURE_DELAY ◀──────────────────┐
//!                  │ dose            │ in range      │ bounds /     │
//!                  ▼                 ▼               │ no progress  │
//!               DISPENSE ──▶ MIX    IDLE             ▼              │
//!                  │ timer /   │ timer  │ timer   RESETTABLE_ERROR  │
//!                  │ flow lost └────────┴─────────────── reset ─────┘
//!                  └──▶ MIX                      FATAL_ERROR (terminal)
//! ```
//!
//! MEASURE_DELAY, DISPENSE and MIX only make progress with flow; their
//! timers are armed from `on_flow_good`.  A dosing pump is never left on
//! past DISPENSE: `on_leave` switches it off on every exit path.

use std::rc::Rc;

use serde::Serialize;

use super::context::{Shared, secs};
use super::{Hook, HookFuture, Machine, MachineSpec, StateDescriptor, StateTable};
use crate::app::events::EventLevel;
use crate::control::dosing::{self, Decision};
use crate::drivers::gpio::FlowInput;
use crate::drivers::pump::{self, PumpKind};
use crate::error::Result;
use crate::safety;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MainState {
    Paused,
    MeasureDelay,
    Dispense,
    Mix,
    Idle,
    ResettableError,
    FatalError,
}

impl MainState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Paused => "PAUSED",
            Self::MeasureDelay => "MEASURE_DELAY",
            Self::Dispense => "DISPENSE",
            Self::Mix => "MIX",
            Self::Idle => "IDLE",
            Self::ResettableError => "RESETTABLE_ERROR",
            Self::FatalError => "FATAL_ERROR",
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::ResettableError | Self::FatalError)
    }
}

/// Per-state data carried by the main controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MainPayload {
    None,
    /// Why the controller was paused.
    Hold { reason: String },
    Dispense {
        pump: PumpKind,
        seconds: f64,
        /// Resolved by DISPENSE `on_enter`.
        #[serde(skip)]
        pin: Option<u32>,
    },
    Idle { seconds: f64 },
    Fault { message: String, flow_related: bool },
}

impl MainPayload {
    pub fn dispense(pump: PumpKind, seconds: f64) -> Self {
        Self::Dispense {
            pump,
            seconds,
            pin: None,
        }
    }

    pub fn fault(message: impl Into<String>, flow_related: bool) -> Self {
        Self::Fault {
            message: message.into(),
            flow_related,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Fault { message, .. } => message,
            Self::Hold { reason } => reason,
            _ => "",
        }
    }
}

pub struct Dosing;

impl MachineSpec for Dosing {
    type State = MainState;
    type Payload = MainPayload;
    type Context = Rc<Shared>;
    type Flow = FlowInput;
    const NAME: &'static str = "main";
}

pub type MainMachine = Machine<Dosing>;

/// Whether the main controller needs the circulation pump running.
pub fn needs_circulation(state: MainState, payload: &MainPayload) -> bool {
    match state {
        MainState::MeasureDelay | MainState::Dispense | MainState::Mix => true,
        MainState::ResettableError => matches!(payload, MainPayload::Fault { flow_related: true, .. }),
        _ => false,
    }
}

/// In RESETTABLE_ERROR because circulation never produced flow.
pub fn in_flow_error(main: &MainMachine) -> bool {
    main.state() == Some(MainState::ResettableError)
        && matches!(main.payload(), Some(MainPayload::Fault { flow_related: true, .. }))
}

/// Enter RESETTABLE_ERROR unless already in an error state.
///
/// Returns whether the transition was made.
pub async fn raise_resettable(main: &Rc<MainMachine>, message: impl Into<String>, flow_related: bool) -> Result<bool> {
    if main.state().is_some_and(MainState::is_error) {
        return Ok(false);
    }
    main.set_state(MainState::ResettableError, MainPayload::fault(message, flow_related))
        .await?;
    Ok(true)
}

/// Enter FATAL_ERROR; a no-op when already there.
pub async fn raise_fatal(main: &Rc<MainMachine>, message: impl Into<String>) -> Result<()> {
    if main.state() == Some(MainState::FatalError) {
        return Ok(());
    }
    main.set_state(MainState::FatalError, MainPayload::fault(message, false))
        .await
}

pub fn build_state_table() -> StateTable<Dosing> {
    StateTable {
        states: vec![
            StateDescriptor::new(MainState::Paused, MainState::Paused.name())
                .on_enter(paused_enter)
                .on_timer(to_measure),
            StateDescriptor::new(MainState::MeasureDelay, MainState::MeasureDelay.name())
                .on_flow_good(measure_flow_good)
                .on_timer(measure_timer),
            StateDescriptor::new(MainState::Dispense, MainState::Dispense.name())
                .on_enter(dispense_enter)
                .on_leave(dispense_leave)
                .on_flow_good(dispense_flow_good)
                .on_flow_bad(dispense_flow_bad)
                .on_timer(to_mix),
            StateDescriptor::new(MainState::Mix, MainState::Mix.name())
                .on_flow_good(mix_flow_good)
                .on_timer(to_measure),
            StateDescriptor::new(MainState::Idle, MainState::Idle.name())
                .on_enter(idle_enter)
                .on_timer(to_measure),
            StateDescriptor::new(MainState::ResettableError, MainState::ResettableError.name())
                .on_enter(error_enter)
                .on_leave(error_leave),
            StateDescriptor::new(MainState::FatalError, MainState::FatalError.name()).on_enter(fatal_enter),
        ],
        on_state_change: Some(state_change),
    }
}

pub fn new_machine(shared: Rc<Shared>, flow: FlowInput) -> Rc<MainMachine> {
    Machine::new(build_state_table(), shared, flow)
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

fn state_change(hook: Hook<Dosing>, from: Option<MainState>, to: MainState) -> HookFuture {
    Box::pin(async move {
        let shared = hook.ctx();
        shared.log(
            EventLevel::Info,
            format!("Main: {} -> {}", from.map_or("START", MainState::name), to.name()),
        );
        shared.request_demand_check();
        Ok(())
    })
}

fn to_measure(hook: Hook<Dosing>, _: MainPayload) -> HookFuture {
    Box::pin(async move { hook.set_state(MainState::MeasureDelay, MainPayload::None).await })
}

fn to_mix(hook: Hook<Dosing>, _: MainPayload) -> HookFuture {
    Box::pin(async move { hook.set_state(MainState::Mix, MainPayload::None).await })
}

fn paused_enter(hook: Hook<Dosing>, payload: MainPayload, _: Option<MainState>) -> HookFuture<Option<MainPayload>> {
    Box::pin(async move {
        let shared = hook.ctx();
        let reason = payload.message();
        let seconds = shared.config.timing.pause_secs;
        shared.log(
            EventLevel::Info,
            format!("Paused for {seconds:.0} s: {}", if reason.is_empty() { "operator request" } else { reason }),
        );
        hook.set_timer(seconds)?;
        Ok(None)
    })
}

// ── MEASURE_DELAY ─────────────────────────────────────────────

fn measure_flow_good(hook: Hook<Dosing>, _: MainPayload) -> HookFuture {
    Box::pin(async move { hook.set_timer(hook.ctx().config.timing.measure_settle_secs) })
}

fn measure_timer(hook: Hook<Dosing>, _: MainPayload) -> HookFuture {
    Box::pin(async move {
        let shared = Rc::clone(hook.ctx());
        let timing = &shared.config.timing;
        let reading = shared
            .next_accurate_reading(secs(timing.measure_reading_timeout_secs))
            .await;
        if !hook.is_current() {
            return Ok(());
        }
        let Some(reading) = reading else {
            shared.log(EventLevel::Warning, "No accurate reading yet, measuring again");
            return hook.set_timer(timing.measure_settle_secs);
        };

        if let Some(fault) = safety::check_reading(&shared.config.bounds, &reading) {
            shared.doses.borrow_mut().clear();
            if fault.is_over_temperature() {
                shared.heater_off();
            }
            return hook
                .set_state(MainState::ResettableError, MainPayload::fault(fault.to_string(), false))
                .await;
        }

        let decision = dosing::decide(&shared.config.dosing, &mut shared.doses.borrow_mut(), &reading);
        match decision {
            Decision::Dose(dose) => {
                hook.set_state(MainState::Dispense, MainPayload::dispense(dose.pump, dose.seconds))
                    .await
            }
            Decision::Idle => {
                hook.set_state(
                    MainState::Idle,
                    MainPayload::Idle {
                        seconds: timing.idle_secs,
                    },
                )
                .await
            }
            Decision::NoProgress { pump, repeats } => {
                let message = format!(
                    "{} consecutive {pump} doses without progress, check the {pump} supply",
                    repeats + 1
                );
                hook.set_state(MainState::ResettableError, MainPayload::fault(message, false))
                    .await
            }
        }
    })
}

// ── DISPENSE ──────────────────────────────────────────────────

fn dispense_enter(
    hook: Hook<Dosing>,
    payload: MainPayload,
    _: Option<MainState>,
) -> HookFuture<Option<MainPayload>> {
    Box::pin(async move {
        let MainPayload::Dispense { pump, seconds, .. } = payload else {
            return Ok(None);
        };
        let shared = hook.ctx();
        shared.log(EventLevel::Dispense, format!("Dispensing {pump} for {seconds:.1} seconds"));
        Ok(Some(MainPayload::Dispense {
            pump,
            seconds,
            pin: Some(pump.pin(&shared.config.pins)),
        }))
    })
}

fn dispense_flow_good(hook: Hook<Dosing>, payload: MainPayload) -> HookFuture {
    Box::pin(async move {
        let MainPayload::Dispense {
            seconds,
            pin: Some(pin),
            ..
        } = payload
        else {
            return hook.set_state(MainState::Mix, MainPayload::None).await;
        };
        hook.ctx().io.set(pin, true).await?;
        hook.set_timer(seconds)
    })
}

fn dispense_flow_bad(hook: Hook<Dosing>, payload: MainPayload) -> HookFuture {
    Box::pin(async move {
        if let MainPayload::Dispense { pump, .. } = payload {
            hook.ctx()
                .log(EventLevel::Warning, format!("Flow lost while dispensing {pump}, mixing instead"));
        }
        hook.set_state(MainState::Mix, MainPayload::None).await
    })
}

fn dispense_leave(hook: Hook<Dosing>, payload: MainPayload, _: MainState) -> HookFuture {
    Box::pin(async move {
        if let MainPayload::Dispense { pin: Some(pin), .. } = payload {
            hook.ctx().io.set(pin, false).await?;
        }
        Ok(())
    })
}

// ── MIX / IDLE ────────────────────────────────────────────────

fn mix_flow_good(hook: Hook<Dosing>, _: MainPayload) -> HookFuture {
    Box::pin(async move { hook.set_timer(hook.ctx().config.timing.mix_secs) })
}

fn idle_enter(hook: Hook<Dosing>, payload: MainPayload, _: Option<MainState>) -> HookFuture<Option<MainPayload>> {
    Box::pin(async move {
        let seconds = match payload {
            MainPayload::Idle { seconds } => seconds,
            _ => hook.ctx().config.timing.idle_secs,
        };
        hook.set_timer(seconds)?;
        Ok(None)
    })
}

// ── Errors ────────────────────────────────────────────────────

fn error_enter(hook: Hook<Dosing>, payload: MainPayload, _: Option<MainState>) -> HookFuture<Option<MainPayload>> {
    Box::pin(async move {
        hook.ctx().log(EventLevel::Error, payload.message());
        Ok(None)
    })
}

fn error_leave(hook: Hook<Dosing>, payload: MainPayload, _: MainState) -> HookFuture {
    Box::pin(async move {
        hook.ctx()
            .log(EventLevel::Reset, format!("Error cleared: {}", payload.message()));
        Ok(())
    })
}

fn fatal_enter(hook: Hook<Dosing>, payload: MainPayload, _: Option<MainState>) -> HookFuture<Option<MainPayload>> {
    Box::pin(async move {
        let shared = hook.ctx();
        shared.log(EventLevel::Fatal, payload.message());
        // Already terminal: a pump that will not switch off is only logged.
        let _ = pump::all_off(&shared.io, &shared.config.pins).await;
        Ok(None)
    })
}
