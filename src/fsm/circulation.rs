//! Circulation supervisor.
//!
//! Runs the circulation pump on demand and decides when probe readings
//! can be trusted:
//!
//! ```text
//!   OFF ──demand──▶ ON_NO_FLOW ──flow good──▶ ON_FLOW_GOOD ──settle──▶ ON_READINGS_ACCURATE
//!    ▲                 ▲   │ flow timeout           │ flow bad                │ flow bad
//!    │                 │   ▼                        │                         │
//!    │                 │  main: RESETTABLE_ERROR    │                         │
//!    │                 └────────────────────────────┴─────────────────────────┘
//!    └── no demand (from any state)
//! ```
//!
//! Demand itself is decided by the controller service; this machine only
//! reacts to the transitions it is given and to the flow switch.

use std::rc::Rc;

use super::context::Shared;
use super::dosing::{self, MainMachine, MainPayload, MainState};
use super::{Hook, HookFuture, Machine, MachineSpec, StateDescriptor, StateTable};
use crate::app::events::EventLevel;
use crate::drivers::gpio::FlowInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircState {
    Off,
    OnNoFlow,
    OnFlowGood,
    OnReadingsAccurate,
}

impl CircState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::OnNoFlow => "ON_NO_FLOW",
            Self::OnFlowGood => "ON_FLOW_GOOD",
            Self::OnReadingsAccurate => "ON_READINGS_ACCURATE",
        }
    }

    /// Flow switch has confirmed flow in this state.
    pub const fn has_flow(self) -> bool {
        matches!(self, Self::OnFlowGood | Self::OnReadingsAccurate)
    }
}

pub struct CirculationCtx {
    pub shared: Rc<Shared>,
    /// Target for flow-timeout errors and their automatic clearing.
    pub main: Rc<MainMachine>,
}

pub struct Circulation;

impl MachineSpec for Circulation {
    type State = CircState;
    type Payload = ();
    type Context = CirculationCtx;
    type Flow = FlowInput;
    const NAME: &'static str = "circulation";
}

pub type CirculationMachine = Machine<Circulation>;

pub fn build_state_table() -> StateTable<Circulation> {
    StateTable {
        states: vec![
            StateDescriptor::new(CircState::Off, CircState::Off.name()).on_enter(off_enter),
            StateDescriptor::new(CircState::OnNoFlow, CircState::OnNoFlow.name())
                .on_enter(no_flow_enter)
                .on_flow_good(to_flow_good)
                .on_timer(no_flow_timeout),
            StateDescriptor::new(CircState::OnFlowGood, CircState::OnFlowGood.name())
                .on_enter(flow_good_enter)
                .on_flow_bad(to_no_flow)
                .on_timer(settled),
            StateDescriptor::new(CircState::OnReadingsAccurate, CircState::OnReadingsAccurate.name())
                .on_enter(accurate_enter)
                .on_leave(accurate_leave)
                .on_flow_bad(to_no_flow),
        ],
        on_state_change: Some(state_change),
    }
}

pub fn new_machine(shared: Rc<Shared>, main: Rc<MainMachine>, flow: FlowInput) -> Rc<CirculationMachine> {
    Machine::new(build_state_table(), CirculationCtx { shared, main }, flow)
}

fn state_change(hook: Hook<Circulation>, from: Option<CircState>, to: CircState) -> HookFuture {
    Box::pin(async move {
        let shared = &hook.ctx().shared;
        shared.log(
            EventLevel::Info,
            format!("Circulation: {} -> {}", from.map_or("START", CircState::name), to.name()),
        );
        shared.request_demand_check();
        Ok(())
    })
}

fn off_enter(hook: Hook<Circulation>, _: (), _: Option<CircState>) -> HookFuture<Option<()>> {
    Box::pin(async move {
        let shared = &hook.ctx().shared;
        shared.polling.enable(false);
        shared.io.set(shared.config.pins.circulation_pump, false).await?;
        Ok(None)
    })
}

fn no_flow_enter(hook: Hook<Circulation>, _: (), _: Option<CircState>) -> HookFuture<Option<()>> {
    Box::pin(async move {
        let shared = &hook.ctx().shared;
        shared.io.set(shared.config.pins.circulation_pump, true).await?;
        shared.polling.enable(true);
        hook.set_timer(shared.config.timing.flow_timeout_secs)?;
        Ok(None)
    })
}

fn no_flow_timeout(hook: Hook<Circulation>, _: ()) -> HookFuture {
    Box::pin(async move {
        let ctx = hook.ctx();
        let message = format!(
            "No flow after {:.0} s with the circulation pump on",
            ctx.shared.config.timing.flow_timeout_secs
        );
        dosing::raise_resettable(&ctx.main, message, true).await?;
        Ok(())
    })
}

fn to_flow_good(hook: Hook<Circulation>, _: ()) -> HookFuture {
    Box::pin(async move { hook.set_state(CircState::OnFlowGood, ()).await })
}

fn to_no_flow(hook: Hook<Circulation>, _: ()) -> HookFuture {
    Box::pin(async move { hook.set_state(CircState::OnNoFlow, ()).await })
}

fn flow_good_enter(hook: Hook<Circulation>, _: (), _: Option<CircState>) -> HookFuture<Option<()>> {
    Box::pin(async move {
        let shared = &hook.ctx().shared;
        shared.mark_flow_good();
        // Re-arm after the channel gave up while the pump kept running.
        shared.polling.enable(true);
        hook.set_timer(shared.config.timing.flow_settle_secs)?;
        Ok(None)
    })
}

fn settled(hook: Hook<Circulation>, _: ()) -> HookFuture {
    Box::pin(async move { hook.set_state(CircState::OnReadingsAccurate, ()).await })
}

fn accurate_enter(hook: Hook<Circulation>, _: (), _: Option<CircState>) -> HookFuture<Option<()>> {
    Box::pin(async move {
        let ctx = hook.ctx();
        ctx.shared.set_readings_accurate(true);
        if dosing::in_flow_error(&ctx.main) {
            ctx.main
                .set_state(MainState::MeasureDelay, MainPayload::None)
                .await?;
        }
        Ok(None)
    })
}

fn accurate_leave(hook: Hook<Circulation>, _: (), _: CircState) -> HookFuture {
    Box::pin(async move {
        let shared = &hook.ctx().shared;
        shared.set_readings_accurate(false);
        shared.mark_flow_good();
        Ok(())
    })
}
