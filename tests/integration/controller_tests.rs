//! End-to-end controller scenarios on the simulated board.
//!
//! Every test runs the full task set (both state machines, sensor polling,
//! demand, failsafe and edge watching) and drives it from the outside the
//! way an operator or the plumbing would.

use core::time::Duration;

use crate::mock_hw::{Rig, balanced_water, fast_config, sleep, wait_for};

use hottub::adapters::simulation::WaterModel;
use hottub::app::events::EventLevel;
use hottub::drivers::pump::PumpKind;
use hottub::error::{ActionError, Error, GpioError};
use hottub::fsm::circulation::CircState;
use hottub::fsm::dosing::MainState;

const SETTLE: Duration = Duration::from_secs(5);

fn main_is(rig: &Rig, state: MainState) -> bool {
    rig.controller.main_state() == Some(state)
}

/// Times `pin` was switched on; setup and shutdown only ever write low.
fn runs(rig: &Rig, pin: u32) -> usize {
    rig.pins.writes_to(pin).into_iter().filter(|on| *on).count()
}

async fn flowing(rig: &Rig) {
    assert!(
        wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::OnFlowGood)).await,
        "circulation never saw flow"
    );
}

// ── Normal cycle ──────────────────────────────────────────────

#[test]
fn balanced_water_measures_then_idles() {
    let rig = Rig::new(fast_config(), balanced_water(), true);
    rig.drive(async {
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Idle)).await, "never reached IDLE");
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::Off)).await,
            "circulation should stop once the main controller idles"
        );
        assert!(!rig.pins.level(rig.config.pins.circulation_pump));
        assert!(!rig.sink.readings().is_empty(), "accurate readings are journaled");
        assert!(rig.sink.contains("Main: MEASURE_DELAY -> IDLE"));
    });
}

#[test]
fn high_ph_runs_the_acid_pump_then_mixes() {
    let mut config = fast_config();
    config.dosing.acid.max_seconds = 0.3;
    let acid = config.pins.acid_pump;
    let rig = Rig::new(config, WaterModel::steady(38.0, 7.9, 700.0), true);
    rig.drive(async {
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Dispense)).await, "never dosed");
        assert!(rig.sink.contains("Dispensing acid for 0.3 seconds"));
        assert!(
            wait_for(SETTLE, || runs(&rig, acid) == 1 && !rig.pins.level(acid)).await,
            "acid pump should run once, got {:?}",
            rig.pins.writes_to(acid)
        );
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Mix)).await);
        // Circulation keeps running while the dose mixes in.
        assert!(rig.pins.level(rig.config.pins.circulation_pump));
    });
}

#[test]
fn repeated_doses_without_progress_stop_for_an_operator() {
    let mut config = fast_config();
    config.dosing.acid.max_seconds = 0.1;
    config.dosing.no_progress_limit = 1;
    config.timing.mix_secs = 0.1;
    let rig = Rig::new(config, WaterModel::steady(38.0, 7.9, 700.0), true);
    rig.drive(async {
        assert!(
            wait_for(Duration::from_secs(10), || main_is(&rig, MainState::ResettableError)).await,
            "dosing never gave up"
        );
        assert!(rig.sink.contains("consecutive acid doses without progress"));
        assert!(wait_for(SETTLE, || rig.notifier.contains("check the acid supply")).await);
        assert!(!rig.pins.level(rig.config.pins.acid_pump));
    });
}

// ── Flow supervision ──────────────────────────────────────────

#[test]
fn missing_flow_raises_error_that_clears_itself() {
    let config = fast_config();
    let flow = config.pins.flow_switch;
    let rig = Rig::new(config, balanced_water(), false);
    rig.drive(async {
        assert!(
            wait_for(SETTLE, || main_is(&rig, MainState::ResettableError)).await,
            "flow timeout should raise an error"
        );
        assert!(rig.sink.contains("No flow after"));
        assert!(
            wait_for(SETTLE, || rig.notifier.levels().contains(&EventLevel::Error)).await,
            "errors are notified"
        );
        // The flow error keeps circulation demanded so it can recover.
        assert!(rig.pins.level(rig.config.pins.circulation_pump));

        rig.pins.drive(flow, true);
        assert!(
            wait_for(SETTLE, || !main_is(&rig, MainState::ResettableError)).await,
            "restored flow should clear the error without a reset"
        );
        assert!(rig.sink.contains("Error cleared: No flow"));
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Idle)).await);
    });
}

#[test]
fn flow_lost_mid_dose_stops_the_pump_and_mixes() {
    let mut config = fast_config();
    config.dosing.acid.max_seconds = 30.0;
    config.timing.flow_timeout_secs = 30.0;
    config.timing.mix_secs = 30.0;
    let acid = config.pins.acid_pump;
    let flow = config.pins.flow_switch;
    let rig = Rig::new(config, WaterModel::steady(38.0, 7.9, 700.0), true);
    rig.drive(async {
        assert!(
            wait_for(SETTLE, || rig.pins.level(acid)).await,
            "acid pump never started"
        );
        assert!(main_is(&rig, MainState::Dispense));

        rig.pins.unlink(flow);
        rig.pins.drive(flow, false);
        assert!(
            wait_for(SETTLE, || main_is(&rig, MainState::Mix)).await,
            "losing flow should abandon the dose"
        );
        assert!(!rig.pins.level(acid), "acid pump left running without flow");
        assert_eq!(runs(&rig, acid), 1);
        assert!(rig.sink.contains("Flow lost while dispensing acid"));
        let warned = rig
            .sink
            .events()
            .iter()
            .any(|e| e.level == EventLevel::Warning && e.message.contains("Flow lost"));
        assert!(warned, "flow loss is logged as a warning");
    });
}

#[test]
fn manual_dispense_needs_flow() {
    let mut config = fast_config();
    config.timing.flow_timeout_secs = 30.0;
    let rig = Rig::new(config, balanced_water(), false);
    rig.drive(async {
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::OnNoFlow)).await
        );
        assert_eq!(
            rig.controller.dispense(PumpKind::Acid, 1.0).await,
            Err(Error::Action(ActionError::NoFlow))
        );
        assert_eq!(runs(&rig, rig.config.pins.acid_pump), 0);
    });
}

// ── Operator actions ──────────────────────────────────────────

#[test]
fn status_poll_holds_circulation_for_a_manual_dose() {
    let mut config = fast_config();
    config.timing.mix_secs = 30.0;
    let bleach = config.pins.bleach_pump;
    let rig = Rig::new(config, balanced_water(), true);
    rig.drive(async {
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Idle)).await);
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::Off)).await
        );

        let status = rig.controller.poll_status();
        assert_eq!(status.main_state, "IDLE");
        assert!(status.reading.is_some());
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::OnReadingsAccurate)).await,
            "a status poll should restart circulation"
        );

        assert_eq!(
            rig.controller.dispense(PumpKind::Bleach, 0.0).await,
            Err(Error::Action(ActionError::InvalidDuration(
                "0 s (allowed 0 to 60 s)".into()
            )))
        );
        // Rounds to 0.0 s, so it is refused like zero.
        assert_eq!(
            rig.controller.dispense(PumpKind::Bleach, 0.04).await,
            Err(Error::Action(ActionError::InvalidDuration(
                "0.04 s (allowed 0 to 60 s)".into()
            )))
        );
        assert_eq!(runs(&rig, bleach), 0);
        rig.controller.dispense(PumpKind::Bleach, 0.24).await.unwrap();
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Mix)).await);
        assert_eq!(runs(&rig, bleach), 1);
        assert!(!rig.pins.level(bleach));
        assert!(rig.sink.contains("Dispensing bleach for 0.2 seconds"));
    });
}

#[test]
fn pause_and_resume() {
    let rig = Rig::new(fast_config(), balanced_water(), true);
    rig.drive(async {
        flowing(&rig).await;
        rig.controller.pause("filter change").await.unwrap();
        assert!(main_is(&rig, MainState::Paused));
        assert!(rig.sink.contains("filter change"));
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::Off)).await,
            "paused controller does not circulate"
        );

        rig.controller.resume().await.unwrap();
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Idle)).await);
    });
}

#[test]
fn pause_times_out_back_to_measuring() {
    let mut config = fast_config();
    config.timing.pause_secs = 0.2;
    let rig = Rig::new(config, balanced_water(), true);
    rig.drive(async {
        flowing(&rig).await;
        rig.controller.pause("").await.unwrap();
        assert!(rig.sink.contains("operator request"));
        assert!(wait_for(SETTLE, || !main_is(&rig, MainState::Paused)).await);
    });
}

// ── Faults ────────────────────────────────────────────────────

#[test]
fn over_temperature_cuts_the_heater_and_waits_for_reset() {
    let rig = Rig::new(fast_config(), WaterModel::steady(42.5, 7.4, 700.0), true);
    rig.drive(async {
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::ResettableError)).await);
        assert_eq!(rig.heater.calls(), 1);
        assert!(rig.sink.contains("water too hot"));
        assert_eq!(
            rig.controller.pause("").await,
            Err(Error::Action(ActionError::ErrorState("RESETTABLE_ERROR")))
        );

        // Not a flow fault: nothing clears it without the operator.
        sleep(Duration::from_millis(300)).await;
        assert!(main_is(&rig, MainState::ResettableError));

        rig.bench.set_water(38.0, 7.4, 700.0);
        rig.controller.reset().await.unwrap();
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::Idle)).await);
        assert_eq!(
            rig.controller.reset().await,
            Err(Error::Action(ActionError::NotResettable("IDLE")))
        );
    });
}

#[test]
fn silent_probes_exhaust_retries() {
    let rig = Rig::new(fast_config(), balanced_water(), true);
    rig.bench.set_silent(true);
    rig.drive(async {
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::ResettableError)).await);
        assert!(rig.sink.contains("Sensor channel failed"));
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::Off)).await,
            "a sensor fault does not keep circulation running"
        );
    });
}

#[test]
fn failsafe_is_terminal() {
    let config = fast_config();
    let failsafe = config.pins.failsafe;
    let rig = Rig::new(config, balanced_water(), true);
    rig.drive(async {
        flowing(&rig).await;
        rig.pins.drive(failsafe, true);
        assert!(wait_for(SETTLE, || main_is(&rig, MainState::FatalError)).await);
        assert!(
            wait_for(SETTLE, || rig.controller.circulation_state() == Some(CircState::Off)).await
        );
        for pin in [
            rig.config.pins.circulation_pump,
            rig.config.pins.acid_pump,
            rig.config.pins.bleach_pump,
            rig.config.pins.base_pump,
        ] {
            assert!(!rig.pins.level(pin), "pin {pin} left on");
        }
        assert!(wait_for(SETTLE, || rig.notifier.levels().contains(&EventLevel::Fatal)).await);

        let fatal = Err(Error::Action(ActionError::ErrorState("FATAL_ERROR")));
        assert_eq!(rig.controller.resume().await, fatal);
        assert_eq!(rig.controller.dispense(PumpKind::Acid, 1.0).await, fatal);
        assert_eq!(
            rig.controller.reset().await,
            Err(Error::Action(ActionError::NotResettable("FATAL_ERROR")))
        );
    });
}

#[test]
fn pin_failure_after_start_halts_in_fatal_error() {
    let config = fast_config();
    let failsafe = config.pins.failsafe;
    let rig = Rig::new(config, balanced_water(), true);
    let result = rig.run_to_halt(SETTLE, async {
        flowing(&rig).await;
        rig.pins.break_pin(failsafe);
    });

    assert!(
        matches!(result, Err(Error::Gpio(GpioError::Io { pin, .. })) if pin == failsafe),
        "unexpected outcome {result:?}"
    );
    assert!(main_is(&rig, MainState::FatalError));
    assert!(rig.sink.contains("Controller failure"));
    for pin in [
        rig.config.pins.circulation_pump,
        rig.config.pins.acid_pump,
        rig.config.pins.bleach_pump,
        rig.config.pins.base_pump,
    ] {
        assert!(!rig.pins.level(pin), "pin {pin} left on");
    }
    // Queued notifications are delivered before `run` returns.
    assert!(rig.notifier.levels().contains(&EventLevel::Fatal));
}
