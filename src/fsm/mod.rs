//! Table-driven async state machine engine.
//!
//! Each controller is one [`Machine`] built from a table of
//! [`StateDescriptor`]s.  A row names the state and carries optional hook
//! function pointers; an absent hook is simply `None`:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                          │
//! │  ┌───────────┬──────────┬──────────┬──────────┬───────────┬────────┐ │
//! │  │ State     │ on_enter │ on_leave │ on_timer │ flow_good │flow_bad│ │
//! │  ├───────────┼──────────┼──────────┼──────────┼───────────┼────────┤ │
//! │  │ DISPENSE  │ fn(..)   │ fn(..)   │ fn(..)   │ fn(..)    │ fn(..) │ │
//! │  │ MIX       │ -        │ -        │ fn(..)   │ fn(..)    │ -      │ │
//! │  └───────────┴──────────┴──────────┴──────────┴───────────┴────────┘ │
//! │  on_state_change: fn(hook, from, to)                                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Hooks are `async` (boxed local futures) and may suspend on I/O or
//! timers.  While one transition is suspended another trigger (a flow
//! edge, a fired timer, a call from the other machine) may start a new
//! one.  Every transition therefore bumps a **generation counter**, and
//! after each suspension point the in-flight transition compares the
//! generation it captured with the current one; on mismatch it stops
//! without further side effects.  Hooks receive a [`Hook`] handle that
//! carries the same captured generation.
//!
//! At most one timer is pending.  It is cleared by every real transition
//! and only fires into the state generation that armed it.
//!
//! The flow input is injected through [`FlowSource`].  Per state instance
//! `on_flow_good` and `on_flow_bad` each fire at most once, whether the
//! trigger is the post-entry read or an asynchronous edge.

pub mod circulation;
pub mod context;
pub mod dosing;

use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::time::Duration;
use std::rc::Rc;
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::{self, BoxedLocal};
use log::{debug, error, info};

use crate::error::{Error, MachineError, Result};

// ---------------------------------------------------------------------------
// Machine definition
// ---------------------------------------------------------------------------

/// Boolean input that gates the flow hooks.
pub trait FlowSource {
    /// Current value.
    fn read(&self) -> impl Future<Output = Result<bool>>;

    /// Resolves with the new value after each change.
    fn changed(&self) -> impl Future<Output = bool>;
}

/// Type-level description of one machine.
pub trait MachineSpec: Sized + 'static {
    type State: Copy + Eq + fmt::Debug + 'static;
    /// Opaque per-state data, set on entry and handed to every hook.
    type Payload: Clone + fmt::Debug + 'static;
    type Context: 'static;
    type Flow: FlowSource + 'static;

    /// Used in logs and error messages.
    const NAME: &'static str;
}

/// Every hook returns one of these.
pub type HookFuture<T = ()> = BoxedLocal<Result<T>>;

type StateOf<M> = <M as MachineSpec>::State;
type PayloadOf<M> = <M as MachineSpec>::Payload;

/// `on_enter(hook, params, previous)`; `Some(p)` replaces the payload.
pub type EnterFn<M> = fn(Hook<M>, PayloadOf<M>, Option<StateOf<M>>) -> HookFuture<Option<PayloadOf<M>>>;
/// `on_leave(hook, payload, next)`.
pub type LeaveFn<M> = fn(Hook<M>, PayloadOf<M>, StateOf<M>) -> HookFuture;
/// `on_timer`, `on_flow_good`, `on_flow_bad`.
pub type PayloadFn<M> = fn(Hook<M>, PayloadOf<M>) -> HookFuture;
/// `on_state_change(hook, from, to)`, shared by every state.
pub type StateChangeFn<M> = fn(Hook<M>, Option<StateOf<M>>, StateOf<M>) -> HookFuture;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor<M: MachineSpec> {
    pub id: M::State,
    pub name: &'static str,
    pub on_enter: Option<EnterFn<M>>,
    pub on_leave: Option<LeaveFn<M>>,
    pub on_timer: Option<PayloadFn<M>>,
    pub on_flow_good: Option<PayloadFn<M>>,
    pub on_flow_bad: Option<PayloadFn<M>>,
}

impl<M: MachineSpec> StateDescriptor<M> {
    pub fn new(id: M::State, name: &'static str) -> Self {
        Self {
            id,
            name,
            on_enter: None,
            on_leave: None,
            on_timer: None,
            on_flow_good: None,
            on_flow_bad: None,
        }
    }

    pub fn on_enter(mut self, f: EnterFn<M>) -> Self {
        self.on_enter = Some(f);
        self
    }

    pub fn on_leave(mut self, f: LeaveFn<M>) -> Self {
        self.on_leave = Some(f);
        self
    }

    pub fn on_timer(mut self, f: PayloadFn<M>) -> Self {
        self.on_timer = Some(f);
        self
    }

    pub fn on_flow_good(mut self, f: PayloadFn<M>) -> Self {
        self.on_flow_good = Some(f);
        self
    }

    pub fn on_flow_bad(mut self, f: PayloadFn<M>) -> Self {
        self.on_flow_bad = Some(f);
        self
    }
}

pub struct StateTable<M: MachineSpec> {
    pub states: Vec<StateDescriptor<M>>,
    pub on_state_change: Option<StateChangeFn<M>>,
}

// ---------------------------------------------------------------------------
// Hook handle
// ---------------------------------------------------------------------------

/// What a hook gets: the machine, its context, and the generation the
/// hook was invoked for.
pub struct Hook<M: MachineSpec> {
    machine: Rc<Machine<M>>,
    generation: u64,
}

impl<M: MachineSpec> Hook<M> {
    pub fn ctx(&self) -> &M::Context {
        &self.machine.ctx
    }

    pub fn machine(&self) -> &Rc<Machine<M>> {
        &self.machine
    }

    /// False once any later transition has started.
    pub fn is_current(&self) -> bool {
        self.machine.generation() == self.generation
    }

    /// Transition, unless this hook has already been superseded.
    pub async fn set_state(&self, state: M::State, payload: M::Payload) -> Result<()> {
        if !self.is_current() {
            debug!("{}: stale hook skipped transition to {:?}", M::NAME, state);
            return Ok(());
        }
        self.machine.set_state(state, payload).await
    }

    /// Arm the state's timer, unless this hook has already been superseded.
    pub fn set_timer(&self, seconds: f64) -> Result<()> {
        if !self.is_current() {
            return Ok(());
        }
        self.machine.set_timer(seconds)
    }

    pub fn exit(&self) {
        self.machine.exit();
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Active<M: MachineSpec> {
    state: M::State,
    payload: M::Payload,
}

// Manual impl: a derive would demand `M: Clone` of the spec marker type.
impl<M: MachineSpec> Clone for Active<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    id: u64,
    deadline: Instant,
    generation: u64,
}

struct Inner<M: MachineSpec> {
    active: Option<Active<M>>,
    generation: u64,
    timer: Option<ArmedTimer>,
    timer_seq: u64,
    flow_good_armed: bool,
    flow_bad_armed: bool,
    started: bool,
    exited: bool,
    failure: Option<Error>,
}

enum Wake {
    Poke,
    Timer(ArmedTimer),
    Flow(bool),
}

/// One running state machine.  Shared as `Rc<Machine<M>>`.
pub struct Machine<M: MachineSpec> {
    table: StateTable<M>,
    ctx: M::Context,
    flow: M::Flow,
    inner: RefCell<Inner<M>>,
    /// Re-evaluates the run loop's wait set; only `run` waits on it.
    wake: Signal<NoopRawMutex, ()>,
}

impl<M: MachineSpec> Machine<M> {
    pub fn new(table: StateTable<M>, ctx: M::Context, flow: M::Flow) -> Rc<Self> {
        Rc::new(Self {
            table,
            ctx,
            flow,
            inner: RefCell::new(Inner {
                active: None,
                generation: 0,
                timer: None,
                timer_seq: 0,
                flow_good_armed: false,
                flow_bad_armed: false,
                started: false,
                exited: false,
                failure: None,
            }),
            wake: Signal::new(),
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> Option<M::State> {
        self.inner.borrow().active.as_ref().map(|a| a.state)
    }

    pub fn payload(&self) -> Option<M::Payload> {
        self.inner.borrow().active.as_ref().map(|a| a.payload.clone())
    }

    /// Table name of the current state, `"NONE"` before `run`.
    pub fn state_name(&self) -> &'static str {
        self.state().map_or("NONE", |s| self.name_of(s))
    }

    pub fn name_of(&self, state: M::State) -> &'static str {
        self.descriptor(state).map_or("UNKNOWN", |d| d.name)
    }

    pub fn context(&self) -> &M::Context {
        &self.ctx
    }

    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    pub fn timer_armed(&self) -> bool {
        self.inner.borrow().timer.is_some()
    }

    fn descriptor(&self, state: M::State) -> Result<&StateDescriptor<M>> {
        self.table
            .states
            .iter()
            .find(|d| d.id == state)
            .ok_or_else(|| {
                MachineError::UnknownState {
                    machine: M::NAME,
                    state: format!("{state:?}"),
                }
                .into()
            })
    }

    fn hook(self: &Rc<Self>, generation: u64) -> Hook<M> {
        Hook {
            machine: Rc::clone(self),
            generation,
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.inner.borrow().generation != generation
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter `initial` and service timers and flow edges until [`exit`]
    /// is called or a hook fails.
    ///
    /// [`exit`]: Self::exit
    pub async fn run(self: &Rc<Self>, initial: M::State, payload: M::Payload) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.started {
                return Err(MachineError::AlreadyStarted(M::NAME).into());
            }
            inner.started = true;
        }
        info!("{} starting in {}", M::NAME, self.descriptor(initial)?.name);
        self.set_state(initial, payload).await?;

        loop {
            {
                let inner = self.inner.borrow();
                if let Some(e) = &inner.failure {
                    return Err(e.clone());
                }
                if inner.exited {
                    info!("{} exited", M::NAME);
                    return Ok(());
                }
            }
            let result = match self.next_wake().await {
                Wake::Poke => Ok(()),
                Wake::Timer(timer) => self.fire_timer(timer).await,
                Wake::Flow(value) => {
                    let generation = self.generation();
                    self.dispatch_flow(value, generation).await
                }
            };
            // Errors are recorded by `guard`; the top of the loop reports them.
            let _ = self.guard(result);
        }
    }

    /// Stop the run loop; in-flight transitions abandon at their next check.
    pub fn exit(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.exited = true;
        inner.generation += 1;
        inner.timer = None;
        drop(inner);
        self.wake.signal(());
    }

    /// Record the first failure so `run` aborts with it.
    fn guard(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            let mut inner = self.inner.borrow_mut();
            if inner.failure.is_none() {
                error!("{}: hook failed: {}", M::NAME, e);
                inner.failure = Some(e.clone());
            }
            drop(inner);
            self.wake.signal(());
        }
        result
    }

    async fn next_wake(&self) -> Wake {
        let timer = self.inner.borrow().timer;
        let poke = async {
            self.wake.wait().await;
            Wake::Poke
        };
        let fire = async move {
            match timer {
                Some(t) => {
                    async_io_mini::Timer::after(t.deadline.saturating_duration_since(Instant::now()))
                        .await;
                    Wake::Timer(t)
                }
                None => future::pending().await,
            }
        };
        let edge = async { Wake::Flow(self.flow.changed().await) };
        future::or(poke, future::or(fire, edge)).await
    }

    // ── Transitions ───────────────────────────────────────────

    /// Transition to `next`.  A no-op when already there.
    ///
    /// Order: clear timer, hold both flow triggers, `on_leave`, switch,
    /// `on_state_change`, `on_enter`, release flow triggers, read flow and
    /// dispatch.  Each step after a suspension first checks the captured
    /// generation and silently returns if a newer transition has begun.
    pub async fn set_state(self: &Rc<Self>, next: M::State, payload: M::Payload) -> Result<()> {
        let result = self.transition(next, payload).await;
        self.guard(result)
    }

    async fn transition(self: &Rc<Self>, next: M::State, payload: M::Payload) -> Result<()> {
        let next_desc = self.descriptor(next)?;
        let (generation, leaving) = {
            let mut inner = self.inner.borrow_mut();
            if !inner.started {
                return Err(MachineError::NotStarted(M::NAME).into());
            }
            if inner.active.as_ref().is_some_and(|a| a.state == next) {
                return Ok(());
            }
            inner.generation += 1;
            inner.timer = None;
            inner.flow_good_armed = true;
            inner.flow_bad_armed = true;
            (inner.generation, inner.active.clone())
        };
        self.wake.signal(());

        let previous = leaving.as_ref().map(|a| a.state);
        if let Some(active) = leaving {
            if let Some(on_leave) = self.descriptor(active.state)?.on_leave {
                on_leave(self.hook(generation), active.payload, next).await?;
                if self.is_stale(generation) {
                    return Ok(());
                }
            }
        }

        debug!(
            "{} transition: {} -> {}",
            M::NAME,
            previous.map_or("START", |p| self.name_of(p)),
            next_desc.name
        );
        self.inner.borrow_mut().active = Some(Active {
            state: next,
            payload: payload.clone(),
        });

        if let Some(on_change) = self.table.on_state_change {
            on_change(self.hook(generation), previous, next).await?;
            if self.is_stale(generation) {
                return Ok(());
            }
        }

        if let Some(on_enter) = next_desc.on_enter {
            let replacement = on_enter(self.hook(generation), payload, previous).await?;
            if self.is_stale(generation) {
                return Ok(());
            }
            if let Some(p) = replacement {
                if let Some(active) = self.inner.borrow_mut().active.as_mut() {
                    active.payload = p;
                }
            }
        }

        {
            let mut inner = self.inner.borrow_mut();
            inner.flow_good_armed = false;
            inner.flow_bad_armed = false;
        }
        let flowing = self.flow.read().await?;
        if self.is_stale(generation) {
            return Ok(());
        }
        self.dispatch_flow(flowing, generation).await
    }

    /// Invoke the matching flow hook once per state instance.
    async fn dispatch_flow(self: &Rc<Self>, value: bool, generation: u64) -> Result<()> {
        let (hook_fn, payload) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.generation != generation {
                return Ok(());
            }
            let Some(active) = inner.active.as_ref() else {
                return Ok(());
            };
            let desc = self.descriptor(active.state)?;
            let (armed, hook_fn) = if value {
                (&mut inner.flow_good_armed, desc.on_flow_good)
            } else {
                (&mut inner.flow_bad_armed, desc.on_flow_bad)
            };
            let Some(hook_fn) = hook_fn else {
                return Ok(());
            };
            if *armed {
                return Ok(());
            }
            *armed = true;
            (hook_fn, active.payload.clone())
        };
        debug!("{}: flow {} in {}", M::NAME, if value { "good" } else { "bad" }, self.state_name());
        hook_fn(self.hook(generation), payload).await
    }

    // ── Timer ─────────────────────────────────────────────────

    /// Replace the pending timer with one firing `on_timer` after `seconds`.
    pub fn set_timer(&self, seconds: f64) -> Result<()> {
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| MachineError::InvalidDuration(seconds.to_string()))?;
        let mut inner = self.inner.borrow_mut();
        let Some(active) = inner.active.as_ref() else {
            return Err(MachineError::NotStarted(M::NAME).into());
        };
        let desc = self.descriptor(active.state)?;
        if desc.on_timer.is_none() {
            return Err(MachineError::NoTimerHook {
                machine: M::NAME,
                state: desc.name,
            }
            .into());
        }
        debug!("{}: timer {:.1}s in {}", M::NAME, seconds, desc.name);
        inner.timer_seq += 1;
        inner.timer = Some(ArmedTimer {
            id: inner.timer_seq,
            deadline: Instant::now() + duration,
            generation: inner.generation,
        });
        drop(inner);
        self.wake.signal(());
        Ok(())
    }

    async fn fire_timer(self: &Rc<Self>, fired: ArmedTimer) -> Result<()> {
        let (on_timer, payload) = {
            let mut inner = self.inner.borrow_mut();
            let still_armed = inner.timer.is_some_and(|t| t.id == fired.id);
            if !still_armed || inner.generation != fired.generation {
                return Ok(());
            }
            inner.timer = None;
            let Some(active) = inner.active.as_ref() else {
                return Ok(());
            };
            let Some(on_timer) = self.descriptor(active.state)?.on_timer else {
                return Ok(());
            };
            (on_timer, active.payload.clone())
        };
        on_timer(self.hook(fired.generation), payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use futures_lite::future::{block_on, yield_now};

    // ── Test doubles ──────────────────────────────────────────

    #[derive(Default)]
    struct TestFlow {
        value: Cell<bool>,
        edges: Signal<NoopRawMutex, bool>,
    }

    impl TestFlow {
        fn edge(&self, value: bool) {
            self.value.set(value);
            self.edges.signal(value);
        }
    }

    impl FlowSource for Rc<TestFlow> {
        fn read(&self) -> impl Future<Output = Result<bool>> {
            async move {
                // Give the run loop a chance to deliver queued edges.
                yield_now().await;
                Ok(self.value.get())
            }
        }

        fn changed(&self) -> impl Future<Output = bool> {
            self.edges.wait()
        }
    }

    #[derive(Default)]
    struct Recorder {
        log: RefCell<Vec<String>>,
        nest_into_c: Cell<bool>,
        fail_c: Cell<bool>,
    }

    impl Recorder {
        fn push(&self, s: impl Into<String>) {
            self.log.borrow_mut().push(s.into());
        }

        fn take(&self) -> Vec<String> {
            core::mem::take(&mut *self.log.borrow_mut())
        }

        fn count(&self, s: &str) -> usize {
            self.log.borrow().iter().filter(|l| *l == s).count()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum S {
        A,
        B,
        C,
    }

    struct Test;

    impl MachineSpec for Test {
        type State = S;
        type Payload = u32;
        type Context = Recorder;
        type Flow = Rc<TestFlow>;
        const NAME: &'static str = "test";
    }

    fn enter_b(hook: Hook<Test>, p: u32, _: Option<S>) -> HookFuture<Option<u32>> {
        Box::pin(async move {
            hook.ctx().push(format!("enter B {p}"));
            if hook.ctx().nest_into_c.get() {
                hook.set_state(S::C, 0).await?;
            }
            Ok(None)
        })
    }

    fn leave_b(hook: Hook<Test>, _: u32, _: S) -> HookFuture {
        Box::pin(async move {
            hook.ctx().push("leave B");
            Ok(())
        })
    }

    fn timer_b(hook: Hook<Test>, _: u32) -> HookFuture {
        Box::pin(async move {
            hook.ctx().push("timer B");
            hook.set_state(S::A, 0).await
        })
    }

    fn flow_good_b(hook: Hook<Test>, _: u32) -> HookFuture {
        Box::pin(async move {
            hook.ctx().push("flow good B");
            Ok(())
        })
    }

    fn enter_c(hook: Hook<Test>, _: u32, _: Option<S>) -> HookFuture<Option<u32>> {
        Box::pin(async move {
            hook.ctx().push("enter C");
            if hook.ctx().fail_c.get() {
                return Err(Error::Config("boom".into()));
            }
            Ok(Some(99))
        })
    }

    fn flow_good_c(hook: Hook<Test>, _: u32) -> HookFuture {
        Box::pin(async move {
            hook.ctx().push("flow good C");
            Ok(())
        })
    }

    fn change(hook: Hook<Test>, _: Option<S>, to: S) -> HookFuture {
        Box::pin(async move {
            hook.ctx().push(format!("change {to:?}"));
            Ok(())
        })
    }

    fn make() -> (Rc<Machine<Test>>, Rc<TestFlow>) {
        let flow = Rc::new(TestFlow::default());
        let table = StateTable {
            states: vec![
                StateDescriptor::new(S::A, "A"),
                StateDescriptor::new(S::B, "B")
                    .on_enter(enter_b)
                    .on_leave(leave_b)
                    .on_timer(timer_b)
                    .on_flow_good(flow_good_b),
                StateDescriptor::new(S::C, "C").on_enter(enter_c).on_flow_good(flow_good_c),
            ],
            on_state_change: Some(change),
        };
        (Machine::new(table, Recorder::default(), Rc::clone(&flow)), flow)
    }

    /// Drive `run` alongside a test body; returns the body's value.
    fn with_running<T>(machine: &Rc<Machine<Test>>, body: impl Future<Output = T>) -> T {
        let outcome = block_on(future::or(
            async { Err::<T, _>(machine.run(S::A, 0).await) },
            async { Ok(body.await) },
        ));
        match outcome {
            Ok(value) => value,
            Err(result) => panic!("run ended early: {result:?}"),
        }
    }

    async fn sleep_ms(ms: u64) {
        async_io_mini::Timer::after(Duration::from_millis(ms)).await;
    }

    // ── Properties ────────────────────────────────────────────

    #[test]
    fn set_state_before_run_fails() {
        let (m, _) = make();
        let err = block_on(m.set_state(S::B, 1)).unwrap_err();
        assert_eq!(err, Error::Machine(MachineError::NotStarted("test")));
    }

    #[test]
    fn active_state_clones_without_a_clone_spec() {
        let active: Active<Test> = Active { state: S::B, payload: 7 };
        let copy = active.clone();
        assert_eq!((copy.state, copy.payload), (S::B, 7));
    }

    #[test]
    fn noop_transition_runs_no_hooks_and_keeps_timer() {
        let (m, _) = make();
        with_running(&m, async {
            m.set_state(S::B, 1).await.unwrap();
            m.set_timer(30.0).unwrap();
            m.context().take();

            m.set_state(S::B, 2).await.unwrap();
            assert!(m.context().take().is_empty());
            assert!(m.timer_armed());
            assert_eq!(m.payload(), Some(1));
        });
    }

    #[test]
    fn hooks_run_in_order() {
        let (m, _) = make();
        with_running(&m, async {
            m.set_state(S::B, 7).await.unwrap();
            m.set_state(S::C, 0).await.unwrap();
            assert_eq!(
                m.context().take(),
                vec!["change A", "change B", "enter B 7", "leave B", "change C", "enter C"]
            );
            // on_enter replaced the payload
            assert_eq!(m.payload(), Some(99));
        });
    }

    #[test]
    fn nested_transition_abandons_outer_steps() {
        let (m, flow) = make();
        flow.edge(true);
        m.context().nest_into_c.set(true);
        with_running(&m, async {
            m.set_state(S::B, 1).await.unwrap();
            sleep_ms(10).await;
            assert_eq!(m.state(), Some(S::C));
            assert_eq!(m.context().count("flow good C"), 1);
            // B was superseded from inside its own on_enter.
            assert_eq!(m.context().count("flow good B"), 0);
        });
    }

    #[test]
    fn flow_edge_racing_entry_check_fires_once() {
        let (m, flow) = make();
        with_running(&m, async {
            flow.edge(true);
            m.set_state(S::B, 1).await.unwrap();
            flow.edge(true);
            sleep_ms(10).await;
            assert_eq!(m.context().count("flow good B"), 1);
        });
    }

    #[test]
    fn flow_edge_after_entry_fires_hook() {
        let (m, flow) = make();
        with_running(&m, async {
            m.set_state(S::B, 1).await.unwrap();
            assert_eq!(m.context().count("flow good B"), 0);
            flow.edge(true);
            sleep_ms(10).await;
            assert_eq!(m.context().count("flow good B"), 1);
        });
    }

    #[test]
    fn timer_fires_into_arming_state() {
        let (m, _) = make();
        with_running(&m, async {
            m.set_state(S::B, 1).await.unwrap();
            m.set_timer(0.01).unwrap();
            sleep_ms(60).await;
            assert_eq!(m.context().count("timer B"), 1);
            assert_eq!(m.state(), Some(S::A));
            assert!(!m.timer_armed());
        });
    }

    #[test]
    fn transition_cancels_timer() {
        let (m, _) = make();
        with_running(&m, async {
            m.set_state(S::B, 1).await.unwrap();
            m.set_timer(0.01).unwrap();
            m.set_state(S::C, 0).await.unwrap();
            assert!(!m.timer_armed());
            sleep_ms(40).await;
            assert_eq!(m.context().count("timer B"), 0);
        });
    }

    #[test]
    fn set_timer_requires_on_timer() {
        let (m, _) = make();
        with_running(&m, async {
            let err = m.set_timer(1.0).unwrap_err();
            assert!(matches!(err, Error::Machine(MachineError::NoTimerHook { state: "A", .. })));
            m.set_state(S::B, 1).await.unwrap();
            assert!(m.set_timer(-1.0).is_err());
        });
    }

    #[test]
    fn unknown_state_rejected() {
        let flow = Rc::new(TestFlow::default());
        let table = StateTable {
            states: vec![StateDescriptor::new(S::A, "A")],
            on_state_change: None,
        };
        let m: Rc<Machine<Test>> = Machine::new(table, Recorder::default(), flow);
        let result = block_on(future::or(m.run(S::A, 0), async {
            let err = m.set_state(S::B, 0).await.unwrap_err();
            assert!(matches!(err, Error::Machine(MachineError::UnknownState { .. })));
            future::pending().await
        }));
        // Rejecting the transition is itself a failure of the run task.
        assert!(result.is_err());
    }

    #[test]
    fn hook_error_aborts_run() {
        let (m, _) = make();
        m.context().fail_c.set(true);
        let result = block_on(future::or(m.run(S::A, 0), async {
            assert!(m.set_state(S::C, 0).await.is_err());
            future::pending().await
        }));
        assert_eq!(result, Err(Error::Config("boom".into())));
    }

    #[test]
    fn exit_ends_run() {
        let (m, _) = make();
        let result = block_on(future::or(m.run(S::A, 0), async {
            m.set_state(S::B, 1).await.unwrap();
            m.exit();
            future::pending().await
        }));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn run_twice_rejected() {
        let (m, _) = make();
        with_running(&m, async {
            let err = m.run(S::A, 0).await.unwrap_err();
            assert_eq!(err, Error::Machine(MachineError::AlreadyStarted("test")));
        });
    }
}
