//! Digital I/O set: declared pins, pre-ready queueing, edge detection.
//!
//! ```text
//!  get/set ──▶ ┌──────────────────────────┐ ──▶ PinBackend (sysfs / memory)
//!              │ DigitalIo                │
//!  queue  ◀──  │  configuring → ready     │
//!              │  edge scan → subscribers │ ──▶ EdgeSubscription::next()
//!              └──────────────────────────┘
//! ```
//!
//! Every pin is declared up front with a direction and an edge mode.
//! `get`/`set` issued while [`DigitalIo::setup`] is still exporting pins
//! are queued and replayed in call order once setup completes.  Edge-armed
//! inputs are scanned by [`DigitalIo::watch_edges`]; the first read after
//! arming only seeds the last-known value, so boot never produces an edge.

use core::cell::{Cell, RefCell};
use core::future::Future;
use core::time::Duration;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::yield_now;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::app::ports::PinBackend;
use crate::error::{GpioError, Result};
use crate::fsm::FlowSource;

// ---------------------------------------------------------------------------
// Pin declaration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Value written to the sysfs `direction` attribute.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Value written to the sysfs `edge` attribute.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Both => "both",
        }
    }

    /// Whether a change to `value` counts as an edge for this mode.
    pub const fn accepts(self, value: bool) -> bool {
        match self {
            Self::None => false,
            Self::Rising => value,
            Self::Falling => !value,
            Self::Both => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSpec {
    pub direction: Direction,
    pub edge: Edge,
}

impl PinSpec {
    pub const fn output() -> Self {
        Self {
            direction: Direction::Output,
            edge: Edge::None,
        }
    }

    pub const fn input(edge: Edge) -> Self {
        Self {
            direction: Direction::Input,
            edge,
        }
    }

    const fn edge_armed(self) -> bool {
        matches!(self.direction, Direction::Input) && !matches!(self.edge, Edge::None)
    }
}

// ---------------------------------------------------------------------------
// Queued operations
// ---------------------------------------------------------------------------

type Reply = Rc<Signal<NoopRawMutex, Result<bool, GpioError>>>;

#[derive(Debug, Clone, Copy)]
enum PendingOp {
    Get(u32),
    Set(u32, bool),
}

struct Pending {
    op: PendingOp,
    reply: Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Configuring,
    Ready,
    Failed,
}

type EdgeSignal = Signal<NoopRawMutex, bool>;

// ---------------------------------------------------------------------------
// DigitalIo
// ---------------------------------------------------------------------------

/// Process-wide owner of every declared pin.
pub struct DigitalIo {
    pins: BTreeMap<u32, PinSpec>,
    backend: RefCell<Box<dyn PinBackend>>,
    readiness: Cell<Readiness>,
    queue: RefCell<VecDeque<Pending>>,
    /// Last value seen on each edge-armed input.
    last: RefCell<BTreeMap<u32, bool>>,
    subscribers: RefCell<Vec<(u32, Rc<EdgeSignal>)>>,
}

impl DigitalIo {
    pub fn new(pins: impl IntoIterator<Item = (u32, PinSpec)>, backend: Box<dyn PinBackend>) -> Self {
        Self {
            pins: pins.into_iter().collect(),
            backend: RefCell::new(backend),
            readiness: Cell::new(Readiness::Configuring),
            queue: RefCell::new(VecDeque::new()),
            last: RefCell::new(BTreeMap::new()),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.get() == Readiness::Ready
    }

    pub fn spec(&self, pin: u32) -> Result<PinSpec, GpioError> {
        self.pins.get(&pin).copied().ok_or(GpioError::Undeclared(pin))
    }

    /// Export and configure every declared pin, then replay queued calls.
    ///
    /// Outputs are driven low.  Edge-armed inputs get one read that seeds
    /// the edge detector and is otherwise discarded.
    pub async fn setup(&self) -> Result<(), GpioError> {
        for (&pin, &spec) in &self.pins {
            if let Err(e) = self.configure_one(pin, spec) {
                error!("GPIO setup failed on pin {}: {}", pin, e);
                self.readiness.set(Readiness::Failed);
                self.drain_queue();
                return Err(e);
            }
            yield_now().await;
        }
        self.readiness.set(Readiness::Ready);
        let queued = self.queue.borrow().len();
        self.drain_queue();
        info!("GPIO ready: {} pins, {} queued ops replayed", self.pins.len(), queued);
        Ok(())
    }

    fn configure_one(&self, pin: u32, spec: PinSpec) -> Result<(), GpioError> {
        let mut backend = self.backend.borrow_mut();
        backend.configure(pin, spec.direction, spec.edge)?;
        if spec.direction == Direction::Output {
            backend.write(pin, false)?;
        } else if spec.edge_armed() {
            let seed = backend.read(pin)?;
            self.last.borrow_mut().insert(pin, seed);
        }
        Ok(())
    }

    fn drain_queue(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(pending) = next else { break };
            let result = match self.readiness.get() {
                Readiness::Ready => match pending.op {
                    PendingOp::Get(pin) => self.read_now(pin),
                    PendingOp::Set(pin, value) => self.write_now(pin, value).map(|()| value),
                },
                _ => Err(GpioError::SetupFailed),
            };
            pending.reply.signal(result);
        }
    }

    pub async fn get(&self, pin: u32) -> Result<bool, GpioError> {
        self.spec(pin)?;
        match self.readiness.get() {
            Readiness::Ready => self.read_now(pin),
            Readiness::Failed => Err(GpioError::SetupFailed),
            Readiness::Configuring => self.enqueue(PendingOp::Get(pin)).await,
        }
    }

    pub async fn set(&self, pin: u32, value: bool) -> Result<(), GpioError> {
        if self.spec(pin)?.direction != Direction::Output {
            return Err(GpioError::NotOutput(pin));
        }
        match self.readiness.get() {
            Readiness::Ready => self.write_now(pin, value),
            Readiness::Failed => Err(GpioError::SetupFailed),
            Readiness::Configuring => self.enqueue(PendingOp::Set(pin, value)).await.map(|_| ()),
        }
    }

    async fn enqueue(&self, op: PendingOp) -> Result<bool, GpioError> {
        debug!("GPIO not ready, queueing {:?}", op);
        let reply: Reply = Rc::new(Signal::new());
        self.queue.borrow_mut().push_back(Pending {
            op,
            reply: Rc::clone(&reply),
        });
        reply.wait().await
    }

    fn read_now(&self, pin: u32) -> Result<bool, GpioError> {
        self.backend.borrow_mut().read(pin)
    }

    fn write_now(&self, pin: u32, value: bool) -> Result<(), GpioError> {
        self.backend.borrow_mut().write(pin, value)
    }

    // ── Edges ─────────────────────────────────────────────────

    /// Register a listener for edges on an edge-armed input.
    pub fn subscribe(&self, pin: u32) -> Result<EdgeSubscription, GpioError> {
        if !self.spec(pin)?.edge_armed() {
            return Err(GpioError::NotEdgeArmed(pin));
        }
        let signal = Rc::new(EdgeSignal::new());
        self.subscribers.borrow_mut().push((pin, Rc::clone(&signal)));
        Ok(EdgeSubscription { pin, signal })
    }

    /// Re-read every edge-armed input once and emit `(pin, value)` for
    /// each change its edge mode accepts.  Returns the number emitted.
    pub fn poll_edges(&self) -> Result<usize, GpioError> {
        if !self.is_ready() {
            return Ok(0);
        }
        let mut emitted = 0;
        for (&pin, spec) in self.pins.iter().filter(|(_, s)| s.edge_armed()) {
            let value = self.read_now(pin)?;
            let previous = self.last.borrow_mut().insert(pin, value);
            if previous == Some(value) || !spec.edge.accepts(value) {
                continue;
            }
            debug!("edge: pin {} -> {}", pin, value);
            for (_, signal) in self.subscribers.borrow().iter().filter(|(p, _)| *p == pin) {
                signal.signal(value);
            }
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Scan for edges forever at `interval`; returns only on a read failure.
    pub async fn watch_edges(&self, interval: Duration) -> Result<(), GpioError> {
        loop {
            self.poll_edges()?;
            async_io_mini::Timer::after(interval).await;
        }
    }
}

/// Per-listener edge stream.  Bursts coalesce to the latest value.
pub struct EdgeSubscription {
    pin: u32,
    signal: Rc<EdgeSignal>,
}

impl EdgeSubscription {
    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub async fn next(&self) -> bool {
        self.signal.wait().await
    }
}

// ---------------------------------------------------------------------------
// Flow input
// ---------------------------------------------------------------------------

/// The flow switch as seen by one state machine: live reads plus its own
/// edge subscription.
pub struct FlowInput {
    io: Rc<DigitalIo>,
    edges: EdgeSubscription,
}

impl FlowInput {
    pub fn new(io: &Rc<DigitalIo>, pin: u32) -> Result<Self, GpioError> {
        let edges = io.subscribe(pin)?;
        Ok(Self {
            io: Rc::clone(io),
            edges,
        })
    }
}

impl FlowSource for FlowInput {
    fn read(&self) -> impl Future<Output = Result<bool>> {
        async move { Ok(self.io.get(self.edges.pin()).await?) }
    }

    fn changed(&self) -> impl Future<Output = bool> {
        self.edges.next()
    }
}
