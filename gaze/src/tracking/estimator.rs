//! Gaze estimator adapter contract, polling shim and simulated estimator.
//!
//! The point-of-regard engine itself is a black box.  The subsystem only
//! needs lifecycle control, labelled training samples and estimates; the
//! estimate stream is push-only (`subscribe`).  Engines that can only be
//! polled are wrapped once in `PollingShim`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::geometry::ScreenPoint;
use crate::error::{GazeError, Result};

// ── Samples ────────────────────────────────────────────────

/// One raw point-of-regard estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    pub x: f32,
    pub y: f32,
    /// Estimator confidence in [0, 1].
    pub confidence: f32,
    /// Milliseconds since UNIX epoch.
    pub timestamp_ms: i64,
}

impl GazeSample {
    pub fn new(x: f32, y: f32, confidence: f32, timestamp_ms: i64) -> Self {
        Self {
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp_ms,
        }
    }

    pub fn point(&self) -> ScreenPoint {
        ScreenPoint::new(self.x, self.y)
    }
}

/// Receiving end of the estimator feed, handed to the adapter on
/// subscription.  Cloneable and `Send`, so an adapter may push from its own
/// capture thread.
#[derive(Debug, Clone)]
pub struct EstimateSink {
    tx: calloop::channel::Sender<GazeSample>,
}

impl EstimateSink {
    pub fn new(tx: calloop::channel::Sender<GazeSample>) -> Self {
        Self { tx }
    }

    /// Forward a sample.  Returns false once the subsystem has gone away.
    pub fn push(&self, sample: GazeSample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

// ── Adapter traits ─────────────────────────────────────────

/// Training and query access, the only part of the estimator calibration
/// is allowed to touch.
pub trait EstimatorProbe {
    /// Label the current eye features with a known screen position.
    fn record_training_sample(&mut self, point: ScreenPoint) -> Result<()>;

    /// Best current estimate, `Ok(None)` when no face is visible.
    fn current_estimate(&mut self) -> Result<Option<GazeSample>>;
}

/// Full adapter contract.  Lifecycle calls are reserved for the session.
pub trait GazeEstimator: EstimatorProbe {
    /// Start the camera and engine.  Fails with `GazeError::AdapterInit`.
    fn begin(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn end(&mut self);

    /// Register the feed every estimate is pushed into.
    fn subscribe(&mut self, sink: EstimateSink);

    /// Period at which `pump` must be called, for adapters that cannot push
    /// on their own.
    fn pump_interval(&self) -> Option<Duration> {
        None
    }

    /// Move pending estimates into the feed.
    fn pump(&mut self) {}
}

/// Lifecycle as tracked by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorState {
    Idle,
    Running,
    Paused,
    Ended,
}

impl EstimatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

// ── Polling shim ───────────────────────────────────────────

/// An engine that can only be polled for estimates.
pub trait PollEstimator: EstimatorProbe {
    fn begin(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn end(&mut self);
}

/// Turns a poll-only engine into a push adapter.
pub struct PollingShim<P> {
    inner: P,
    interval: Duration,
    sink: Option<EstimateSink>,
    active: bool,
    last_timestamp_ms: Option<i64>,
}

impl<P: PollEstimator> PollingShim<P> {
    pub fn new(inner: P, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            sink: None,
            active: false,
            last_timestamp_ms: None,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: PollEstimator> EstimatorProbe for PollingShim<P> {
    fn record_training_sample(&mut self, point: ScreenPoint) -> Result<()> {
        self.inner.record_training_sample(point)
    }

    fn current_estimate(&mut self) -> Result<Option<GazeSample>> {
        self.inner.current_estimate()
    }
}

impl<P: PollEstimator> GazeEstimator for PollingShim<P> {
    fn begin(&mut self) -> Result<()> {
        self.inner.begin()?;
        self.active = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.inner.pause();
        self.active = false;
    }

    fn resume(&mut self) {
        self.inner.resume();
        self.active = true;
    }

    fn end(&mut self) {
        self.inner.end();
        self.active = false;
    }

    fn subscribe(&mut self, sink: EstimateSink) {
        self.sink = Some(sink);
    }

    fn pump_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn pump(&mut self) {
        if !self.active {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        match self.inner.current_estimate() {
            Ok(Some(sample)) if self.last_timestamp_ms != Some(sample.timestamp_ms) => {
                self.last_timestamp_ms = Some(sample.timestamp_ms);
                sink.push(sample);
            }
            Ok(_) => {}
            Err(e) => debug!("Polling shim: estimate failed: {}", e),
        }
    }
}

// ── Simulated estimator ────────────────────────────────────

/// How the simulated engine answers `current_estimate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedMode {
    /// Report the gaze point set through the handle.
    Fixed,
    /// Report the most recent training label, as a freshly trained engine
    /// looking at the calibration target would.
    FollowTraining,
}

impl SimulatedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::FollowTraining => "follow-training",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "follow-training" => Some(Self::FollowTraining),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SimState {
    mode: SimulatedMode,
    state: EstimatorState,
    gaze: Option<ScreenPoint>,
    bias: (f32, f32),
    confidence: f32,
    fail_begin: Option<String>,
    failing_estimates: u32,
    training: Vec<ScreenPoint>,
    sink: Option<EstimateSink>,
    clock_ms: i64,
    lifecycle_calls: Vec<&'static str>,
}

/// Controllable in-process estimator for tests and the simulator.
pub struct SimulatedEstimator {
    shared: Rc<RefCell<SimState>>,
}

/// Test-side handle onto a `SimulatedEstimator` owned by the session.
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Rc<RefCell<SimState>>,
}

impl SimulatedEstimator {
    pub fn new(mode: SimulatedMode) -> (Self, SimulatedHandle) {
        let shared = Rc::new(RefCell::new(SimState {
            mode,
            state: EstimatorState::Idle,
            gaze: None,
            bias: (0.0, 0.0),
            confidence: 0.9,
            fail_begin: None,
            failing_estimates: 0,
            training: Vec::new(),
            sink: None,
            clock_ms: 0,
            lifecycle_calls: Vec::new(),
        }));
        (
            Self {
                shared: Rc::clone(&shared),
            },
            SimulatedHandle { shared },
        )
    }
}

impl EstimatorProbe for SimulatedEstimator {
    fn record_training_sample(&mut self, point: ScreenPoint) -> Result<()> {
        let mut s = self.shared.borrow_mut();
        if s.state != EstimatorState::Running {
            return Err(GazeError::PointScoring {
                index: s.training.len(),
                reason: format!("estimator is {}", s.state.as_str()),
            });
        }
        s.training.push(point);
        Ok(())
    }

    fn current_estimate(&mut self) -> Result<Option<GazeSample>> {
        let mut s = self.shared.borrow_mut();
        if s.failing_estimates > 0 {
            s.failing_estimates -= 1;
            return Err(GazeError::PointScoring {
                index: s.training.len(),
                reason: "simulated estimator fault".to_string(),
            });
        }
        if s.state != EstimatorState::Running {
            return Ok(None);
        }
        let base = match s.mode {
            SimulatedMode::Fixed => s.gaze,
            SimulatedMode::FollowTraining => s.training.last().copied().or(s.gaze),
        };
        let Some(base) = base else {
            return Ok(None);
        };
        s.clock_ms += 16;
        let p = base.offset(s.bias.0, s.bias.1);
        Ok(Some(GazeSample::new(p.x, p.y, s.confidence, s.clock_ms)))
    }
}

impl GazeEstimator for SimulatedEstimator {
    fn begin(&mut self) -> Result<()> {
        let mut s = self.shared.borrow_mut();
        s.lifecycle_calls.push("begin");
        if let Some(reason) = s.fail_begin.clone() {
            warn!("Simulated estimator refusing to start: {}", reason);
            return Err(GazeError::AdapterInit(reason));
        }
        s.state = EstimatorState::Running;
        info!(mode = s.mode.as_str(), "Simulated estimator started");
        Ok(())
    }

    fn pause(&mut self) {
        let mut s = self.shared.borrow_mut();
        s.lifecycle_calls.push("pause");
        if s.state == EstimatorState::Running {
            s.state = EstimatorState::Paused;
        }
    }

    fn resume(&mut self) {
        let mut s = self.shared.borrow_mut();
        s.lifecycle_calls.push("resume");
        if s.state == EstimatorState::Paused {
            s.state = EstimatorState::Running;
        }
    }

    fn end(&mut self) {
        let mut s = self.shared.borrow_mut();
        s.lifecycle_calls.push("end");
        s.state = EstimatorState::Ended;
        s.sink = None;
    }

    fn subscribe(&mut self, sink: EstimateSink) {
        self.shared.borrow_mut().sink = Some(sink);
    }
}

impl SimulatedHandle {
    /// Where the simulated user is looking; `None` hides the face.
    pub fn look_at(&self, point: Option<ScreenPoint>) {
        self.shared.borrow_mut().gaze = point;
    }

    /// Constant offset added to every estimate.
    pub fn set_bias(&self, dx: f32, dy: f32) {
        self.shared.borrow_mut().bias = (dx, dy);
    }

    /// Make the next `begin` fail with the given reason (`None` clears).
    pub fn fail_begin(&self, reason: Option<&str>) {
        self.shared.borrow_mut().fail_begin = reason.map(str::to_string);
    }

    /// Make the next `n` estimate queries fail.
    pub fn fail_next_estimates(&self, n: u32) {
        self.shared.borrow_mut().failing_estimates = n;
    }

    /// Push one sample through the subscribed feed, if running.
    pub fn emit(&self, sample: GazeSample) -> bool {
        let s = self.shared.borrow();
        match (&s.sink, s.state) {
            (Some(sink), EstimatorState::Running) => sink.push(sample),
            _ => false,
        }
    }

    pub fn state(&self) -> EstimatorState {
        self.shared.borrow().state
    }

    pub fn training_samples(&self) -> Vec<ScreenPoint> {
        self.shared.borrow().training.clone()
    }

    pub fn lifecycle_calls(&self) -> Vec<&'static str> {
        self.shared.borrow().lifecycle_calls.clone()
    }
}
