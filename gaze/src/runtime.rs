//! Single-threaded calloop runtime around a `GazeSession`.
//!
//! Three kinds of sources drive the session:
//! - the estimator feed, a `calloop::channel` the adapter pushes into;
//! - the dwell sampler, a repeating timer that only exists while tracking
//!   is live;
//! - the calibration timer, one deadline timer re-armed from the
//!   controller's next deadline and removed when calibration is cancelled.
//!
//! Poll-only estimators additionally get a pump timer.

use std::time::{Duration, Instant};

use calloop::channel::{self, Channel};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, RegistrationToken};
use tracing::{debug, info, warn};

use crate::config::GazeConfig;
use crate::error::{GazeError, Result};
use crate::input_source::{InputEvent, InputProvider};
use crate::tracking::estimator::{EstimateSink, GazeEstimator, GazeSample};
use crate::tracking::session::{GazeSession, SessionEvent};
use crate::tracking::surface::UiSurface;

/// Upper bound on a single dispatch so `run_for` stays responsive.
const MAX_DISPATCH: Duration = Duration::from_millis(10);

/// Loop data: the session plus the registration tokens of its timers.
pub struct RuntimeState<E: GazeEstimator + 'static, U: UiSurface + 'static> {
    pub session: GazeSession<E, U>,
    handle: LoopHandle<'static, RuntimeState<E, U>>,
    dwell_interval: Duration,
    dwell_timer: Option<RegistrationToken>,
    calibration_timer: Option<(RegistrationToken, Instant)>,
    pump_timer: Option<RegistrationToken>,
    samples_received: u64,
}

impl<E: GazeEstimator + 'static, U: UiSurface + 'static> RuntimeState<E, U> {
    /// Bring timer registrations in line with the session after a command.
    fn sync_timers(&mut self) -> Result<()> {
        if self.session.is_live() {
            self.ensure_dwell_timer()?;
        } else if let Some(token) = self.dwell_timer.take() {
            self.handle.remove(token);
            debug!("Dwell sampler stopped");
        }
        self.arm_calibration_timer()
    }

    fn ensure_dwell_timer(&mut self) -> Result<()> {
        if !self.session.is_live() || self.dwell_timer.is_some() {
            return Ok(());
        }
        let interval = self.dwell_interval;
        let token = self
            .handle
            .insert_source(Timer::from_duration(interval), move |_, _, state: &mut Self| {
                if !state.session.is_live() {
                    state.dwell_timer = None;
                    debug!("Dwell sampler stopped");
                    return TimeoutAction::Drop;
                }
                state.session.dwell_tick();
                TimeoutAction::ToDuration(interval)
            })
            .map_err(|e| GazeError::EventLoop(format!("failed to register dwell timer: {}", e.error)))?;
        self.dwell_timer = Some(token);
        debug!("Dwell sampler started ({} ms)", interval.as_millis());
        Ok(())
    }

    fn arm_calibration_timer(&mut self) -> Result<()> {
        let wanted = self.session.next_calibration_deadline();
        if wanted == self.calibration_timer.map(|(_, deadline)| deadline) {
            return Ok(());
        }
        if let Some((token, _)) = self.calibration_timer.take() {
            self.handle.remove(token);
        }
        let Some(deadline) = wanted else {
            return Ok(());
        };
        let token = self
            .handle
            .insert_source(Timer::from_deadline(deadline), |_, _, state: &mut Self| {
                state.session.calibration_tick();
                if let Err(e) = state.ensure_dwell_timer() {
                    warn!("{}", e);
                }
                match state.session.next_calibration_deadline() {
                    Some(next) => {
                        if let Some(timer) = state.calibration_timer.as_mut() {
                            timer.1 = next;
                        }
                        TimeoutAction::ToInstant(next)
                    }
                    None => {
                        state.calibration_timer = None;
                        TimeoutAction::Drop
                    }
                }
            })
            .map_err(|e| {
                GazeError::EventLoop(format!("failed to register calibration timer: {}", e.error))
            })?;
        self.calibration_timer = Some((token, deadline));
        Ok(())
    }
}

pub struct GazeRuntime<E: GazeEstimator + 'static, U: UiSurface + 'static> {
    event_loop: EventLoop<'static, RuntimeState<E, U>>,
    state: RuntimeState<E, U>,
}

impl<E: GazeEstimator + 'static, U: UiSurface + 'static> GazeRuntime<E, U> {
    pub fn new(mut session: GazeSession<E, U>, config: &GazeConfig) -> Result<Self> {
        let event_loop: EventLoop<'static, RuntimeState<E, U>> =
            EventLoop::try_new().map_err(|e| GazeError::EventLoop(e.to_string()))?;
        let handle = event_loop.handle();

        let (tx, rx): (_, Channel<GazeSample>) = channel::channel();
        session.subscribe(EstimateSink::new(tx));
        handle
            .insert_source(rx, |event, _, state: &mut RuntimeState<E, U>| match event {
                channel::Event::Msg(sample) => {
                    state.samples_received += 1;
                    state.session.on_raw_estimate(sample);
                }
                channel::Event::Closed => debug!("Estimator feed closed"),
            })
            .map_err(|e| GazeError::EventLoop(format!("failed to register estimator feed: {}", e.error)))?;

        let pump_timer = match session.pump_interval() {
            Some(interval) => {
                let token = handle
                    .insert_source(
                        Timer::from_duration(interval),
                        move |_, _, state: &mut RuntimeState<E, U>| {
                            state.session.pump_estimator();
                            TimeoutAction::ToDuration(interval)
                        },
                    )
                    .map_err(|e| GazeError::EventLoop(format!("failed to register pump timer: {}", e.error)))?;
                info!("Polling estimator every {} ms", interval.as_millis());
                Some(token)
            }
            None => None,
        };

        let dwell_interval = Duration::from_millis(config.dwell.sample_interval_ms);
        info!(
            "Gaze runtime initialized (dwell sampler: {} ms)",
            dwell_interval.as_millis()
        );

        Ok(Self {
            event_loop,
            state: RuntimeState {
                session,
                handle,
                dwell_interval,
                dwell_timer: None,
                calibration_timer: None,
                pump_timer,
                samples_received: 0,
            },
        })
    }

    pub fn session(&self) -> &GazeSession<E, U> {
        &self.state.session
    }

    /// Run a command against the session, then re-sync timers.
    pub fn with_session<R>(&mut self, f: impl FnOnce(&mut GazeSession<E, U>) -> R) -> Result<R> {
        let out = f(&mut self.state.session);
        self.state.sync_timers()?;
        Ok(out)
    }

    /// Take the session events produced since the last call.  Callers that
    /// run the loop for long periods should drain regularly.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.state.session.drain_events()
    }

    /// Estimates received over the feed so far.
    pub fn samples_received(&self) -> u64 {
        self.state.samples_received
    }

    pub fn dwell_sampler_active(&self) -> bool {
        self.state.dwell_timer.is_some()
    }

    pub fn calibration_timer_armed(&self) -> bool {
        self.state.calibration_timer.is_some()
    }

    pub fn dispatch(&mut self, timeout: Duration) -> Result<()> {
        self.event_loop
            .dispatch(Some(timeout), &mut self.state)
            .map_err(|e| GazeError::EventLoop(e.to_string()))
    }

    /// Dispatch events until `duration` of wall time has passed.
    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.dispatch((deadline - now).min(MAX_DISPATCH))?;
        }
    }

    /// Apply one scripted input.
    pub fn apply_input(&mut self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Wait { ms } => self.run_for(Duration::from_millis(ms)),
            InputEvent::Gaze { x, y, confidence } => self.with_session(|s| {
                let sample = GazeSample::new(x, y, confidence, s.clock().unix_millis());
                s.on_raw_estimate(sample);
            }),
            InputEvent::Toggle => self.with_session(|s| s.toggle())?,
            InputEvent::Recalibrate => self.with_session(|s| s.recalibrate())?,
            InputEvent::CancelCalibration => self.with_session(|s| {
                s.cancel_calibration();
            }),
            InputEvent::RetryCalibration => self.with_session(|s| s.retry_calibration())?,
            InputEvent::AcceptPoint { index } => {
                self.with_session(|s| s.record_point_activation(index))?
            }
            InputEvent::SetDwellTime { ms } => self.with_session(|s| s.set_dwell_time(ms))?,
            InputEvent::ToggleIndicator => self.with_session(|s| {
                s.toggle_gaze_visualization();
            }),
        }
    }

    /// Play a whole script.  Rejected commands are logged and skipped;
    /// event-loop failures abort.
    pub fn play<P: InputProvider + ?Sized>(&mut self, input: &mut P) -> Result<()> {
        while let Some(event) = input.next_event() {
            match self.apply_input(event) {
                Ok(()) => {}
                Err(e @ GazeError::EventLoop(_)) => return Err(e),
                Err(e) if e.is_session_fatal() => warn!("Scripted input failed: {}", e),
                Err(e) => debug!("Scripted input rejected: {}", e),
            }
        }
        Ok(())
    }

    /// Tear the session down and drop every timer.
    pub fn shutdown(mut self) -> GazeSession<E, U> {
        self.state.session.teardown();
        if let Some(token) = self.state.dwell_timer.take() {
            self.state.handle.remove(token);
        }
        if let Some((token, _)) = self.state.calibration_timer.take() {
            self.state.handle.remove(token);
        }
        if let Some(token) = self.state.pump_timer.take() {
            self.state.handle.remove(token);
        }
        info!(
            "Gaze runtime shut down ({} estimate(s) received)",
            self.state.samples_received
        );
        self.state.session
    }
}
