//! `GazeSession`: the explicitly owned gaze subsystem.
//!
//! Owns the estimator, the calibration controller, the smoothing layer and
//! the dwell engine, and is the only caller of estimator lifecycle methods.
//! All state changes happen through the methods below; timers are the
//! runtime's business and call back into `calibration_tick` / `dwell_tick`.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use super::calibration::{CalibrationController, CalibrationEvent, CalibrationStep};
use super::dwell::{DwellEngine, DwellEvent};
use super::estimator::{EstimateSink, EstimatorState, GazeEstimator, GazeSample};
use super::geometry::{ScreenPoint, Viewport};
use super::smoothing::SmoothingLayer;
use super::surface::UiSurface;
use crate::clock::Clock;
use crate::config::{GazeConfig, SessionSettings, DWELL_TIME_RANGE_MS};
use crate::error::{GazeError, Result};

/// Something the host UI should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CalibrationStarted { recalibration: bool },
    Calibration(CalibrationEvent),
    CalibrationCancelled,
    TrackingStarted,
    TrackingStopped,
    Dwell(DwellEvent),
}

/// Read-only observables, as one serializable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GazeStatus {
    pub enabled: bool,
    pub calibrating: bool,
    pub calibration_step: Option<CalibrationStep>,
    /// Running score while calibrating, otherwise the last completed score.
    pub calibration_quality: Option<u8>,
    pub points_collected: usize,
    pub calibration_error: Option<String>,
    pub eye_detected: bool,
    pub estimator: EstimatorState,
    pub dwell_time_ms: u64,
    pub show_gaze_indicator: bool,
    pub gaze: Option<ScreenPoint>,
    pub avg_confidence: f32,
    pub activations: u64,
}

pub struct GazeSession<E: GazeEstimator, U: UiSurface> {
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    viewport: Viewport,
    estimator: E,
    estimator_state: EstimatorState,
    ui: U,
    enabled: bool,
    has_calibrated: bool,
    recalibrating: bool,
    calibration: CalibrationController,
    calibration_error: Option<String>,
    calibration_quality: Option<u8>,
    smoothing: SmoothingLayer,
    dwell: DwellEngine,
    events: Vec<SessionEvent>,
}

impl<E: GazeEstimator, U: UiSurface> GazeSession<E, U> {
    pub fn new(estimator: E, ui: U, config: &GazeConfig, viewport: Viewport, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            settings: config.session.clone(),
            viewport,
            estimator,
            estimator_state: EstimatorState::Idle,
            ui,
            enabled: false,
            has_calibrated: false,
            recalibrating: false,
            calibration: CalibrationController::new(config.calibration.clone()),
            calibration_error: None,
            calibration_quality: None,
            smoothing: SmoothingLayer::new(&config.smoothing),
            dwell: DwellEngine::new(),
            events: Vec::new(),
        }
    }

    /// Route the estimator's push feed into `sink`.
    pub fn subscribe(&mut self, sink: EstimateSink) {
        self.estimator.subscribe(sink);
    }

    // ── Commands ───────────────────────────────────────────

    /// Disabled: start calibration (tracking goes live only once it
    /// succeeds).  Enabled: stop tracking.  During a first calibration the
    /// toggle closes it.
    pub fn toggle(&mut self) -> Result<()> {
        if self.enabled {
            self.disable();
            Ok(())
        } else if self.calibration.is_active() {
            self.cancel_calibration();
            Ok(())
        } else {
            self.start_calibration()
        }
    }

    /// Enter calibration.  Tracking stays enabled if it already was.
    pub fn start_calibration(&mut self) -> Result<()> {
        if self.calibration.is_active() {
            debug!("Calibration already running");
            return Ok(());
        }
        self.calibration_error = None;
        self.recalibrating = self.enabled;

        if let Err(e) = self.ensure_running() {
            let event = self.calibration.fail(e.to_string());
            self.calibration_error = Some(e.to_string());
            self.events.push(SessionEvent::Calibration(event));
            return Err(e);
        }

        self.hide_indicator();
        self.dwell.clear(&mut self.ui);
        self.calibration.start(self.viewport, self.clock.now());
        self.events.push(SessionEvent::CalibrationStarted {
            recalibration: self.recalibrating,
        });
        self.calibration_tick();
        Ok(())
    }

    pub fn recalibrate(&mut self) -> Result<()> {
        self.start_calibration()
    }

    /// "Try again" after a failure: discard everything and start over.
    pub fn retry_calibration(&mut self) -> Result<()> {
        self.calibration.cancel();
        self.calibration_error = None;
        self.start_calibration()
    }

    /// Close the calibration UI.  Returns false if nothing was running.
    pub fn cancel_calibration(&mut self) -> bool {
        if !self.calibration.cancel() {
            return false;
        }
        self.calibration_error = None;
        self.pause_estimator();
        if self.enabled {
            self.resume_live();
        } else if !self.has_calibrated {
            info!("First calibration cancelled, gaze control stays off");
        }
        self.events.push(SessionEvent::CalibrationCancelled);
        true
    }

    /// UI accepted the current calibration point early.
    pub fn record_point_activation(&mut self, index: usize) -> Result<()> {
        let now = self.clock.now();
        let events = self
            .calibration
            .record_point_activation(index, now, &mut self.estimator)?;
        self.handle_calibration_events(events);
        Ok(())
    }

    pub fn set_dwell_time(&mut self, ms: u64) -> Result<()> {
        if !DWELL_TIME_RANGE_MS.contains(&ms) {
            return Err(GazeError::DwellTimeOutOfRange(ms));
        }
        info!("Dwell time set to {} ms", ms);
        self.settings.dwell_time_ms = ms;
        Ok(())
    }

    pub fn set_show_gaze(&mut self, show: bool) {
        self.settings.show_gaze_indicator = show;
        if !show {
            self.hide_indicator();
        }
    }

    /// Flip indicator visibility; returns the new setting.
    pub fn toggle_gaze_visualization(&mut self) -> bool {
        let show = !self.settings.show_gaze_indicator;
        self.set_show_gaze(show);
        show
    }

    /// New viewport size.  Calibration picks it up on its next start.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    // ── Feed and timers ────────────────────────────────────

    /// One raw estimate from the estimator feed.
    pub fn on_raw_estimate(&mut self, sample: GazeSample) {
        if self.estimator_state != EstimatorState::Running {
            return;
        }
        if !self.is_live() {
            self.smoothing.health.update(&sample);
            return;
        }
        let frame = self.smoothing.on_raw_estimate(&sample, self.viewport);
        if self.settings.show_gaze_indicator {
            self.ui.render_indicator(Some(frame));
        }
    }

    /// One dwell sampler tick.  Does nothing unless tracking is live.
    pub fn dwell_tick(&mut self) -> Option<DwellEvent> {
        if !self.is_live() {
            return None;
        }
        let event = self.dwell.tick(
            self.clock.now(),
            self.smoothing.position(),
            self.settings.dwell_time_ms,
            &mut self.ui,
        )?;
        self.events.push(SessionEvent::Dwell(event.clone()));
        Some(event)
    }

    /// Run whatever calibration transitions are due.
    pub fn calibration_tick(&mut self) {
        let events = self.calibration.tick(self.clock.now(), &mut self.estimator);
        self.handle_calibration_events(events);
    }

    pub fn next_calibration_deadline(&self) -> Option<Instant> {
        self.calibration.next_deadline()
    }

    /// Poll-only estimators need this called at `pump_interval`.
    pub fn pump_estimator(&mut self) {
        self.estimator.pump();
    }

    pub fn pump_interval(&self) -> Option<std::time::Duration> {
        self.estimator.pump_interval()
    }

    /// Stop everything and release the estimator.
    pub fn teardown(&mut self) {
        self.calibration.cancel();
        if self.enabled {
            self.disable();
        }
        if matches!(self.estimator_state, EstimatorState::Running | EstimatorState::Paused) {
            self.estimator.end();
            self.estimator_state = EstimatorState::Ended;
        }
        info!("Gaze session torn down");
    }

    // ── Observables ────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_active()
    }

    /// Tracking enabled and no calibration in front of it.
    pub fn is_live(&self) -> bool {
        self.enabled && !self.calibration.is_active()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn estimator_state(&self) -> EstimatorState {
        self.estimator_state
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn status(&self) -> GazeStatus {
        let calibrating = self.calibration.is_active();
        GazeStatus {
            enabled: self.enabled,
            calibrating,
            calibration_step: self.calibration.step(),
            calibration_quality: if calibrating {
                Some(self.calibration.quality_score())
            } else {
                self.calibration_quality
            },
            points_collected: self.calibration.points_collected(),
            calibration_error: self.calibration_error.clone(),
            eye_detected: self.smoothing.health.eye_detected,
            estimator: self.estimator_state,
            dwell_time_ms: self.settings.dwell_time_ms,
            show_gaze_indicator: self.settings.show_gaze_indicator,
            gaze: self.smoothing.position(),
            avg_confidence: self.smoothing.health.avg_confidence(),
            activations: self.dwell.activation_count(),
        }
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Internals ──────────────────────────────────────────

    fn handle_calibration_events(&mut self, events: Vec<CalibrationEvent>) {
        for event in events {
            match &event {
                CalibrationEvent::Completed { quality } => {
                    self.calibration_quality = Some(*quality);
                }
                CalibrationEvent::Failed { message } => {
                    self.calibration_error = Some(message.clone());
                    if !self.enabled {
                        self.pause_estimator();
                    }
                }
                CalibrationEvent::FaceDetected => {
                    self.smoothing.health.eye_detected = true;
                }
                _ => {}
            }
            let finished = matches!(event, CalibrationEvent::Finished { .. });
            self.events.push(SessionEvent::Calibration(event));
            if finished {
                self.has_calibrated = true;
                if self.enabled {
                    info!("Recalibration finished, tracking resumes");
                    self.smoothing.reset();
                } else {
                    self.enable();
                }
            }
        }
    }

    fn enable(&mut self) {
        self.enabled = true;
        self.smoothing.reset();
        self.dwell.clear(&mut self.ui);
        info!("Gaze tracking enabled");
        self.events.push(SessionEvent::TrackingStarted);
    }

    fn disable(&mut self) {
        if self.calibration.is_active() {
            self.calibration.cancel();
            self.events.push(SessionEvent::CalibrationCancelled);
        }
        self.enabled = false;
        self.pause_estimator();
        self.hide_indicator();
        self.dwell.clear(&mut self.ui);
        self.smoothing.reset();
        info!("Gaze tracking disabled");
        self.events.push(SessionEvent::TrackingStopped);
    }

    /// Back to live tracking after a cancelled recalibration.
    fn resume_live(&mut self) {
        if let Err(e) = self.ensure_running() {
            debug!("Estimator did not come back after recalibration: {}", e);
            return;
        }
        self.smoothing.reset();
    }

    fn hide_indicator(&mut self) {
        self.smoothing.indicator.clear();
        self.ui.render_indicator(None);
    }

    fn ensure_running(&mut self) -> Result<()> {
        match self.estimator_state {
            EstimatorState::Running => {}
            EstimatorState::Paused => {
                self.estimator.resume();
                self.estimator_state = EstimatorState::Running;
            }
            EstimatorState::Idle | EstimatorState::Ended => {
                self.estimator.begin()?;
                self.estimator_state = EstimatorState::Running;
                info!("Gaze estimator started");
            }
        }
        Ok(())
    }

    fn pause_estimator(&mut self) {
        if self.estimator_state == EstimatorState::Running {
            self.estimator.pause();
            self.estimator_state = EstimatorState::Paused;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::tracking::estimator::{SimulatedEstimator, SimulatedHandle, SimulatedMode};
    use crate::tracking::surface::{ElementKind, ElementTree, Rect, TargetId};

    type Session = GazeSession<SimulatedEstimator, ElementTree>;

    const BUTTON: ScreenPoint = ScreenPoint::new(200.0, 130.0);

    fn setup() -> (Session, SimulatedHandle, Arc<TestClock>, TargetId) {
        let mut tree = ElementTree::new();
        let body = tree.insert(ElementKind::Container, "body", Rect::new(0.0, 0.0, 1200.0, 800.0), None);
        let button = tree.insert(ElementKind::Button, "Pay", Rect::new(100.0, 100.0, 200.0, 60.0), Some(body));

        let (sim, handle) = SimulatedEstimator::new(SimulatedMode::FollowTraining);
        handle.look_at(Some(ScreenPoint::new(600.0, 400.0)));
        let clock = Arc::new(TestClock::new());
        let mut config = GazeConfig::default();
        config.calibration.seed = Some(1);
        let session = GazeSession::new(sim, tree, &config, Viewport::new(1200.0, 800.0), clock.clone());
        (session, handle, clock, button)
    }

    fn run_calibration(session: &mut Session, clock: &TestClock) {
        for _ in 0..1000 {
            if !session.is_calibrating() {
                return;
            }
            clock.advance_ms(100);
            session.calibration_tick();
        }
    }

    fn look(session: &mut Session, p: ScreenPoint) {
        session.on_raw_estimate(GazeSample::new(p.x, p.y, 0.9, 0));
    }

    #[test]
    fn test_toggle_enables_only_after_calibration() {
        let (mut session, handle, clock, _) = setup();
        session.toggle().unwrap();
        assert!(session.is_calibrating());
        assert!(!session.is_enabled());
        assert_eq!(handle.state(), EstimatorState::Running);

        run_calibration(&mut session, &clock);
        assert!(session.is_enabled());
        let status = session.status();
        assert_eq!(status.calibration_quality, Some(100));
        assert_eq!(status.points_collected, 9);
        assert!(session.drain_events().contains(&SessionEvent::TrackingStarted));
    }

    #[test]
    fn test_face_found_marks_eye_detected() {
        let (mut session, _handle, _clock, _) = setup();
        assert!(!session.status().eye_detected);
        session.toggle().unwrap();
        assert!(session
            .drain_events()
            .contains(&SessionEvent::Calibration(CalibrationEvent::FaceDetected)));
        let status = session.status();
        assert_eq!(status.calibration_step, Some(CalibrationStep::CollectPoints));
        assert!(status.eye_detected);
    }

    #[test]
    fn test_recalibration_uses_new_viewport() {
        let (mut session, _handle, clock, _) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);
        assert_eq!(session.calibration().points()[0], ScreenPoint::new(180.0, 120.0));
        session.drain_events();

        session.set_viewport(Viewport::new(800.0, 600.0));
        session.recalibrate().unwrap();
        let first_target = session.drain_events().into_iter().find_map(|e| match e {
            SessionEvent::Calibration(CalibrationEvent::TargetMoved { point, .. }) => Some(point),
            _ => None,
        });
        assert_eq!(first_target, Some(ScreenPoint::new(120.0, 90.0)));
        assert_eq!(session.calibration().points()[8], ScreenPoint::new(680.0, 510.0));
    }

    #[test]
    fn test_first_run_cancel_leaves_disabled() {
        let (mut session, handle, clock, _) = setup();
        session.toggle().unwrap();
        clock.advance_ms(2_000);
        session.calibration_tick();
        assert!(session.cancel_calibration());

        assert!(!session.is_enabled());
        assert!(!session.is_calibrating());
        assert_eq!(session.status().points_collected, 0);
        assert_eq!(handle.state(), EstimatorState::Paused);
        assert_eq!(handle.lifecycle_calls(), vec!["begin", "pause"]);

        // Nothing left running after the cancel.
        clock.advance_ms(60_000);
        session.calibration_tick();
        assert!(!session.is_enabled());
        assert_eq!(session.next_calibration_deadline(), None);
    }

    #[test]
    fn test_recalibration_keeps_tracking_enabled() {
        let (mut session, handle, clock, _) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);

        session.recalibrate().unwrap();
        assert!(session.is_enabled());
        assert!(session.is_calibrating());
        assert!(!session.is_live());

        assert!(session.cancel_calibration());
        assert!(session.is_enabled());
        assert!(session.is_live());
        assert_eq!(handle.state(), EstimatorState::Running);
        let calls = handle.lifecycle_calls();
        assert_eq!(&calls[calls.len() - 2..], &["pause", "resume"]);
        // Previous score survives a cancelled recalibration.
        assert_eq!(session.status().calibration_quality, Some(100));
    }

    #[test]
    fn test_adapter_init_failure_and_retry() {
        let (mut session, handle, clock, _) = setup();
        handle.fail_begin(Some("camera permission denied"));

        let err = session.toggle().unwrap_err();
        assert!(matches!(err, GazeError::AdapterInit(_)));
        let status = session.status();
        assert!(!status.enabled);
        assert_eq!(status.calibration_step, Some(CalibrationStep::Failed));
        assert!(status.calibration_error.unwrap().contains("camera permission denied"));
        assert_eq!(status.estimator, EstimatorState::Idle);

        handle.fail_begin(None);
        session.retry_calibration().unwrap();
        assert!(session.status().calibration_error.is_none());
        assert!(session.is_calibrating());
        run_calibration(&mut session, &clock);
        assert!(session.is_enabled());
    }

    #[test]
    fn test_face_timeout_then_retry() {
        let (mut session, handle, clock, _) = setup();
        handle.look_at(None);
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);

        let status = session.status();
        assert!(!status.enabled);
        assert_eq!(status.calibration_step, Some(CalibrationStep::Failed));
        assert!(status.calibration_error.is_some());
        assert_eq!(handle.state(), EstimatorState::Paused);

        handle.look_at(Some(ScreenPoint::new(600.0, 400.0)));
        session.retry_calibration().unwrap();
        assert_eq!(handle.state(), EstimatorState::Running);
        run_calibration(&mut session, &clock);
        assert!(session.is_enabled());
    }

    #[test]
    fn test_dwell_time_range() {
        let (mut session, _, _, _) = setup();
        assert!(matches!(
            session.set_dwell_time(499),
            Err(GazeError::DwellTimeOutOfRange(499))
        ));
        assert!(session.set_dwell_time(3001).is_err());
        assert_eq!(session.settings().dwell_time_ms, 1000);
        session.set_dwell_time(500).unwrap();
        session.set_dwell_time(3000).unwrap();
        assert_eq!(session.settings().dwell_time_ms, 3000);
    }

    #[test]
    fn test_live_dwell_activation() {
        let (mut session, _, clock, button) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);
        session.drain_events();

        look(&mut session, BUTTON);
        for _ in 0..10 {
            session.dwell_tick();
            clock.advance_ms(100);
        }
        assert!(session.ui().activations().is_empty());
        assert!(matches!(
            session.dwell_tick(),
            Some(DwellEvent::Activated { target, .. }) if target == button
        ));
        assert_eq!(session.ui().activations(), &[button]);
        assert_eq!(session.status().activations, 1);
    }

    #[test]
    fn test_dwell_suspended_while_calibrating_or_disabled() {
        let (mut session, _, clock, _) = setup();
        look(&mut session, BUTTON);
        assert_eq!(session.dwell_tick(), None);

        session.toggle().unwrap();
        run_calibration(&mut session, &clock);
        session.recalibrate().unwrap();
        look(&mut session, BUTTON);
        for _ in 0..20 {
            clock.advance_ms(100);
            assert_eq!(session.dwell_tick(), None);
        }
        assert!(session.ui().activations().is_empty());
    }

    #[test]
    fn test_indicator_follows_setting() {
        let (mut session, _, clock, _) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);

        look(&mut session, ScreenPoint::new(100.0, 100.0));
        look(&mut session, ScreenPoint::new(200.0, 200.0));
        let frame = session.ui().indicator().unwrap();
        assert!((frame.position.x - 130.0).abs() < 1e-4);
        assert_eq!(frame.active_cell, 0);

        assert!(!session.toggle_gaze_visualization());
        assert!(session.ui().indicator().is_none());
        look(&mut session, ScreenPoint::new(200.0, 200.0));
        assert!(session.ui().indicator().is_none());
    }

    #[test]
    fn test_toggle_off_pauses_and_hides() {
        let (mut session, handle, clock, button) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);
        look(&mut session, BUTTON);
        session.dwell_tick();
        assert!(session.ui().is_hovered(button));

        session.toggle().unwrap();
        assert!(!session.is_enabled());
        assert_eq!(handle.state(), EstimatorState::Paused);
        assert!(session.ui().indicator().is_none());
        assert!(!session.ui().is_hovered(button));
        assert!(session.drain_events().contains(&SessionEvent::TrackingStopped));

        // Turning it back on recalibrates first.
        session.toggle().unwrap();
        assert!(session.is_calibrating());
        assert_eq!(handle.state(), EstimatorState::Running);
    }

    #[test]
    fn test_teardown_ends_estimator() {
        let (mut session, handle, clock, _) = setup();
        session.toggle().unwrap();
        run_calibration(&mut session, &clock);
        session.teardown();
        assert_eq!(handle.state(), EstimatorState::Ended);
        assert_eq!(session.estimator_state(), EstimatorState::Ended);
        assert!(!session.is_enabled());
    }

    #[test]
    fn test_status_serializes() {
        let (session, _, _, _) = setup();
        let json = serde_json::to_value(session.status()).unwrap();
        assert_eq!(json["enabled"], false);
        assert_eq!(json["estimator"], "idle");
        assert_eq!(json["dwell_time_ms"], 1000);
    }
}
