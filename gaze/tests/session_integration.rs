//! End-to-end session scenarios driven by `TestClock` and scripted input.
//!
//! The driver below plays the part of the event loop: every 100 ms of
//! scripted time it runs the calibration timer and the dwell sampler.

use std::sync::Arc;

use gaze_assist::clock::{Clock, TestClock};
use gaze_assist::input_source::{InputEvent, InputProvider, RecordingProvider, ScriptedInputProvider};
use gaze_assist::tracking::{
    CalibrationEvent, CalibrationStep, DwellEvent, ElementKind, ElementTree, EstimatorState,
    GazeSample, GazeSession, Rect, ScreenPoint, SessionEvent, SimulatedEstimator,
    SimulatedHandle, SimulatedMode, TargetId, Viewport,
};
use gaze_assist::GazeConfig;

type Session = GazeSession<SimulatedEstimator, ElementTree>;

const PAY: ScreenPoint = ScreenPoint::new(200.0, 130.0);
const SCAN: ScreenPoint = ScreenPoint::new(700.0, 130.0);
const BLANK: ScreenPoint = ScreenPoint::new(900.0, 700.0);

struct Page {
    pay: TargetId,
    scan: TargetId,
}

fn setup() -> (Session, SimulatedHandle, Arc<TestClock>, Page) {
    let mut tree = ElementTree::new();
    let body = tree.insert(ElementKind::Container, "body", Rect::new(0.0, 0.0, 1200.0, 800.0), None);
    let pay = tree.insert(ElementKind::Button, "Pay bill", Rect::new(100.0, 100.0, 200.0, 60.0), Some(body));
    let scan = tree.insert(ElementKind::Link, "Scan bill", Rect::new(600.0, 100.0, 200.0, 60.0), Some(body));

    let (sim, handle) = SimulatedEstimator::new(SimulatedMode::FollowTraining);
    handle.look_at(Some(ScreenPoint::new(600.0, 400.0)));
    let clock = Arc::new(TestClock::new());
    let mut config = GazeConfig::default();
    config.calibration.seed = Some(42);
    let session = GazeSession::new(sim, tree, &config, Viewport::new(1200.0, 800.0), clock.clone());
    (session, handle, clock, Page { pay, scan })
}

fn drive(session: &mut Session, clock: &TestClock, input: &mut dyn InputProvider) {
    while let Some(event) = input.next_event() {
        match event {
            InputEvent::Wait { ms } => {
                let mut left = ms;
                while left > 0 {
                    let step = left.min(100);
                    clock.advance_ms(step);
                    left -= step;
                    session.calibration_tick();
                    session.dwell_tick();
                }
            }
            InputEvent::Gaze { x, y, confidence } => {
                session.on_raw_estimate(GazeSample::new(x, y, confidence, clock.unix_millis()));
            }
            InputEvent::Toggle => {
                let _ = session.toggle();
            }
            InputEvent::Recalibrate => {
                let _ = session.recalibrate();
            }
            InputEvent::CancelCalibration => {
                session.cancel_calibration();
            }
            InputEvent::RetryCalibration => {
                let _ = session.retry_calibration();
            }
            InputEvent::AcceptPoint { index } => {
                let _ = session.record_point_activation(index);
            }
            InputEvent::SetDwellTime { ms } => {
                let _ = session.set_dwell_time(ms);
            }
            InputEvent::ToggleIndicator => {
                session.toggle_gaze_visualization();
            }
        }
    }
}

fn stare(at: ScreenPoint, ms: u64) -> Vec<InputEvent> {
    (0..ms / 100)
        .flat_map(|_| {
            [
                InputEvent::Gaze {
                    x: at.x,
                    y: at.y,
                    confidence: 0.9,
                },
                InputEvent::Wait { ms: 100 },
            ]
        })
        .collect()
}

fn calibrated() -> (Session, SimulatedHandle, Arc<TestClock>, Page) {
    let (mut session, handle, clock, page) = setup();
    let mut input = ScriptedInputProvider::new(vec![InputEvent::Toggle, InputEvent::Wait { ms: 40_000 }]);
    drive(&mut session, &clock, &mut input);
    assert!(session.is_enabled());
    session.drain_events();
    (session, handle, clock, page)
}

// ── Calibration ─────────────────────────────────────────────

#[test]
fn test_enable_calibrate_then_click() {
    let (mut session, _handle, clock, page) = setup();
    let mut script = vec![InputEvent::Toggle, InputEvent::Wait { ms: 40_000 }];
    script.extend(stare(PAY, 1_200));
    let mut input = RecordingProvider::new(ScriptedInputProvider::new(script));
    drive(&mut session, &clock, &mut input);

    assert_eq!(session.ui().activations(), &[page.pay]);
    assert_eq!(session.ui().ripples().len(), 1);

    let events = session.drain_events();
    assert_eq!(events[0], SessionEvent::CalibrationStarted { recalibration: false });
    assert_eq!(events[1], SessionEvent::Calibration(CalibrationEvent::FaceDetected));
    let started = events.iter().position(|e| *e == SessionEvent::TrackingStarted).unwrap();
    let finished = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Calibration(CalibrationEvent::Finished { quality: 100 })))
        .unwrap();
    assert_eq!(started, finished + 1);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Dwell(DwellEvent::Activated { .. }))
    ));
    assert_eq!(input.recorded().len(), 2 + 24);
}

#[test]
fn test_calibration_targets_for_1200x800() {
    let (mut session, _handle, clock, _) = setup();
    let mut input = ScriptedInputProvider::new(vec![InputEvent::Toggle, InputEvent::Wait { ms: 40_000 }]);
    drive(&mut session, &clock, &mut input);

    let targets: Vec<ScreenPoint> = session
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Calibration(CalibrationEvent::TargetMoved { point, .. }) => Some(point),
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 9);
    assert_eq!(targets[0], ScreenPoint::new(180.0, 120.0));
    assert_eq!(targets[4], ScreenPoint::new(600.0, 400.0));
}

#[test]
fn test_points_scored_in_order_before_next_move() {
    let (mut session, _handle, clock, _) = setup();
    let mut input = ScriptedInputProvider::new(vec![InputEvent::Toggle, InputEvent::Wait { ms: 40_000 }]);
    drive(&mut session, &clock, &mut input);

    let mut next_move = 0;
    let mut next_score = 0;
    for event in session.drain_events() {
        match event {
            SessionEvent::Calibration(CalibrationEvent::TargetMoved { index, .. }) => {
                assert_eq!(index, next_move);
                assert_eq!(next_score, index, "point {} moved before the previous one was scored", index);
                next_move += 1;
            }
            SessionEvent::Calibration(CalibrationEvent::PointScored { index, .. }) => {
                assert_eq!(index, next_score);
                next_score += 1;
            }
            _ => {}
        }
    }
    assert_eq!((next_move, next_score), (9, 9));
}

#[test]
fn test_accepting_points_early() {
    let (mut session, _handle, clock, _) = setup();
    let mut script = vec![InputEvent::Toggle];
    script.extend((0..9).map(|index| InputEvent::AcceptPoint { index }));
    script.push(InputEvent::Wait { ms: 2_000 });
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));

    assert!(session.is_enabled());
    assert_eq!(session.status().calibration_quality, Some(100));
}

#[test]
fn test_face_timeout_and_retry() {
    let (mut session, handle, clock, _) = setup();
    handle.look_at(None);
    let mut input = ScriptedInputProvider::new(vec![InputEvent::Toggle, InputEvent::Wait { ms: 12_000 }]);
    drive(&mut session, &clock, &mut input);

    let status = session.status();
    assert_eq!(status.calibration_step, Some(CalibrationStep::Failed));
    assert!(status.calibration_error.unwrap().contains("no face detected"));
    assert!(!status.enabled);

    handle.look_at(Some(ScreenPoint::new(600.0, 400.0)));
    let mut input = ScriptedInputProvider::new(vec![
        InputEvent::RetryCalibration,
        InputEvent::Wait { ms: 40_000 },
    ]);
    drive(&mut session, &clock, &mut input);
    assert!(session.is_enabled());
    assert!(session.status().calibration_error.is_none());
}

#[test]
fn test_first_cancel_then_retoggle() {
    let (mut session, handle, clock, _) = setup();
    let mut input = ScriptedInputProvider::new(vec![
        InputEvent::Toggle,
        InputEvent::Wait { ms: 5_000 },
        InputEvent::CancelCalibration,
        InputEvent::Wait { ms: 40_000 },
    ]);
    drive(&mut session, &clock, &mut input);
    assert!(!session.is_enabled());
    assert_eq!(handle.state(), EstimatorState::Paused);
    assert_eq!(session.status().points_collected, 0);

    let mut input = ScriptedInputProvider::new(vec![InputEvent::Toggle, InputEvent::Wait { ms: 40_000 }]);
    drive(&mut session, &clock, &mut input);
    assert!(session.is_enabled());
}

// ── Dwell ───────────────────────────────────────────────────

#[test]
fn test_alternating_targets_never_fire() {
    let (mut session, _handle, clock, _) = calibrated();
    let mut script = Vec::new();
    for _ in 0..10 {
        script.extend(stare(PAY, 600));
        script.extend(stare(SCAN, 600));
    }
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));
    assert!(session.ui().activations().is_empty());
}

#[test]
fn test_dwell_resets_over_blank_space() {
    let (mut session, _handle, clock, page) = calibrated();
    let mut script = stare(PAY, 800);
    script.extend(stare(BLANK, 1_500));
    script.extend(stare(PAY, 800));
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));
    assert!(session.ui().activations().is_empty());
    assert!(!session.ui().is_hovered(page.pay));
}

#[test]
fn test_long_stare_fires_once() {
    let (mut session, _handle, clock, page) = calibrated();
    let mut script = stare(SCAN, 6_000);
    // Leaving re-arms the target.
    script.extend(stare(BLANK, 1_000));
    script.extend(stare(SCAN, 2_500));
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));
    assert_eq!(session.ui().activations(), &[page.scan, page.scan]);
}

#[test]
fn test_dwell_time_setting_applies() {
    let (mut session, _handle, clock, page) = calibrated();
    let mut script = vec![InputEvent::SetDwellTime { ms: 2_000 }];
    script.extend(stare(PAY, 1_500));
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));
    assert!(session.ui().activations().is_empty());

    drive(&mut session, &clock, &mut ScriptedInputProvider::new(stare(PAY, 1_000)));
    assert_eq!(session.ui().activations(), &[page.pay]);

    // Out of range is rejected and the previous value kept.
    drive(
        &mut session,
        &clock,
        &mut ScriptedInputProvider::new(vec![InputEvent::SetDwellTime { ms: 100 }]),
    );
    assert_eq!(session.settings().dwell_time_ms, 2_000);
}

#[test]
fn test_recalibration_suspends_dwell_and_keeps_tracking() {
    let (mut session, handle, clock, page) = calibrated();
    let mut script = vec![InputEvent::Recalibrate];
    script.extend(stare(PAY, 2_000));
    script.push(InputEvent::CancelCalibration);
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(script));

    assert!(session.ui().activations().is_empty());
    assert!(session.is_enabled());
    assert_eq!(handle.state(), EstimatorState::Running);

    drive(&mut session, &clock, &mut ScriptedInputProvider::new(stare(PAY, 1_200)));
    assert_eq!(session.ui().activations(), &[page.pay]);
}

#[test]
fn test_indicator_toggle() {
    let (mut session, _handle, clock, _) = calibrated();
    drive(&mut session, &clock, &mut ScriptedInputProvider::new(stare(PAY, 200)));
    let frame = session.ui().indicator().unwrap();
    assert!((frame.opacity - 1.0).abs() < 1e-6);
    assert_eq!(frame.active_cell, 0);

    drive(
        &mut session,
        &clock,
        &mut ScriptedInputProvider::new(vec![InputEvent::ToggleIndicator]),
    );
    assert!(session.ui().indicator().is_none());
    assert!(!session.status().show_gaze_indicator);
}
