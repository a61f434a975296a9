//! Calibration protocol: face detection, nine-point target sequence,
//! per-point accuracy scoring and the final quality score.
//!
//! The controller is deadline driven.  `next_deadline` says when it needs
//! the next `tick`, and `tick` performs every transition that is due.  It
//! owns no timers itself, so dropping the phase in `cancel` is enough to
//! guarantee no stale countdown can touch the session afterwards.

use std::f32::consts::TAU;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::estimator::EstimatorProbe;
use super::geometry::{ScreenPoint, Viewport};
use crate::clock::elapsed_ms;
use crate::config::CalibrationConfig;
use crate::error::{GazeError, Result};

// ── Grid ───────────────────────────────────────────────────

/// The nine calibration targets, left-to-right then top-to-bottom, inset by
/// `padding` of the viewport on every edge.
pub fn calibration_grid(viewport: Viewport, padding: f32) -> Vec<ScreenPoint> {
    let stops = |extent: f32| {
        [
            (padding * extent).round(),
            (extent / 2.0).round(),
            ((1.0 - padding) * extent).round(),
        ]
    };
    let xs = stops(viewport.width);
    let ys = stops(viewport.height);
    ys.iter()
        .flat_map(|&y| xs.iter().map(move |&x| ScreenPoint::new(x, y)))
        .collect()
}

/// Accuracy of one point: 100 minus the error as a fraction of the screen
/// diagonal, times `scale`.  Never negative.
pub fn point_accuracy(estimate: ScreenPoint, target: ScreenPoint, viewport: Viewport, scale: f32) -> f32 {
    let error = estimate.distance(target) / viewport.diagonal();
    (100.0 - error * scale).clamp(0.0, 100.0)
}

// ── Steps and events ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationStep {
    FaceDetect,
    CollectPoints,
    Complete,
    Failed,
}

impl CalibrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FaceDetect => "face-detect",
            Self::CollectPoints => "collect-points",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    FaceDetected,
    /// The target started travelling to point `index`.
    TargetMoved { index: usize, point: ScreenPoint },
    /// Countdown for point `index` shows `remaining`.
    CountdownTick { index: usize, remaining: u32 },
    PointScored { index: usize, accuracy: f32, quality: u8 },
    /// All points scored; the grace delay is running.
    Completed { quality: u8 },
    /// Grace delay over; live tracking may resume.
    Finished { quality: u8 },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    FaceDetect { started: Instant, next_poll: Instant },
    Moving { index: usize, until: Instant },
    Countdown { index: usize, remaining: u32, next_tick: Instant },
    Complete { quality: u8, grace_until: Instant },
    Failed { message: String },
}

// ── Controller ─────────────────────────────────────────────

pub struct CalibrationController {
    config: CalibrationConfig,
    viewport: Viewport,
    phase: Phase,
    points: Vec<ScreenPoint>,
    accuracies: Vec<f32>,
    quality: u8,
    rng: fastrand::Rng,
}

impl CalibrationController {
    pub fn new(config: CalibrationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            config,
            viewport: Viewport::default(),
            phase: Phase::Idle,
            points: Vec::new(),
            accuracies: Vec::new(),
            quality: 0,
            rng,
        }
    }

    /// Begin a fresh session from face detection.  Any previous session is
    /// discarded and the grid is regenerated for `viewport`.
    pub fn start(&mut self, viewport: Viewport, now: Instant) {
        self.viewport = viewport;
        self.points = calibration_grid(viewport, self.config.edge_padding);
        self.accuracies.clear();
        self.quality = 0;
        self.phase = Phase::FaceDetect {
            started: now,
            next_poll: now,
        };
        info!(
            "Calibration started ({} points, {}x{})",
            self.points.len(),
            viewport.width,
            viewport.height
        );
    }

    /// Abandon the session.  Valid until the final score is in; returns
    /// whether anything was discarded.
    pub fn cancel(&mut self) -> bool {
        match self.phase {
            Phase::Idle | Phase::Complete { .. } => false,
            _ => {
                info!(
                    "Calibration cancelled after {} of {} points",
                    self.accuracies.len(),
                    self.points.len()
                );
                self.discard();
                true
            }
        }
    }

    /// Put the controller into the terminal error state.
    pub fn fail(&mut self, message: impl Into<String>) -> CalibrationEvent {
        let message = message.into();
        warn!("Calibration failed: {}", message);
        self.phase = Phase::Failed {
            message: message.clone(),
        };
        CalibrationEvent::Failed { message }
    }

    fn discard(&mut self) {
        self.phase = Phase::Idle;
        self.points.clear();
        self.accuracies.clear();
        self.quality = 0;
    }

    /// When the next `tick` is due, if a timer is needed at all.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::FaceDetect { next_poll, .. } => Some(next_poll),
            Phase::Moving { until, .. } => Some(until),
            Phase::Countdown { next_tick, .. } => Some(next_tick),
            Phase::Complete { grace_until, .. } => Some(grace_until),
            Phase::Idle | Phase::Failed { .. } => None,
        }
    }

    /// Run every transition due at `now`.
    pub fn tick(&mut self, now: Instant, probe: &mut dyn EstimatorProbe) -> Vec<CalibrationEvent> {
        let mut events = Vec::new();
        loop {
            match self.phase.clone() {
                Phase::FaceDetect { started, next_poll } if now >= next_poll => {
                    if matches!(probe.current_estimate(), Ok(Some(_))) {
                        info!("Face detected after {} ms", elapsed_ms(next_poll, started));
                        events.push(CalibrationEvent::FaceDetected);
                        self.move_to(0, next_poll, &mut events);
                        continue;
                    }
                    let waited_ms = elapsed_ms(next_poll, started);
                    if waited_ms >= self.config.face_timeout_ms {
                        let err = GazeError::FaceNotDetected { waited_ms };
                        events.push(self.fail(err.to_string()));
                        break;
                    }
                    // The last poll lands exactly on the timeout.
                    let next_poll = (next_poll + self.config.face_poll())
                        .min(started + self.config.face_timeout());
                    self.phase = Phase::FaceDetect { started, next_poll };
                }
                Phase::Moving { index, until } if now >= until => {
                    let remaining = self.config.countdown_secs;
                    self.phase = Phase::Countdown {
                        index,
                        remaining,
                        next_tick: until + self.config.countdown_tick(),
                    };
                    events.push(CalibrationEvent::CountdownTick { index, remaining });
                }
                Phase::Countdown {
                    index,
                    remaining,
                    next_tick,
                } if now >= next_tick => {
                    let remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        self.collect(index, next_tick, probe, &mut events);
                    } else {
                        self.phase = Phase::Countdown {
                            index,
                            remaining,
                            next_tick: next_tick + self.config.countdown_tick(),
                        };
                        events.push(CalibrationEvent::CountdownTick { index, remaining });
                    }
                }
                Phase::Complete { quality, grace_until } if now >= grace_until => {
                    info!("Calibration finished with quality {}%", quality);
                    self.phase = Phase::Idle;
                    events.push(CalibrationEvent::Finished { quality });
                    break;
                }
                _ => break,
            }
        }
        events
    }

    /// Record the current point now instead of waiting for the countdown.
    pub fn record_point_activation(
        &mut self,
        index: usize,
        now: Instant,
        probe: &mut dyn EstimatorProbe,
    ) -> Result<Vec<CalibrationEvent>> {
        let current = self.current_point_index();
        match current {
            Some(expected) if expected == index => {
                let mut events = Vec::new();
                self.collect(index, now, probe, &mut events);
                Ok(events)
            }
            Some(expected) => Err(GazeError::InvalidPointIndex {
                got: index,
                expected: Some(expected),
            }),
            None => Err(GazeError::NotCalibrating),
        }
    }

    fn move_to(&mut self, index: usize, at: Instant, events: &mut Vec<CalibrationEvent>) {
        self.phase = Phase::Moving {
            index,
            until: at + self.config.target_move(),
        };
        events.push(CalibrationEvent::TargetMoved {
            index,
            point: self.points[index],
        });
    }

    /// Train on point `index`, score it and advance.  Scoring failures are
    /// absorbed as a zero for this point.
    fn collect(
        &mut self,
        index: usize,
        at: Instant,
        probe: &mut dyn EstimatorProbe,
        events: &mut Vec<CalibrationEvent>,
    ) {
        let target = self.points[index];
        let accuracy = match self.train_and_estimate(index, target, probe) {
            Ok(Some(estimate)) => point_accuracy(
                estimate,
                target,
                self.viewport,
                self.config.accuracy_scale,
            ),
            Ok(None) => {
                debug!(index, "No estimate for calibration point, scoring 0");
                0.0
            }
            Err(e) => {
                debug!(index, "Calibration point scoring failed: {}", e);
                0.0
            }
        };

        self.accuracies.push(accuracy);
        let mean = self.accuracies.iter().sum::<f32>() / self.accuracies.len() as f32;
        self.quality = mean.round().clamp(0.0, 100.0) as u8;
        debug!(
            index,
            accuracy,
            quality = self.quality,
            "Calibration point scored"
        );
        events.push(CalibrationEvent::PointScored {
            index,
            accuracy,
            quality: self.quality,
        });

        if index + 1 < self.points.len() {
            self.move_to(index + 1, at, events);
        } else {
            info!("Calibration complete: quality {}%", self.quality);
            self.phase = Phase::Complete {
                quality: self.quality,
                grace_until: at + self.config.grace(),
            };
            events.push(CalibrationEvent::Completed {
                quality: self.quality,
            });
        }
    }

    fn train_and_estimate(
        &mut self,
        index: usize,
        target: ScreenPoint,
        probe: &mut dyn EstimatorProbe,
    ) -> Result<Option<ScreenPoint>> {
        for _ in 0..self.config.jitter_samples {
            let angle = self.rng.f32() * TAU;
            let radius = self.rng.f32() * self.config.jitter_radius_px;
            probe.record_training_sample(target.offset(radius * angle.cos(), radius * angle.sin()))?;
        }
        probe.record_training_sample(target)?;
        probe
            .current_estimate()
            .map(|est| est.map(|s| s.point()))
            .map_err(|e| GazeError::PointScoring {
                index,
                reason: e.to_string(),
            })
    }

    // ── Observables ────────────────────────────────────────

    pub fn step(&self) -> Option<CalibrationStep> {
        match self.phase {
            Phase::Idle => None,
            Phase::FaceDetect { .. } => Some(CalibrationStep::FaceDetect),
            Phase::Moving { .. } | Phase::Countdown { .. } => Some(CalibrationStep::CollectPoints),
            Phase::Complete { .. } => Some(CalibrationStep::Complete),
            Phase::Failed { .. } => Some(CalibrationStep::Failed),
        }
    }

    /// Whether a session is running (including the completion grace delay).
    pub fn is_active(&self) -> bool {
        matches!(
            self.step(),
            Some(CalibrationStep::FaceDetect | CalibrationStep::CollectPoints | CalibrationStep::Complete)
        )
    }

    pub fn current_point_index(&self) -> Option<usize> {
        match self.phase {
            Phase::Moving { index, .. } | Phase::Countdown { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn points(&self) -> &[ScreenPoint] {
        &self.points
    }

    pub fn points_collected(&self) -> usize {
        self.accuracies.len()
    }

    pub fn per_point_accuracy(&self) -> &[f32] {
        &self.accuracies
    }

    /// Running mean of per-point accuracy, 0 before the first point.  The
    /// scores of a finished session stay readable until the next `start`.
    pub fn quality_score(&self) -> u8 {
        self.quality
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed { message } => Some(message),
            _ => None,
        }
    }
}
