//! Exponential smoothing of raw estimates, the on-screen gaze indicator and
//! tracking health.

use tracing::{debug, info};

use super::estimator::GazeSample;
use super::geometry::{ScreenPoint, Viewport};
use crate::config::SmoothingConfig;

// ── EMA smoothing ───────────────────────────────────────────

/// Per-axis exponential moving average.  Owns the smoothed gaze cell; the
/// dwell engine and indicator only read it.
#[derive(Debug, Clone)]
pub struct GazeSmoother {
    /// Weight of the newest sample: 0 = frozen, 1 = no smoothing.
    pub alpha: f32,
    last: Option<ScreenPoint>,
}

impl GazeSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            last: None,
        }
    }

    /// Fold a raw point into the average.  The first point after a reset is
    /// taken as-is.
    pub fn smooth(&mut self, raw: ScreenPoint) -> ScreenPoint {
        let next = match self.last {
            Some(prev) => ScreenPoint::new(
                self.alpha * raw.x + (1.0 - self.alpha) * prev.x,
                self.alpha * raw.y + (1.0 - self.alpha) * prev.y,
            ),
            None => raw,
        };
        self.last = Some(next);
        next
    }

    /// Last smoothed position, if any sample arrived since the last reset.
    pub fn position(&self) -> Option<ScreenPoint> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── Indicator ───────────────────────────────────────────────

/// What the UI draws for the gaze dot on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorFrame {
    pub position: ScreenPoint,
    pub opacity: f32,
    /// Highlighted 3×3 activity cell, row-major.
    pub active_cell: usize,
}

/// Indicator derived from the smoothed position and sample confidence.
#[derive(Debug, Clone)]
pub struct GazeIndicator {
    pub opacity_boost: f32,
    frame: Option<IndicatorFrame>,
}

impl GazeIndicator {
    pub fn new(opacity_boost: f32) -> Self {
        Self {
            opacity_boost,
            frame: None,
        }
    }

    pub fn update(
        &mut self,
        smoothed: ScreenPoint,
        confidence: f32,
        viewport: Viewport,
    ) -> IndicatorFrame {
        let frame = IndicatorFrame {
            position: smoothed,
            opacity: (confidence + self.opacity_boost).min(1.0),
            active_cell: viewport.grid_cell(smoothed),
        };
        self.frame = Some(frame);
        frame
    }

    pub fn frame(&self) -> Option<IndicatorFrame> {
        self.frame
    }

    pub fn clear(&mut self) {
        self.frame = None;
    }
}

// ── Gaze health ─────────────────────────────────────────────

/// Tracks whether the estimator currently sees the user's eyes.
#[derive(Debug, Clone)]
pub struct GazeHealth {
    pub min_confidence: f32,
    pub lost_after: u32,
    pub consecutive_lost: u32,
    pub tracking_lost: bool,
    /// Whether any valid sample arrived since the last reset.
    pub eye_detected: bool,
    confidence_sum: f32,
    confidence_count: u32,
}

impl GazeHealth {
    pub fn new(min_confidence: f32, lost_after: u32) -> Self {
        Self {
            min_confidence,
            lost_after,
            consecutive_lost: 0,
            tracking_lost: false,
            eye_detected: false,
            confidence_sum: 0.0,
            confidence_count: 0,
        }
    }

    pub fn update(&mut self, sample: &GazeSample) {
        if sample.confidence > self.min_confidence {
            if self.tracking_lost {
                info!("Gaze tracking recovered");
            }
            self.consecutive_lost = 0;
            self.tracking_lost = false;
            self.eye_detected = true;
        } else {
            self.consecutive_lost += 1;
            if self.consecutive_lost > self.lost_after && !self.tracking_lost {
                self.tracking_lost = true;
                self.eye_detected = false;
                debug!(
                    "Gaze tracking lost after {} low-confidence samples",
                    self.consecutive_lost
                );
            }
        }
        self.confidence_sum += sample.confidence;
        self.confidence_count += 1;
    }

    /// Mean confidence since the last reset.
    pub fn avg_confidence(&self) -> f32 {
        if self.confidence_count == 0 {
            0.0
        } else {
            self.confidence_sum / self.confidence_count as f32
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.min_confidence, self.lost_after);
    }
}

// ── Layer ───────────────────────────────────────────────────

/// Smoothing, indicator and health combined behind `on_raw_estimate`.
#[derive(Debug, Clone)]
pub struct SmoothingLayer {
    pub smoother: GazeSmoother,
    pub indicator: GazeIndicator,
    pub health: GazeHealth,
}

impl SmoothingLayer {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            smoother: GazeSmoother::new(config.alpha),
            indicator: GazeIndicator::new(config.opacity_boost),
            health: GazeHealth::new(config.min_confidence, config.lost_after_samples),
        }
    }

    /// Feed one raw sample; returns the indicator frame it produces.
    pub fn on_raw_estimate(&mut self, sample: &GazeSample, viewport: Viewport) -> IndicatorFrame {
        self.health.update(sample);
        let smoothed = self.smoother.smooth(sample.point());
        self.indicator.update(smoothed, sample.confidence, viewport)
    }

    pub fn position(&self) -> Option<ScreenPoint> {
        self.smoother.position()
    }

    /// Start a fresh tracking session.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.indicator.clear();
        self.health.reset();
    }
}
