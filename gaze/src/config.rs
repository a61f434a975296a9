//! Configuration for the gaze subsystem.
//!
//! Every section has defaults matching the shipped behaviour, so an empty
//! TOML document is a valid configuration:
//!
//! ```toml
//! [session]
//! dwell_time_ms = 1200
//! show_gaze_indicator = false
//!
//! [calibration]
//! countdown_secs = 3
//! accuracy_scale = 100.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GazeError, Result};

/// Allowed range for the dwell activation threshold.
pub const DWELL_TIME_RANGE_MS: std::ops::RangeInclusive<u64> = 500..=3000;

// ── Session ────────────────────────────────────────────────

/// User-adjustable settings that survive across calibration sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub dwell_time_ms: u64,
    pub show_gaze_indicator: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dwell_time_ms: 1000,
            show_gaze_indicator: true,
        }
    }
}

// ── Calibration ────────────────────────────────────────────

/// Calibration protocol timings and scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Interval between face-detection polls.
    pub face_poll_ms: u64,
    /// Hard limit for face detection.
    pub face_timeout_ms: u64,
    /// Time the target takes to travel to the next point.
    pub target_move_ms: u64,
    /// Countdown length, in ticks.
    pub countdown_secs: u32,
    /// Length of one countdown tick.
    pub countdown_tick_ms: u64,
    /// Delay between reporting the final score and handing back control.
    pub grace_ms: u64,
    /// Grid padding as a fraction of the viewport edge.
    pub edge_padding: f32,
    /// Jittered training samples submitted in addition to the point itself.
    pub jitter_samples: usize,
    /// Maximum jitter offset in pixels.
    pub jitter_radius_px: f32,
    /// Accuracy lost per screen diagonal of error.
    pub accuracy_scale: f32,
    /// Fixed seed for jitter generation; random when unset.
    pub seed: Option<u64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            face_poll_ms: 500,
            face_timeout_ms: 10_000,
            target_move_ms: 1000,
            countdown_secs: 3,
            countdown_tick_ms: 1000,
            grace_ms: 2000,
            edge_padding: 0.15,
            jitter_samples: 4,
            jitter_radius_px: 3.0,
            accuracy_scale: 100.0,
            seed: None,
        }
    }
}

impl CalibrationConfig {
    /// Scale every timing by `factor` (used by the simulator to compress a
    /// calibration run).  Durations never drop below 1 ms.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |ms: u64| ((ms as f64 * factor).round() as u64).max(1);
        Self {
            face_poll_ms: scale(self.face_poll_ms),
            face_timeout_ms: scale(self.face_timeout_ms),
            target_move_ms: scale(self.target_move_ms),
            countdown_tick_ms: scale(self.countdown_tick_ms),
            grace_ms: scale(self.grace_ms),
            ..self.clone()
        }
    }

    pub fn face_poll(&self) -> Duration {
        Duration::from_millis(self.face_poll_ms)
    }

    pub fn face_timeout(&self) -> Duration {
        Duration::from_millis(self.face_timeout_ms)
    }

    pub fn target_move(&self) -> Duration {
        Duration::from_millis(self.target_move_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

// ── Smoothing ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// EMA weight of the newest sample.
    pub alpha: f32,
    /// Added to sample confidence to get indicator opacity.
    pub opacity_boost: f32,
    /// Confidence below which a sample counts as "no eyes".
    pub min_confidence: f32,
    /// Consecutive low-confidence samples before tracking is considered lost.
    pub lost_after_samples: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            opacity_boost: 0.3,
            min_confidence: 0.1,
            lost_after_samples: 30,
        }
    }
}

// ── Dwell / estimator feed ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// Sampler period while tracking is live.
    pub sample_interval_ms: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Poll period used when wrapping a poll-only estimator.
    pub poll_interval_ms: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

// ── Top level ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    pub session: SessionSettings,
    pub calibration: CalibrationConfig,
    pub smoothing: SmoothingConfig,
    pub dwell: DwellConfig,
    pub estimator: EstimatorConfig,
}

impl GazeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| GazeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| GazeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "Gaze configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !DWELL_TIME_RANGE_MS.contains(&self.session.dwell_time_ms) {
            return Err(GazeError::DwellTimeOutOfRange(self.session.dwell_time_ms));
        }
        let cal = &self.calibration;
        if !(0.0..0.5).contains(&cal.edge_padding) {
            return Err(GazeError::Config(format!(
                "calibration.edge_padding must be in [0, 0.5), got {}",
                cal.edge_padding
            )));
        }
        if cal.jitter_samples < 4 {
            return Err(GazeError::Config(format!(
                "calibration.jitter_samples must be at least 4, got {}",
                cal.jitter_samples
            )));
        }
        if cal.countdown_secs == 0 || cal.countdown_tick_ms == 0 || cal.face_poll_ms == 0 {
            return Err(GazeError::Config(
                "calibration timings must be non-zero".to_string(),
            ));
        }
        if cal.accuracy_scale <= 0.0 {
            return Err(GazeError::Config(
                "calibration.accuracy_scale must be positive".to_string(),
            ));
        }
        if !(self.smoothing.alpha > 0.0 && self.smoothing.alpha <= 1.0) {
            return Err(GazeError::Config(format!(
                "smoothing.alpha must be in (0, 1], got {}",
                self.smoothing.alpha
            )));
        }
        if self.dwell.sample_interval_ms == 0 || self.estimator.poll_interval_ms == 0 {
            return Err(GazeError::Config(
                "sampler intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
