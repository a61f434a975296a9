//! Gaze Assist: webcam gaze tracking with calibration, smoothing and
//! dwell-to-click activation.
//!
//! The library owns the interaction logic around a black-box
//! point-of-regard estimator.  The `gaze-sim` binary in `main.rs` drives it
//! end to end against a simulated estimator.

pub mod clock;
pub mod config;
pub mod error;
pub mod input_source;
pub mod runtime;
pub mod tracking;

pub use config::GazeConfig;
pub use error::{GazeError, Result};
