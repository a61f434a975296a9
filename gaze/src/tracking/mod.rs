//! Gaze tracking: estimator adapter, calibration, smoothing, dwell
//! activation and the session that ties them together.

pub mod calibration;
pub mod dwell;
pub mod estimator;
pub mod geometry;
pub mod session;
pub mod smoothing;
pub mod surface;

pub use calibration::{CalibrationController, CalibrationEvent, CalibrationStep};
pub use dwell::{DwellEngine, DwellEvent, DwellState};
pub use estimator::{
    EstimateSink, EstimatorProbe, EstimatorState, GazeEstimator, GazeSample, PollEstimator,
    PollingShim, SimulatedEstimator, SimulatedHandle, SimulatedMode,
};
pub use geometry::{ScreenPoint, Viewport};
pub use session::{GazeSession, GazeStatus, SessionEvent};
pub use smoothing::{GazeHealth, GazeIndicator, GazeSmoother, IndicatorFrame, SmoothingLayer};
pub use surface::{ElementKind, ElementTree, HitTester, Rect, TargetId, UiEffects, UiSurface};
