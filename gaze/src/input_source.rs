//! Scripted input for the simulator and integration tests.
//!
//! An `InputEvent` sequence mixes raw gaze samples, waits and user
//! commands, so a whole enable → calibrate → dwell-click scenario can be
//! written down once and replayed deterministically.  Scripts can also be
//! loaded from JSON, one event object per array element:
//!
//! ```json
//! [{"type": "toggle"}, {"type": "wait", "ms": 500},
//!  {"type": "gaze", "x": 200.0, "y": 130.0, "confidence": 0.9}]
//! ```

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GazeError, Result};

/// One scripted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InputEvent {
    /// Raw estimate as the estimator feed would deliver it.
    Gaze { x: f32, y: f32, confidence: f32 },
    /// Let time pass.
    Wait { ms: u64 },
    Toggle,
    Recalibrate,
    CancelCalibration,
    RetryCalibration,
    /// Accept the current calibration point early.
    AcceptPoint { index: usize },
    SetDwellTime { ms: u64 },
    ToggleIndicator,
}

/// Source of scripted input events.
pub trait InputProvider: Send {
    /// Get the next input event, if any.
    fn next_event(&mut self) -> Option<InputEvent>;
    /// Whether there are more events to deliver.
    fn has_events(&self) -> bool;
}

/// Delivers events from a pre-defined queue.
pub struct ScriptedInputProvider {
    events: VecDeque<InputEvent>,
}

impl ScriptedInputProvider {
    pub fn new(events: Vec<InputEvent>) -> Self {
        Self {
            events: VecDeque::from(events),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let events: Vec<InputEvent> = serde_json::from_str(json)
            .map_err(|e| GazeError::Config(format!("invalid input script: {}", e)))?;
        Ok(Self::new(events))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| GazeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Number of remaining events.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl InputProvider for ScriptedInputProvider {
    fn next_event(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Records every event handed out by an inner provider.
pub struct RecordingProvider<P: InputProvider> {
    inner: P,
    recorded: Vec<InputEvent>,
}

impl<P: InputProvider> RecordingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }

    pub fn recorded(&self) -> &[InputEvent] {
        &self.recorded
    }

    pub fn into_recorded(self) -> Vec<InputEvent> {
        self.recorded
    }

    /// Serialize what was played so far, in the format `from_json` reads.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.recorded)
            .map_err(|e| GazeError::Config(format!("cannot serialize input script: {}", e)))
    }
}

impl<P: InputProvider> InputProvider for RecordingProvider<P> {
    fn next_event(&mut self) -> Option<InputEvent> {
        let event = self.inner.next_event()?;
        self.recorded.push(event.clone());
        Some(event)
    }

    fn has_events(&self) -> bool {
        self.inner.has_events()
    }
}
