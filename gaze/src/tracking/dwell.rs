//! Dwell activation: sustained gaze on a clickable element clicks it.
//!
//! Sampled on a fixed tick.  Switching targets always restarts the timer,
//! and a target that has fired stays spent until the gaze leaves it.

use std::time::Instant;

use tracing::debug;

use super::geometry::ScreenPoint;
use super::surface::{TargetId, UiSurface};
use crate::clock::elapsed_ms;

/// Element currently under sustained gaze.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DwellState {
    pub target: Option<TargetId>,
    /// `None` with a target set means the target already fired.
    pub started: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DwellEvent {
    /// Gaze moved onto a new clickable target; the timer restarted.
    Entered { target: TargetId },
    /// Dwell threshold reached and the target was clicked.
    Activated {
        target: TargetId,
        at: ScreenPoint,
        dwell_ms: u64,
    },
    /// Gaze left the target for nothing clickable.
    Left { target: TargetId },
}

#[derive(Debug, Default)]
pub struct DwellEngine {
    state: DwellState,
    activation_count: u64,
}

impl DwellEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DwellState {
        self.state
    }

    pub fn activation_count(&self) -> u64 {
        self.activation_count
    }

    /// One sampler tick against the smoothed gaze position.
    pub fn tick<U: UiSurface + ?Sized>(
        &mut self,
        now: Instant,
        gaze: Option<ScreenPoint>,
        dwell_time_ms: u64,
        ui: &mut U,
    ) -> Option<DwellEvent> {
        let point = gaze?;

        let Some(hit) = ui.clickable_at(point) else {
            return self.clear(ui).map(|target| DwellEvent::Left { target });
        };

        if self.state.target != Some(hit) {
            if let Some(old) = self.state.target {
                ui.set_hover(old, false);
            }
            ui.set_hover(hit, true);
            self.state = DwellState {
                target: Some(hit),
                started: Some(now),
            };
            debug!(target = %hit, "Dwell started");
            return Some(DwellEvent::Entered { target: hit });
        }

        let started = self.state.started?;
        let dwell_ms = elapsed_ms(now, started);
        if dwell_ms < dwell_time_ms {
            return None;
        }

        self.state.started = None;
        match ui.activate(hit) {
            Ok(()) => {
                ui.ripple(point);
                self.activation_count += 1;
                debug!(target = %hit, dwell_ms, "Dwell activation");
                Some(DwellEvent::Activated {
                    target: hit,
                    at: point,
                    dwell_ms,
                })
            }
            Err(e) => {
                // Vanished between hit-test and click: same as not clickable.
                debug!("Dwell target dropped: {}", e);
                self.clear(ui);
                None
            }
        }
    }

    /// Drop hover style and forget the target.  Returns the target that was
    /// being tracked, if any.
    pub fn clear<U: UiSurface + ?Sized>(&mut self, ui: &mut U) -> Option<TargetId> {
        let old = self.state.target.take();
        if let Some(old) = old {
            ui.set_hover(old, false);
        }
        self.state = DwellState::default();
        old
    }
}
