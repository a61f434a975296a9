//! Screen-space primitives.

use serde::{Deserialize, Serialize};

/// A point in viewport pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: ScreenPoint) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Current viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn diagonal(&self) -> f32 {
        self.width.hypot(self.height)
    }

    /// Parse a "WxH" string.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.split_once('x')?;
        let w = w.trim().parse::<f32>().ok()?;
        let h = h.trim().parse::<f32>().ok()?;
        if w > 0.0 && h > 0.0 {
            Some(Self::new(w, h))
        } else {
            None
        }
    }

    /// Index of the 3×3 activity cell containing `p`, row-major.
    /// Points outside the viewport clamp to the nearest edge cell.
    pub fn grid_cell(&self, p: ScreenPoint) -> usize {
        let cell = |v: f32, extent: f32| -> usize {
            let idx = (v / (extent / 3.0)).floor();
            idx.clamp(0.0, 2.0) as usize
        };
        let row = cell(p.y, self.height);
        let col = cell(p.x, self.width);
        row * 3 + col
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1920.0, 1080.0)
    }
}
