//! UI capabilities the dwell engine needs, plus `ElementTree`, an in-memory
//! retained element tree that implements them.
//!
//! The engine never walks a real UI tree.  It asks a `HitTester` for the
//! clickable element under a point and drives hover, activation and
//! feedback through `UiEffects`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::geometry::ScreenPoint;
use super::smoothing::IndicatorFrame;
use crate::error::{GazeError, Result};

/// Opaque handle of a UI element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u64);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait HitTester {
    /// Clickable element under `point`: the topmost element if it is
    /// clickable itself, otherwise its nearest clickable ancestor.
    fn clickable_at(&self, point: ScreenPoint) -> Option<TargetId>;
}

pub trait UiEffects {
    fn set_hover(&mut self, target: TargetId, hovered: bool);

    /// Synthetic click.  Fails with `GazeError::TargetGone` if the element
    /// no longer exists.
    fn activate(&mut self, target: TargetId) -> Result<()>;

    /// Radial activation feedback centred on the gaze point.
    fn ripple(&mut self, at: ScreenPoint);

    /// Draw the gaze dot, or hide it with `None`.
    fn render_indicator(&mut self, frame: Option<IndicatorFrame>);
}

/// Everything the session needs from the host UI.
pub trait UiSurface: HitTester + UiEffects {}

impl<T: HitTester + UiEffects> UiSurface for T {}

// ── Element tree ───────────────────────────────────────────

/// Axis-aligned element bounds in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, p: ScreenPoint) -> bool {
        p.x >= self.x && p.x <= self.x + self.w && p.y >= self.y && p.y <= self.y + self.h
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Button,
    Link,
    Container,
    Text,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Link => "link",
            Self::Container => "container",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub id: TargetId,
    pub kind: ElementKind,
    pub label: String,
    pub rect: Rect,
    pub parent: Option<TargetId>,
    pub role: Option<String>,
    /// Explicit "clickable" marker set by the page.
    pub clickable_marker: bool,
    pub disabled: bool,
}

impl Element {
    /// Whether this element on its own accepts a click.
    pub fn is_clickable(&self) -> bool {
        if self.disabled {
            return false;
        }
        matches!(self.kind, ElementKind::Button | ElementKind::Link)
            || self.role.as_deref() == Some("button")
            || self.clickable_marker
    }
}

/// Retained element tree with recorded effects.  Later insertions paint on
/// top of earlier ones.
#[derive(Debug, Default)]
pub struct ElementTree {
    elements: BTreeMap<TargetId, Element>,
    paint_order: Vec<TargetId>,
    next_id: u64,
    hovered: BTreeSet<TargetId>,
    activations: Vec<TargetId>,
    ripples: Vec<ScreenPoint>,
    indicator: Option<IndicatorFrame>,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        kind: ElementKind,
        label: &str,
        rect: Rect,
        parent: Option<TargetId>,
    ) -> TargetId {
        self.next_id += 1;
        let id = TargetId(self.next_id);
        self.elements.insert(
            id,
            Element {
                id,
                kind,
                label: label.to_string(),
                rect,
                parent,
                role: None,
                clickable_marker: false,
                disabled: false,
            },
        );
        self.paint_order.push(id);
        id
    }

    pub fn set_role(&mut self, id: TargetId, role: &str) {
        if let Some(el) = self.elements.get_mut(&id) {
            el.role = Some(role.to_string());
        }
    }

    pub fn mark_clickable(&mut self, id: TargetId) {
        if let Some(el) = self.elements.get_mut(&id) {
            el.clickable_marker = true;
        }
    }

    pub fn set_disabled(&mut self, id: TargetId, disabled: bool) {
        if let Some(el) = self.elements.get_mut(&id) {
            el.disabled = disabled;
        }
    }

    /// Remove an element and all of its descendants.
    pub fn remove(&mut self, id: TargetId) {
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i];
            doomed.extend(
                self.elements
                    .values()
                    .filter(|el| el.parent == Some(current))
                    .map(|el| el.id),
            );
            i += 1;
        }
        for id in doomed {
            self.elements.remove(&id);
            self.hovered.remove(&id);
        }
        let elements = &self.elements;
        self.paint_order.retain(|id| elements.contains_key(id));
    }

    pub fn get(&self, id: TargetId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Topmost element containing `point`, clickable or not.
    pub fn element_at(&self, point: ScreenPoint) -> Option<TargetId> {
        self.paint_order
            .iter()
            .rev()
            .copied()
            .find(|id| self.elements.get(id).is_some_and(|el| el.rect.contains(point)))
    }

    /// Walk from `id` up to the first clickable element.
    pub fn clickable_ancestor(&self, id: TargetId) -> Option<TargetId> {
        let mut current = Some(id);
        while let Some(cid) = current {
            let el = self.elements.get(&cid)?;
            if el.is_clickable() {
                return Some(cid);
            }
            current = el.parent;
        }
        None
    }

    pub fn is_hovered(&self, id: TargetId) -> bool {
        self.hovered.contains(&id)
    }

    pub fn hovered(&self) -> Vec<TargetId> {
        self.hovered.iter().copied().collect()
    }

    pub fn activations(&self) -> &[TargetId] {
        &self.activations
    }

    pub fn ripples(&self) -> &[ScreenPoint] {
        &self.ripples
    }

    pub fn indicator(&self) -> Option<IndicatorFrame> {
        self.indicator
    }
}

impl HitTester for ElementTree {
    fn clickable_at(&self, point: ScreenPoint) -> Option<TargetId> {
        self.element_at(point)
            .and_then(|id| self.clickable_ancestor(id))
    }
}

impl UiEffects for ElementTree {
    fn set_hover(&mut self, target: TargetId, hovered: bool) {
        if hovered && self.elements.contains_key(&target) {
            self.hovered.insert(target);
        } else {
            self.hovered.remove(&target);
        }
    }

    fn activate(&mut self, target: TargetId) -> Result<()> {
        let el = self
            .elements
            .get(&target)
            .ok_or(GazeError::TargetGone(target.0))?;
        if !el.is_clickable() {
            return Err(GazeError::TargetGone(target.0));
        }
        debug!(target = %target, kind = el.kind.as_str(), label = %el.label, "Element activated");
        self.activations.push(target);
        Ok(())
    }

    fn ripple(&mut self, at: ScreenPoint) {
        self.ripples.push(at);
    }

    fn render_indicator(&mut self, frame: Option<IndicatorFrame>) {
        self.indicator = frame;
    }
}
