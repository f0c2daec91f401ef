//! Control shadows and output sinks
//!
//! A shadow is a page's private copy of one control's display state. Pages
//! write colors, annotations and values into their shadows freely; nothing
//! reaches the hardware until the shadow is applied to an [`OutputSink`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::surface::{ControlId, ControlKind, ControlMapping, ControlSurface, Coordinate};

/// RGB color of a control's light
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(&self) -> bool {
        *self == Color::OFF
    }

    /// Brightness as a 7-bit velocity for single-color LEDs
    pub fn to_velocity(&self) -> u8 {
        let max = self.r.max(self.g).max(self.b);
        max >> 1
    }

    /// Parse `#RRGGBB` or one of the named constants
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            let bytes = hex::decode(hex).ok()?;
            if let [r, g, b] = bytes[..] {
                return Some(Color::rgb(r, g, b));
            }
            return None;
        }
        match text.to_ascii_lowercase().as_str() {
            "off" | "black" => Some(Color::OFF),
            "white" => Some(Color::WHITE),
            "red" => Some(Color::RED),
            "green" => Some(Color::GREEN),
            "blue" => Some(Color::BLUE),
            "yellow" => Some(Color::YELLOW),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Display fields a page manages for one control
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    pub color: Color,
    pub annotation: Option<String>,
    /// Last value seen or set by the page
    pub value: Option<f32>,
}

/// Destination of applied shadows (the real device)
pub trait OutputSink {
    fn paint(&mut self, control: ControlId, state: &DisplayState);
}

/// Per-page mutable view of one control's display state
#[derive(Debug, Clone)]
pub struct ControlShadow {
    mapping: ControlMapping,
    name: String,
    kind: ControlKind,
    group: String,
    coordinate: Coordinate,
    substitutable_for: BTreeSet<ControlKind>,
    pub state: DisplayState,
}

impl ControlShadow {
    /// Snapshot the static fields of a control with a blank display state
    pub fn of(control: &ControlSurface) -> Self {
        Self {
            mapping: control.mapping(),
            name: control.name().to_string(),
            kind: control.kind(),
            group: control.group().to_string(),
            coordinate: control.coordinate(),
            substitutable_for: control.substitutable_for().clone(),
            state: DisplayState::default(),
        }
    }

    pub fn mapping(&self) -> ControlMapping {
        self.mapping
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// Same predicate as [`ControlSurface::can_stand_in_for`]
    pub fn can_stand_in_for(&self, kind: ControlKind, allow_substitution: bool) -> bool {
        self.kind == kind || (allow_substitution && self.substitutable_for.contains(&kind))
    }

    pub fn set_color(&mut self, color: Color) {
        self.state.color = color;
    }

    pub fn set_annotation(&mut self, annotation: impl Into<String>) {
        self.state.annotation = Some(annotation.into());
    }

    pub fn clear_annotation(&mut self) {
        self.state.annotation = None;
    }

    pub fn set_value(&mut self, value: f32) {
        self.state.value = Some(value.clamp(0.0, 1.0));
    }

    pub fn reset(&mut self) {
        self.state = DisplayState::default();
    }

    /// Write this shadow through to the device
    pub fn apply(&self, sink: &mut dyn OutputSink) {
        sink.paint(self.mapping.control(), &self.state);
    }
}

/// Sink that only logs what would be painted
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn paint(&mut self, control: ControlId, state: &DisplayState) {
        debug!(
            "paint {} color {} annotation {:?} value {:?}",
            control, state.color, state.annotation, state.value
        );
    }
}

/// Sink that keeps the last painted state per control and counts writes
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub painted: HashMap<ControlId, DisplayState>,
    pub writes: Vec<ControlId>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a control was painted
    pub fn write_count(&self, control: ControlId) -> usize {
        self.writes.iter().filter(|c| **c == control).count()
    }

    pub fn clear(&mut self) {
        self.painted.clear();
        self.writes.clear();
    }
}

impl OutputSink for RecordingSink {
    fn paint(&mut self, control: ControlId, state: &DisplayState) {
        self.painted.insert(control, state.clone());
        self.writes.push(control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::EventPattern;

    #[test]
    fn test_color_parsing() {
        assert_eq!(Color::parse("#FF8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(Color::parse("Red"), Some(Color::RED));
        assert_eq!(Color::parse("#FF80"), None);
        assert_eq!(Color::parse("mauve"), None);
        assert_eq!(Color::RED.to_velocity(), 127);
        assert!(Color::default().is_off());
    }

    #[test]
    fn test_shadow_is_independent_of_surface() {
        let control = ControlSurface::new("pad1", ControlKind::DrumPad, EventPattern::note(36, None))
            .in_group("pads")
            .at(1, 2);

        let mut a = ControlShadow::of(&control);
        let b = ControlShadow::of(&control);
        a.set_color(Color::GREEN);
        a.set_annotation("Kick");
        a.set_value(1.5);

        assert_eq!(a.mapping(), b.mapping());
        assert_eq!(a.group(), "pads");
        assert_eq!(a.coordinate(), Coordinate::new(1, 2));
        assert_eq!(a.state.value, Some(1.0));
        assert_eq!(b.state, DisplayState::default());
    }

    #[test]
    fn test_apply_writes_through() {
        let control = ControlSurface::new("b1", ControlKind::Button, EventPattern::note(1, None));
        let mut shadow = ControlShadow::of(&control);
        shadow.set_color(Color::BLUE);

        let mut sink = RecordingSink::new();
        shadow.apply(&mut sink);

        assert_eq!(sink.write_count(control.id()), 1);
        assert_eq!(sink.painted[&control.id()].color, Color::BLUE);
    }
}
