//! Control surfaces
//!
//! A control surface is one abstract physical control (a fader, a button, a
//! jog wheel...) that knows how to recognize its own messages. Controls are
//! created once when a device's control set is declared and live for the
//! whole session; only their last value and tweak time change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use anyhow::bail;

use crate::pattern::EventPattern;
use crate::strategy::ValueStrategy;

/// Concrete kind of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Button,
    Fader,
    Knob,
    Encoder,
    #[serde(alias = "pad")]
    DrumPad,
    #[serde(alias = "jog")]
    JogWheel,
    PitchWheel,
    ModWheel,
    Key,
    TouchStrip,
    Pedal,
}

impl ControlKind {
    pub const ALL: [ControlKind; 11] = [
        ControlKind::Button,
        ControlKind::Fader,
        ControlKind::Knob,
        ControlKind::Encoder,
        ControlKind::DrumPad,
        ControlKind::JogWheel,
        ControlKind::PitchWheel,
        ControlKind::ModWheel,
        ControlKind::Key,
        ControlKind::TouchStrip,
        ControlKind::Pedal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Button => "button",
            ControlKind::Fader => "fader",
            ControlKind::Knob => "knob",
            ControlKind::Encoder => "encoder",
            ControlKind::DrumPad => "drum_pad",
            ControlKind::JogWheel => "jog_wheel",
            ControlKind::PitchWheel => "pitch_wheel",
            ControlKind::ModWheel => "mod_wheel",
            ControlKind::Key => "key",
            ControlKind::TouchStrip => "touch_strip",
            ControlKind::Pedal => "pedal",
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "pad" => return Ok(ControlKind::DrumPad),
            "jog" => return Ok(ControlKind::JogWheel),
            _ => {}
        }
        match ControlKind::ALL.iter().find(|k| k.as_str() == s) {
            Some(kind) => Ok(*kind),
            None => bail!("Unknown control kind: {}", s),
        }
    }
}

/// Grid position of a control, ordered row-major
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub row: u16,
    pub col: u16,
}

impl Coordinate {
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Process-wide counter backing control handles
static NEXT_CONTROL_ID: AtomicU32 = AtomicU32::new(1);

/// Stable handle of a control surface, assigned at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(u32);

impl ControlId {
    fn next() -> Self {
        ControlId(NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity-keyed reference to a control surface.
///
/// Equality and hashing only look at the control, never at a value, so a
/// mapping can key a binding table while events carry fresh values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlMapping {
    control: ControlId,
}

impl ControlMapping {
    pub fn new(control: ControlId) -> Self {
        Self { control }
    }

    pub fn control(&self) -> ControlId {
        self.control
    }
}

impl From<&ControlSurface> for ControlMapping {
    fn from(surface: &ControlSurface) -> Self {
        surface.mapping()
    }
}

impl fmt::Display for ControlMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapping{}", self.control)
    }
}

/// One successful match of a raw message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    pub mapping: ControlMapping,
    pub value: f32,
    pub channel: u8,
    pub handled: bool,
}

impl ControlEvent {
    pub fn new(mapping: ControlMapping, value: f32, channel: u8) -> Self {
        Self {
            mapping,
            value,
            channel,
            handled: false,
        }
    }
}

/// Abstract control wrapping a pattern and a value strategy
#[derive(Debug)]
pub struct ControlSurface {
    id: ControlId,
    name: String,
    pattern: EventPattern,
    strategy: ValueStrategy,
    kind: ControlKind,
    coordinate: Coordinate,
    group: String,
    priority: i32,
    substitutable_for: BTreeSet<ControlKind>,
    last_value: f32,
    last_tweaked_at: Option<Instant>,
}

impl ControlSurface {
    /// Create a control with default strategy, origin coordinate and empty group
    pub fn new(name: impl Into<String>, kind: ControlKind, pattern: EventPattern) -> Self {
        Self {
            id: ControlId::next(),
            name: name.into(),
            pattern,
            strategy: ValueStrategy::default(),
            kind,
            coordinate: Coordinate::default(),
            group: String::new(),
            priority: 0,
            substitutable_for: BTreeSet::new(),
            last_value: 0.0,
            last_tweaked_at: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ValueStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn at(mut self, row: u16, col: u16) -> Self {
        self.coordinate = Coordinate::new(row, col);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare which other kinds this control may stand in for
    pub fn substitutes_for(mut self, kinds: impl IntoIterator<Item = ControlKind>) -> Self {
        self.substitutable_for.extend(kinds);
        self.substitutable_for.remove(&self.kind);
        self
    }

    pub fn id(&self) -> ControlId {
        self.id
    }

    pub fn mapping(&self) -> ControlMapping {
        ControlMapping::new(self.id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    pub fn strategy(&self) -> &ValueStrategy {
        &self.strategy
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn substitutable_for(&self) -> &BTreeSet<ControlKind> {
        &self.substitutable_for
    }

    pub fn last_value(&self) -> f32 {
        self.last_value
    }

    pub fn last_tweaked_at(&self) -> Option<Instant> {
        self.last_tweaked_at
    }

    /// Whether this control satisfies a request for `kind`
    pub fn can_stand_in_for(&self, kind: ControlKind, allow_substitution: bool) -> bool {
        self.kind == kind || (allow_substitution && self.substitutable_for.contains(&kind))
    }

    /// Test the pattern without touching any state
    pub fn recognizes(&self, raw: &[u8]) -> bool {
        self.pattern.matches(raw).is_some()
    }

    /// Match a message and, on success, record the new value
    pub fn try_match(&mut self, raw: &[u8]) -> Option<ControlEvent> {
        let extracted = self.pattern.matches(raw)?;
        let value = self.strategy.value(&extracted.message, self.last_value);
        let channel = self.strategy.channel(&extracted.message);

        self.last_value = value;
        self.last_tweaked_at = Some(Instant::now());

        Some(ControlEvent::new(self.mapping(), value, channel))
    }

    /// Emit an event for this control with an explicit value.
    ///
    /// Used by custom matchers that synthesize events from a state machine.
    pub fn emit(&mut self, value: f32, channel: u8) -> ControlEvent {
        self.last_value = value.clamp(0.0, 1.0);
        self.last_tweaked_at = Some(Instant::now());
        ControlEvent::new(self.mapping(), self.last_value, channel)
    }
}
