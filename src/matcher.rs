//! Control matchers
//!
//! A matcher turns a raw message into an event for exactly one known control.
//! Matchers compose as a tree: a [`BasicMatcher`] tries its own controls by
//! priority and then each nested sub-matcher in insertion order.
//!
//! Not matching is the normal outcome for unrecognized input and is reported
//! as `None`, never as an error.

pub mod push_turn;

pub use push_turn::PushTurnMatcher;

use tracing::trace;

use crate::message::describe;
use crate::surface::{ControlEvent, ControlId, ControlSurface};

/// Anything that can recognize messages for a fixed set of controls
pub trait ControlMatcher {
    /// Match a raw message, updating the matched control's value
    fn match_event(&mut self, raw: &[u8]) -> Option<ControlEvent>;

    /// Every control reachable from this matcher, sub-matchers included
    fn controls(&self) -> Vec<&ControlSurface>;

    /// Controls in a group, or all controls when `group` is None
    fn controls_in(&self, group: Option<&str>) -> Vec<&ControlSurface> {
        self.controls()
            .into_iter()
            .filter(|c| group.map_or(true, |g| c.group() == g))
            .collect()
    }

    /// Group labels in first-seen order
    fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        for control in self.controls() {
            if !groups.iter().any(|g| g == control.group()) {
                groups.push(control.group().to_string());
            }
        }
        groups
    }

    fn control(&self, id: ControlId) -> Option<&ControlSurface> {
        self.controls().into_iter().find(|c| c.id() == id)
    }

    /// Periodic refresh between messages
    fn tick(&mut self) {}
}

/// Priority-ordered list of controls plus nested matchers
#[derive(Default)]
pub struct BasicMatcher {
    /// Declaration order, which is what allocation and apply walk
    controls: Vec<ControlSurface>,
    /// Indices into `controls` by descending priority, declaration order
    /// within a priority
    by_priority: Vec<usize>,
    sub_matchers: Vec<Box<dyn ControlMatcher>>,
}

impl BasicMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a control. Equal priorities keep insertion order.
    pub fn add_control(&mut self, control: ControlSurface) {
        let slot = self
            .by_priority
            .iter()
            .position(|&i| self.controls[i].priority() < control.priority())
            .unwrap_or(self.by_priority.len());
        self.by_priority.insert(slot, self.controls.len());
        self.controls.push(control);
    }

    pub fn with_control(mut self, control: ControlSurface) -> Self {
        self.add_control(control);
        self
    }

    pub fn add_sub_matcher(&mut self, matcher: impl ControlMatcher + 'static) {
        self.sub_matchers.push(Box::new(matcher));
    }

    pub fn with_sub_matcher(mut self, matcher: impl ControlMatcher + 'static) -> Self {
        self.add_sub_matcher(matcher);
        self
    }

    /// Number of direct controls
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty() && self.sub_matchers.is_empty()
    }
}

impl ControlMatcher for BasicMatcher {
    fn match_event(&mut self, raw: &[u8]) -> Option<ControlEvent> {
        for &i in &self.by_priority {
            let control = &mut self.controls[i];
            if let Some(event) = control.try_match(raw) {
                trace!(
                    "Matched {} -> {} ({}) value {:.3}",
                    describe(raw),
                    control.name(),
                    control.kind(),
                    event.value
                );
                return Some(event);
            }
        }

        self.sub_matchers
            .iter_mut()
            .find_map(|matcher| matcher.match_event(raw))
    }

    fn controls(&self) -> Vec<&ControlSurface> {
        let mut all: Vec<&ControlSurface> = self.controls.iter().collect();
        for matcher in &self.sub_matchers {
            all.extend(matcher.controls());
        }
        all
    }

    fn tick(&mut self) {
        for matcher in self.sub_matchers.iter_mut() {
            matcher.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::EventPattern;
    use crate::surface::ControlKind;

    fn cc(name: &str, number: u8) -> ControlSurface {
        ControlSurface::new(name, ControlKind::Knob, EventPattern::control_change(number, None))
    }

    #[test]
    fn test_no_match_is_none() {
        let mut matcher = BasicMatcher::new().with_control(cc("k1", 1));
        assert!(matcher.match_event(&[0xB0, 2, 10]).is_none());
        assert!(matcher.match_event(&[]).is_none());
    }

    #[test]
    fn test_priority_precedence() {
        let low = cc("low", 7).with_priority(1);
        let high = ControlSurface::new(
            "high",
            ControlKind::Fader,
            EventPattern::parse("bytes:B? 07").unwrap(),
        )
        .with_priority(5);
        let low_id = low.id();
        let high_mapping = high.mapping();

        let mut matcher = BasicMatcher::new().with_control(low).with_control(high);
        let event = matcher.match_event(&[0xB0, 7, 127]).unwrap();

        assert_eq!(event.mapping, high_mapping);
        let low = matcher.control(low_id).unwrap();
        assert_eq!(low.last_value(), 0.0);
        assert!(low.last_tweaked_at().is_none());
    }

    #[test]
    fn test_ties_resolve_to_insertion_order() {
        let first = cc("first", 7);
        let second = cc("second", 7);
        let first_mapping = first.mapping();

        let mut matcher = BasicMatcher::new().with_control(first).with_control(second);
        let event = matcher.match_event(&[0xB0, 7, 1]).unwrap();
        assert_eq!(event.mapping, first_mapping);
    }

    #[test]
    fn test_direct_controls_before_sub_matchers() {
        let nested_control = cc("nested", 7).with_priority(100);
        let direct = cc("direct", 7).with_priority(-10);
        let direct_mapping = direct.mapping();

        let nested = BasicMatcher::new().with_control(nested_control).with_control(cc("only_nested", 9));
        let mut matcher = BasicMatcher::new()
            .with_control(direct)
            .with_sub_matcher(nested);

        assert_eq!(matcher.match_event(&[0xB0, 7, 1]).unwrap().mapping, direct_mapping);
        assert!(matcher.match_event(&[0xB0, 9, 1]).is_some());
    }

    #[test]
    fn test_determinism() {
        let mut matcher = BasicMatcher::new()
            .with_control(cc("a", 1))
            .with_control(cc("b", 2));
        let first = matcher.match_event(&[0xB3, 2, 64]);
        let second = matcher.match_event(&[0xB3, 2, 64]);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_flattened_controls_and_groups() {
        let nested = BasicMatcher::new()
            .with_control(cc("n1", 3).in_group("bank_b"))
            .with_control(cc("n2", 4).in_group("bank_a"));
        let matcher = BasicMatcher::new()
            .with_control(cc("d1", 1).in_group("bank_a"))
            .with_control(cc("d2", 2).in_group("bank_c"))
            .with_sub_matcher(nested);

        assert_eq!(matcher.controls().len(), 4);
        assert_eq!(matcher.groups(), vec!["bank_a", "bank_c", "bank_b"]);

        let names: Vec<&str> = matcher
            .controls_in(Some("bank_a"))
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["d1", "n2"]);
        assert_eq!(matcher.controls_in(None).len(), 4);
    }

    #[test]
    fn test_controls_keep_declaration_order() {
        let matcher = BasicMatcher::new()
            .with_control(cc("zeta", 1).in_group("zeta"))
            .with_control(cc("alpha", 2).in_group("alpha").with_priority(5))
            .with_control(cc("mid", 3).in_group("mid").with_priority(2));

        let names: Vec<&str> = matcher.controls().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(matcher.groups(), vec!["zeta", "alpha", "mid"]);
    }
}
