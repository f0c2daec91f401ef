//! Control allocation
//!
//! Selection works on one group at a time so a page gets, for example, a whole
//! fader bank rather than faders scattered over the device:
//! 1. Collect free controls that satisfy the requested kind, per group
//! 2. Pick a group (see [`DeviceShadow::control_matches`])
//! 3. Sort its members row-major and apply the cardinality policy

use tracing::trace;

use super::{DeviceShadow, ShadowError};
use crate::surface::{ControlKind, ControlMapping};

/// Parameters of an allocation query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRequest {
    pub kind: ControlKind,
    /// Fall back to controls that declare they can stand in for `kind`
    pub allow_substitution: bool,
    /// Desired number of controls, None for "the whole best group"
    pub target: Option<usize>,
    /// Drop surplus controls instead of failing with `TooManyMatches`
    pub trim: bool,
    /// Fail on shortfall (and on surplus when not trimming)
    pub exact: bool,
    /// Fail with `NoMatches` instead of returning an empty list
    pub raise_on_zero: bool,
}

impl MatchRequest {
    pub fn new(kind: ControlKind) -> Self {
        Self {
            kind,
            allow_substitution: false,
            target: None,
            trim: true,
            exact: true,
            raise_on_zero: false,
        }
    }

    pub fn substitution(mut self, allow: bool) -> Self {
        self.allow_substitution = allow;
        self
    }

    pub fn target(mut self, count: usize) -> Self {
        self.target = Some(count);
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn raise_on_zero(mut self, raise: bool) -> Self {
        self.raise_on_zero = raise;
        self
    }
}

impl<T> DeviceShadow<T> {
    /// Find free controls for a request.
    ///
    /// Without a target the largest group wins; with a target the smallest
    /// group that still holds at least `target` controls wins, falling back to
    /// the largest group. Ties go to the group met first while scanning free
    /// controls in declaration order. Substitutes are only considered when
    /// exact kinds cannot satisfy the request on their own, and only replace
    /// the exact selection when they provide more controls.
    pub fn control_matches(
        &self,
        request: &MatchRequest,
    ) -> Result<Vec<ControlMapping>, ShadowError> {
        let mut selected = self.select_group(request.kind, false, request.target);

        // Substitutes only win when they yield strictly more controls
        if request.allow_substitution && selected.len() < request.target.unwrap_or(1) {
            let widened = self.select_group(request.kind, true, request.target);
            if widened.len() > selected.len() {
                selected = widened;
            }
        }

        // Stable: equal coordinates keep scan order
        selected.sort_by_key(|&i| self.shadows[i].coordinate());

        let found = selected.len();
        if let Some(wanted) = request.target {
            if request.exact && found < wanted {
                return Err(ShadowError::NotEnoughMatches {
                    kind: request.kind,
                    wanted,
                    found,
                });
            }
            if request.exact && !request.trim && found > wanted {
                return Err(ShadowError::TooManyMatches {
                    kind: request.kind,
                    wanted,
                    found,
                });
            }
            selected.truncate(wanted);
        }

        if selected.is_empty() && request.raise_on_zero {
            return Err(ShadowError::NoMatches { kind: request.kind });
        }

        trace!(
            "{}: {} {} control(s) for {:?}",
            self.name,
            selected.len(),
            request.kind,
            request.target
        );

        Ok(selected
            .into_iter()
            .map(|i| self.shadows[i].mapping())
            .collect())
    }

    /// Size of the group a target-less request would get
    pub fn num_control_matches(&self, kind: ControlKind, allow_substitution: bool) -> usize {
        let request = MatchRequest::new(kind).substitution(allow_substitution);
        self.control_matches(&request).map(|v| v.len()).unwrap_or(0)
    }

    /// Positions of the chosen group's members, in scan order
    fn select_group(
        &self,
        kind: ControlKind,
        allow_substitution: bool,
        target: Option<usize>,
    ) -> Vec<usize> {
        // Vec keeps first-encounter order for tie-breaking
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for &i in &self.free {
            let shadow = &self.shadows[i];
            if !shadow.can_stand_in_for(kind, allow_substitution) {
                continue;
            }
            match groups.iter_mut().find(|(g, _)| *g == shadow.group()) {
                Some((_, members)) => members.push(i),
                None => groups.push((shadow.group(), vec![i])),
            }
        }

        let chosen = target
            .and_then(|wanted| smallest_sufficient(&groups, wanted))
            .or_else(|| largest(&groups));

        match chosen {
            Some(index) => groups.swap_remove(index).1,
            None => Vec::new(),
        }
    }
}

/// Index of the first group with the greatest member count
fn largest(groups: &[(&str, Vec<usize>)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, (_, members)) in groups.iter().enumerate() {
        if best.map_or(true, |b| members.len() > groups[b].1.len()) {
            best = Some(index);
        }
    }
    best
}

/// Index of the first group with the smallest count that is at least `wanted`
fn smallest_sufficient(groups: &[(&str, Vec<usize>)], wanted: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, (_, members)) in groups.iter().enumerate() {
        if members.len() < wanted {
            continue;
        }
        if best.map_or(true, |b| members.len() < groups[b].1.len()) {
            best = Some(index);
        }
    }
    best
}
