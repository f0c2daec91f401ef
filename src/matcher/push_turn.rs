//! Push-and-turn encoder matcher
//!
//! Many encoders have a push switch. This matcher reports turns on one of two
//! controls depending on whether the encoder is held down, and reports a click
//! on the push control only when the encoder is released without having been
//! turned in between.

use tracing::debug;

use super::ControlMatcher;
use crate::surface::{ControlEvent, ControlSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushState {
    Released,
    Held { turned: bool },
}

/// Matcher with a press/turn state machine
#[derive(Debug)]
pub struct PushTurnMatcher {
    push: ControlSurface,
    turn: ControlSurface,
    pushed_turn: ControlSurface,
    state: PushState,
}

impl PushTurnMatcher {
    /// `push` must recognize press and release messages (its strategy decides
    /// which is which: a value above zero is a press). `turn` and
    /// `pushed_turn` normally share the same pattern.
    pub fn new(push: ControlSurface, turn: ControlSurface, pushed_turn: ControlSurface) -> Self {
        Self {
            push,
            turn,
            pushed_turn,
            state: PushState::Released,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self.state, PushState::Held { .. })
    }
}

impl ControlMatcher for PushTurnMatcher {
    fn match_event(&mut self, raw: &[u8]) -> Option<ControlEvent> {
        if let Some(extracted) = self.push.pattern().matches(raw) {
            let pressed = self.push.strategy().value(&extracted.message, 0.0) > 0.0;
            let channel = extracted.channel;

            return match (self.state, pressed) {
                (PushState::Released, true) => {
                    self.state = PushState::Held { turned: false };
                    None
                }
                (PushState::Held { turned }, false) => {
                    self.state = PushState::Released;
                    if turned {
                        None
                    } else {
                        debug!("{} clicked", self.push.name());
                        Some(self.push.emit(1.0, channel))
                    }
                }
                // Repeated press or stray release: state is unchanged
                _ => None,
            };
        }

        match self.state {
            PushState::Held { .. } => {
                let event = self.pushed_turn.try_match(raw)?;
                self.state = PushState::Held { turned: true };
                Some(event)
            }
            PushState::Released => self.turn.try_match(raw),
        }
    }

    fn controls(&self) -> Vec<&ControlSurface> {
        vec![&self.push, &self.turn, &self.pushed_turn]
    }
}
