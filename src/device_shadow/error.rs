//! Allocation and binding errors

use thiserror::Error;

use crate::surface::{ControlKind, ControlMapping};

/// Recoverable allocation/binding failures.
///
/// None of these leave a device shadow in a partially modified state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowError {
    #[error("No {kind} controls available")]
    NoMatches { kind: ControlKind },

    #[error("Not enough {kind} controls: wanted {wanted}, found {found}")]
    NotEnoughMatches {
        kind: ControlKind,
        wanted: usize,
        found: usize,
    },

    #[error("Too many {kind} controls: wanted {wanted}, found {found}")]
    TooManyMatches {
        kind: ControlKind,
        wanted: usize,
        found: usize,
    },

    #[error("Control {control} is already bound")]
    ControlNotFree { control: ControlMapping },

    #[error("Only {got} argument sets for {expected} controls")]
    ArgsLengthMismatch { expected: usize, got: usize },

    #[error("Control {control} is not part of this device shadow")]
    UnknownControl { control: ControlMapping },
}
