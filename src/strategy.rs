//! Value strategies
//!
//! A strategy turns a matched message into a normalized value in `[0, 1]`.
//! Relative strategies need the previous value to apply a delta; that value is
//! owned by the control surface and passed in on every call.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::message::{channel_of, combine_14bit};

/// Encoding used by relative (endless) encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelativeEncoding {
    /// 1..=63 clockwise, 65..=127 counter-clockwise (127 = -1)
    TwosComplement,
    /// Bit 6 is the sign, bits 0-5 the magnitude
    SignMagnitude,
    /// 64 is zero, above is clockwise
    BinaryOffset,
}

impl RelativeEncoding {
    /// Signed step count encoded in a data byte
    pub fn delta(self, byte: u8) -> i32 {
        let byte = (byte & 0x7F) as i32;
        match self {
            RelativeEncoding::TwosComplement => {
                if byte < 64 {
                    byte
                } else {
                    byte - 128
                }
            }
            RelativeEncoding::SignMagnitude => {
                let magnitude = byte & 0x3F;
                if byte & 0x40 != 0 {
                    -magnitude
                } else {
                    magnitude
                }
            }
            RelativeEncoding::BinaryOffset => byte - 64,
        }
    }
}

/// User supplied value function: `(message, previous) -> value`
pub type CustomValueFn = Arc<dyn Fn(&[u8], f32) -> f32 + Send + Sync>;

/// How a control derives its value from a matched message
#[derive(Clone)]
pub enum ValueStrategy {
    /// Second data byte, 7-bit
    Data2,
    /// First data byte, 7-bit (channel pressure, program change)
    Data1,
    /// 1.0 for note-on with non-zero velocity, 0.0 otherwise
    NoteGate,
    /// 14-bit pitch bend value
    PitchBend,
    /// Endless encoder: previous value plus `delta * step`
    Relative { encoding: RelativeEncoding, step: f32 },
    /// Byte at a fixed index of a system exclusive message
    SysexByte(usize),
    Constant(f32),
    Custom(CustomValueFn),
}

impl ValueStrategy {
    /// Normalized value for a message. Always within `[0, 1]`.
    pub fn value(&self, raw: &[u8], previous: f32) -> f32 {
        let byte = |i: usize| raw.get(i).copied().unwrap_or(0) & 0x7F;

        let value = match self {
            ValueStrategy::Data2 => byte(2) as f32 / 127.0,
            ValueStrategy::Data1 => byte(1) as f32 / 127.0,
            ValueStrategy::NoteGate => {
                let is_note_on = raw.first().map(|s| s & 0xF0 == 0x90).unwrap_or(false);
                if is_note_on && byte(2) > 0 {
                    1.0
                } else {
                    0.0
                }
            }
            ValueStrategy::PitchBend => combine_14bit(byte(1), byte(2)) as f32 / 16383.0,
            ValueStrategy::Relative { encoding, step } => {
                previous + encoding.delta(byte(2)) as f32 * step
            }
            ValueStrategy::SysexByte(index) => byte(*index) as f32 / 127.0,
            ValueStrategy::Constant(value) => *value,
            ValueStrategy::Custom(f) => f(raw, previous),
        };

        if value.is_nan() {
            return previous.clamp(0.0, 1.0);
        }
        value.clamp(0.0, 1.0)
    }

    /// Channel carried by a message, 0 when the message has none
    pub fn channel(&self, raw: &[u8]) -> u8 {
        channel_of(raw).unwrap_or(0)
    }

    /// Whether this strategy reports deltas rather than absolute positions
    pub fn is_relative(&self) -> bool {
        matches!(self, ValueStrategy::Relative { .. })
    }
}

impl Default for ValueStrategy {
    fn default() -> Self {
        ValueStrategy::Data2
    }
}

impl fmt::Debug for ValueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueStrategy::Data2 => f.write_str("Data2"),
            ValueStrategy::Data1 => f.write_str("Data1"),
            ValueStrategy::NoteGate => f.write_str("NoteGate"),
            ValueStrategy::PitchBend => f.write_str("PitchBend"),
            ValueStrategy::Relative { encoding, step } => f
                .debug_struct("Relative")
                .field("encoding", encoding)
                .field("step", step)
                .finish(),
            ValueStrategy::SysexByte(index) => f.debug_tuple("SysexByte").field(index).finish(),
            ValueStrategy::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            ValueStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Default step for relative encoders (one detent = 1/100 of the range)
const DEFAULT_RELATIVE_STEP: f32 = 0.01;

impl FromStr for ValueStrategy {
    type Err = anyhow::Error;

    /// Parse a strategy name: `data2`, `data1`, `gate`, `pb`, `rel2c`, `relsm`,
    /// `reloff` (each relative form accepts `:step`), `sysex:N`, `const:V`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg.trim())),
            None => (s, None),
        };

        let relative = |encoding| -> Result<ValueStrategy> {
            let step = match arg {
                Some(step) => step
                    .parse::<f32>()
                    .with_context(|| format!("Invalid encoder step: {}", step))?,
                None => DEFAULT_RELATIVE_STEP,
            };
            Ok(ValueStrategy::Relative { encoding, step })
        };

        match name {
            "" | "data2" => Ok(ValueStrategy::Data2),
            "data1" => Ok(ValueStrategy::Data1),
            "gate" => Ok(ValueStrategy::NoteGate),
            "pb" => Ok(ValueStrategy::PitchBend),
            "rel2c" => relative(RelativeEncoding::TwosComplement),
            "relsm" => relative(RelativeEncoding::SignMagnitude),
            "reloff" => relative(RelativeEncoding::BinaryOffset),
            "sysex" => {
                let index = arg
                    .context("sysex strategy needs a byte index")?
                    .parse::<usize>()
                    .with_context(|| format!("Invalid sysex index: {}", s))?;
                Ok(ValueStrategy::SysexByte(index))
            }
            "const" => {
                let value = arg
                    .context("const strategy needs a value")?
                    .parse::<f32>()
                    .with_context(|| format!("Invalid constant: {}", s))?;
                Ok(ValueStrategy::Constant(value))
            }
            _ => bail!("Unknown value strategy: {}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_strategies() {
        assert_eq!(ValueStrategy::Data2.value(&[0xB0, 7, 127], 0.0), 1.0);
        assert_eq!(ValueStrategy::Data2.value(&[0xB0, 7, 0], 0.5), 0.0);
        assert_eq!(ValueStrategy::Data1.value(&[0xD0, 127], 0.0), 1.0);
        assert_eq!(ValueStrategy::PitchBend.value(&[0xE0, 0x7F, 0x7F], 0.0), 1.0);
        assert!((ValueStrategy::PitchBend.value(&[0xE0, 0x00, 0x40], 0.0) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_note_gate() {
        assert_eq!(ValueStrategy::NoteGate.value(&[0x90, 60, 1], 0.0), 1.0);
        assert_eq!(ValueStrategy::NoteGate.value(&[0x90, 60, 0], 1.0), 0.0);
        assert_eq!(ValueStrategy::NoteGate.value(&[0x80, 60, 64], 1.0), 0.0);
    }

    #[test]
    fn test_relative_encodings() {
        assert_eq!(RelativeEncoding::TwosComplement.delta(1), 1);
        assert_eq!(RelativeEncoding::TwosComplement.delta(127), -1);
        assert_eq!(RelativeEncoding::SignMagnitude.delta(0x41), -1);
        assert_eq!(RelativeEncoding::SignMagnitude.delta(0x03), 3);
        assert_eq!(RelativeEncoding::BinaryOffset.delta(63), -1);
        assert_eq!(RelativeEncoding::BinaryOffset.delta(66), 2);
    }

    #[test]
    fn test_relative_value_clamps() {
        let strategy = ValueStrategy::Relative {
            encoding: RelativeEncoding::TwosComplement,
            step: 0.25,
        };
        assert_eq!(strategy.value(&[0xB0, 16, 1], 0.5), 0.75);
        assert_eq!(strategy.value(&[0xB0, 16, 3], 0.5), 1.0);
        assert_eq!(strategy.value(&[0xB0, 16, 126], 0.25), 0.0);
    }

    #[test]
    fn test_custom_and_nan_guard() {
        let strategy = ValueStrategy::Custom(Arc::new(|_, _| f32::NAN));
        assert_eq!(strategy.value(&[0xB0, 1, 1], 0.3), 0.3);

        let strategy = ValueStrategy::Custom(Arc::new(|raw, _| raw.len() as f32 / 10.0));
        assert_eq!(strategy.value(&[0xB0, 1, 1], 0.0), 0.3);
    }

    #[test]
    fn test_parse_names() {
        assert!(matches!("gate".parse::<ValueStrategy>().unwrap(), ValueStrategy::NoteGate));
        assert!(matches!(
            "rel2c:0.5".parse::<ValueStrategy>().unwrap(),
            ValueStrategy::Relative {
                encoding: RelativeEncoding::TwosComplement,
                step
            } if step == 0.5
        ));
        assert!(matches!(
            "sysex:6".parse::<ValueStrategy>().unwrap(),
            ValueStrategy::SysexByte(6)
        ));
        assert!("sysex".parse::<ValueStrategy>().is_err());
        assert!("wobble".parse::<ValueStrategy>().is_err());
    }

    #[test]
    fn test_channel() {
        assert_eq!(ValueStrategy::Data2.channel(&[0x9A, 1, 1]), 10);
        assert_eq!(ValueStrategy::Data2.channel(&[0xF0, 1, 0xF7]), 0);
    }
}
