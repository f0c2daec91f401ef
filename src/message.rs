//! Raw message utilities
//!
//! Classifies incoming raw messages and formats them for logs. The engine never
//! decodes messages into a structured form for matching; patterns work on the
//! bytes directly. These helpers exist for channel extraction, diagnostics and
//! the hex input used by the REPL and replay files.

use anyhow::{Context, Result};
use std::fmt;

/// Start of a system exclusive message
pub const SYSEX_START: u8 = 0xF0;

/// End of a system exclusive message
pub const SYSEX_END: u8 = 0xF7;

/// Kind of a channel voice message (high status nibble)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl StatusKind {
    /// Map a status byte to its voice message kind
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(StatusKind::NoteOff),
            0x90 => Some(StatusKind::NoteOn),
            0xA0 => Some(StatusKind::PolyPressure),
            0xB0 => Some(StatusKind::ControlChange),
            0xC0 => Some(StatusKind::ProgramChange),
            0xD0 => Some(StatusKind::ChannelPressure),
            0xE0 => Some(StatusKind::PitchBend),
            _ => None,
        }
    }

    /// Expected length of a complete message of this kind
    pub fn message_len(self) -> usize {
        match self {
            StatusKind::ProgramChange | StatusKind::ChannelPressure => 2,
            _ => 3,
        }
    }

    /// High nibble used on the wire
    pub fn nibble(self) -> u8 {
        match self {
            StatusKind::NoteOff => 0x80,
            StatusKind::NoteOn => 0x90,
            StatusKind::PolyPressure => 0xA0,
            StatusKind::ControlChange => 0xB0,
            StatusKind::ProgramChange => 0xC0,
            StatusKind::ChannelPressure => 0xD0,
            StatusKind::PitchBend => 0xE0,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusKind::NoteOff => "NoteOff",
            StatusKind::NoteOn => "NoteOn",
            StatusKind::PolyPressure => "PolyPressure",
            StatusKind::ControlChange => "CC",
            StatusKind::ProgramChange => "ProgramChange",
            StatusKind::ChannelPressure => "ChannelPressure",
            StatusKind::PitchBend => "PitchBend",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a raw message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Channel voice message ("standard" message)
    Standard { kind: StatusKind, channel: u8 },
    /// Framed system exclusive message
    SystemExclusive,
    /// System common / realtime message
    System,
    /// Empty, truncated, or running-status data
    Invalid,
}

/// Classify a raw message
pub fn classify(raw: &[u8]) -> MessageClass {
    let Some(&status) = raw.first() else {
        return MessageClass::Invalid;
    };

    if status < 0x80 {
        return MessageClass::Invalid;
    }

    if let Some(kind) = StatusKind::from_status(status) {
        if raw.len() < kind.message_len() {
            return MessageClass::Invalid;
        }
        return MessageClass::Standard {
            kind,
            channel: status & 0x0F,
        };
    }

    if status == SYSEX_START {
        if raw.len() >= 2 && raw.last() == Some(&SYSEX_END) {
            return MessageClass::SystemExclusive;
        }
        return MessageClass::Invalid;
    }

    MessageClass::System
}

/// Check whether a message is a complete system exclusive message
pub fn is_sysex(raw: &[u8]) -> bool {
    classify(raw) == MessageClass::SystemExclusive
}

/// Channel (0-15) of a channel voice message, None otherwise
pub fn channel_of(raw: &[u8]) -> Option<u8> {
    match classify(raw) {
        MessageClass::Standard { channel, .. } => Some(channel),
        _ => None,
    }
}

/// Combine two 7-bit data bytes (LSB first) into a 14-bit value
pub fn combine_14bit(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}

/// Format raw bytes as space separated uppercase hex
pub fn format_hex(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a hex string such as `"90 3C 7F"` or `"903c7f"` into bytes
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let compact = compact.trim_start_matches("0x");

    hex::decode(compact).with_context(|| format!("Invalid hex message: {}", text.trim()))
}

/// Short human readable description for trace output
pub fn describe(raw: &[u8]) -> String {
    match classify(raw) {
        MessageClass::Standard { kind, channel } => {
            let d1 = raw.get(1).copied().unwrap_or(0);
            match kind {
                StatusKind::PitchBend => {
                    let value = combine_14bit(d1, raw.get(2).copied().unwrap_or(0));
                    format!("{} ch:{} v:{}", kind, channel + 1, value)
                }
                StatusKind::ProgramChange | StatusKind::ChannelPressure => {
                    format!("{} ch:{} v:{}", kind, channel + 1, d1)
                }
                _ => format!(
                    "{} ch:{} d1:{} d2:{}",
                    kind,
                    channel + 1,
                    d1,
                    raw.get(2).copied().unwrap_or(0)
                ),
            }
        }
        MessageClass::SystemExclusive => format!("SysEx {} bytes", raw.len()),
        MessageClass::System => format!("System {:02X}", raw[0]),
        MessageClass::Invalid => format!("Invalid [{}]", format_hex(raw)),
    }
}
