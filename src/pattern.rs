//! Event patterns
//!
//! An event pattern is an immutable predicate over the bytes of a raw message.
//! Matching is a pure function: it either rejects the message or returns the
//! fields a value strategy needs, and it never mutates anything.
//!
//! Patterns can be written as short text strings, which is how device
//! catalogs and config files declare them:
//!
//! | Text             | Meaning                                         |
//! |------------------|-------------------------------------------------|
//! | `cc=70`          | Control change 70 on any channel                |
//! | `note=36@ch10`   | Note 36 (on or off) on channel 10 (1-based)     |
//! | `pb=ch1`         | Pitch bend on channel 1                         |
//! | `at=60`          | Polyphonic pressure on note 60                  |
//! | `bytes:9? 3C *`  | Raw positional byte matchers                    |
//! | `fwd:2:cc=7`     | `cc=7` arriving through forwarding port 2       |
//! | `cc=1 ; cc=2`    | Either alternative, first match wins            |
//! | `fwd:2:(a ; b)`  | Alternatives grouped under one forwarding port  |

use anyhow::{bail, Context, Result};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::forward;
use crate::message::channel_of;

/// Predicate over a single byte
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ByteMatcher {
    Literal(u8),
    Wildcard,
    /// Inclusive range
    Range(u8, u8),
    OneOf(Vec<u8>),
    /// `byte & mask == bits`
    Masked { mask: u8, bits: u8 },
}

impl ByteMatcher {
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            ByteMatcher::Literal(b) => *b == byte,
            ByteMatcher::Wildcard => true,
            ByteMatcher::Range(lo, hi) => (*lo..=*hi).contains(&byte),
            ByteMatcher::OneOf(set) => set.contains(&byte),
            ByteMatcher::Masked { mask, bits } => byte & mask == *bits,
        }
    }

    /// Parse a single token: `B0`, `*`, `00-3F`, `80|90`, `9?`, `80&E0`
    fn parse_token(token: &str) -> Result<Self> {
        if token == "*" {
            return Ok(ByteMatcher::Wildcard);
        }

        if let Some((lo, hi)) = token.split_once('-') {
            let lo = parse_byte(lo)?;
            let hi = parse_byte(hi)?;
            if lo > hi {
                bail!("Empty byte range: {}", token);
            }
            return Ok(ByteMatcher::Range(lo, hi));
        }

        if token.contains('|') {
            let set = token
                .split('|')
                .map(parse_byte)
                .collect::<Result<Vec<_>>>()?;
            return Ok(ByteMatcher::OneOf(set));
        }

        if let Some((bits, mask)) = token.split_once('&') {
            let bits = parse_byte(bits)?;
            let mask = parse_byte(mask)?;
            return Ok(ByteMatcher::Masked {
                mask,
                bits: bits & mask,
            });
        }

        if let Some(high) = token.strip_suffix('?') {
            let nibble = u8::from_str_radix(high, 16)
                .with_context(|| format!("Invalid nibble: {}", token))?;
            if nibble > 0x0F {
                bail!("Invalid nibble: {}", token);
            }
            return Ok(ByteMatcher::Masked {
                mask: 0xF0,
                bits: nibble << 4,
            });
        }

        Ok(ByteMatcher::Literal(parse_byte(token)?))
    }
}

impl fmt::Display for ByteMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteMatcher::Literal(b) => write!(f, "{:02X}", b),
            ByteMatcher::Wildcard => f.write_str("*"),
            ByteMatcher::Range(lo, hi) => write!(f, "{:02X}-{:02X}", lo, hi),
            ByteMatcher::OneOf(set) => {
                let parts: Vec<String> = set.iter().map(|b| format!("{:02X}", b)).collect();
                f.write_str(&parts.join("|"))
            }
            ByteMatcher::Masked { mask: 0xF0, bits } => write!(f, "{:X}?", bits >> 4),
            ByteMatcher::Masked { mask, bits } => write!(f, "{:02X}&{:02X}", bits, mask),
        }
    }
}

fn parse_byte(text: &str) -> Result<u8> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u8::from_str_radix(digits, 16).with_context(|| format!("Invalid byte: {}", text))
}

fn parse_decimal(text: &str, what: &str) -> Result<u8> {
    let value = text
        .trim()
        .parse::<u8>()
        .with_context(|| format!("Invalid {}: {}", what, text))?;
    if value > 0x7F {
        bail!("{} out of range (0-127): {}", what, value);
    }
    Ok(value)
}

/// Parse a 1-based channel like `ch1`..`ch16` into 0-15
fn parse_channel(text: &str) -> Result<u8> {
    let digits = text
        .trim()
        .strip_prefix("ch")
        .with_context(|| format!("Invalid channel: {}", text))?;
    let channel = digits
        .parse::<u8>()
        .with_context(|| format!("Invalid channel: {}", text))?;
    if !(1..=16).contains(&channel) {
        bail!("Channel out of range (1-16): {}", channel);
    }
    Ok(channel - 1)
}

/// Fields extracted by a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted<'a> {
    /// The matched message. Borrowed unless an envelope had to be unwrapped.
    pub message: Cow<'a, [u8]>,
    /// Channel of the (unwrapped) message, 0 for non-channel messages
    pub channel: u8,
}

impl Extracted<'_> {
    /// Bytes following the status byte
    pub fn value_bytes(&self) -> &[u8] {
        self.message.get(1..).unwrap_or(&[])
    }

    pub fn into_owned(self) -> Extracted<'static> {
        Extracted {
            message: Cow::Owned(self.message.into_owned()),
            channel: self.channel,
        }
    }
}

/// Immutable predicate + extractor over raw messages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// Positional byte matchers. Trailing message bytes are unconstrained.
    Sequence(Vec<ByteMatcher>),
    /// First matching alternative wins
    Union(Vec<EventPattern>),
    /// Envelope from a secondary port, tested against the unwrapped message
    Forwarded { port: u8, inner: Box<EventPattern> },
}

impl EventPattern {
    /// Control change on a controller number, optionally pinned to a channel
    pub fn control_change(cc: u8, channel: Option<u8>) -> Self {
        EventPattern::Sequence(vec![status_matcher(0xB0, channel), ByteMatcher::Literal(cc)])
    }

    /// Note on or note off for a note number
    pub fn note(note: u8, channel: Option<u8>) -> Self {
        let status = match channel {
            Some(ch) => ByteMatcher::OneOf(vec![0x80 | (ch & 0x0F), 0x90 | (ch & 0x0F)]),
            None => ByteMatcher::Masked { mask: 0xE0, bits: 0x80 },
        };
        EventPattern::Sequence(vec![status, ByteMatcher::Literal(note)])
    }

    /// Pitch bend
    pub fn pitch_bend(channel: Option<u8>) -> Self {
        EventPattern::Sequence(vec![status_matcher(0xE0, channel)])
    }

    /// Polyphonic key pressure
    pub fn poly_pressure(note: u8, channel: Option<u8>) -> Self {
        EventPattern::Sequence(vec![status_matcher(0xA0, channel), ByteMatcher::Literal(note)])
    }

    pub fn forwarded(port: u8, inner: EventPattern) -> Self {
        EventPattern::Forwarded {
            port,
            inner: Box::new(inner),
        }
    }

    /// Test a raw message. Never mutates the message and never fails.
    pub fn matches<'a>(&self, raw: &'a [u8]) -> Option<Extracted<'a>> {
        match self {
            EventPattern::Sequence(matchers) => {
                if matchers.len() > raw.len() {
                    return None;
                }
                let all = matchers
                    .iter()
                    .zip(raw.iter())
                    .all(|(m, b)| m.matches(*b));
                all.then(|| Extracted {
                    message: Cow::Borrowed(raw),
                    channel: channel_of(raw).unwrap_or(0),
                })
            }
            EventPattern::Union(children) => children.iter().find_map(|c| c.matches(raw)),
            EventPattern::Forwarded { port, inner } => {
                let envelope = forward::decode(raw)?;
                if envelope.origin_port != *port {
                    return None;
                }
                inner
                    .matches(&envelope.message)
                    .map(Extracted::into_owned)
            }
        }
    }

    /// Status and first data byte used to send feedback to the control.
    ///
    /// Only defined for plain sequences whose status is fixed; the data byte is
    /// present when it is a literal as well.
    pub fn feedback_address(&self) -> Option<(u8, Option<u8>)> {
        let EventPattern::Sequence(matchers) = self else {
            return None;
        };

        let status = match matchers.first()? {
            ByteMatcher::Literal(s) => *s,
            ByteMatcher::OneOf(set) => *set.iter().max()?,
            ByteMatcher::Masked { mask: 0xF0, bits } => *bits,
            ByteMatcher::Masked { mask: 0xE0, bits: 0x80 } => 0x90,
            _ => return None,
        };

        let data1 = match matchers.get(1) {
            Some(ByteMatcher::Literal(d)) => Some(*d),
            _ => None,
        };

        Some((status, data1))
    }

    /// Parse a textual pattern (see module docs)
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            bail!("Empty pattern");
        }

        let alternatives = split_alternatives(text)?;
        if alternatives.len() > 1 {
            let children = alternatives
                .into_iter()
                .map(EventPattern::parse)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid union pattern: {}", text))?;
            return Ok(EventPattern::Union(children));
        }

        if let Some(group) = text.strip_prefix('(') {
            let inner = group
                .strip_suffix(')')
                .with_context(|| format!("Unclosed group: {}", text))?;
            return EventPattern::parse(inner);
        }

        if let Some(rest) = text.strip_prefix("fwd:") {
            let (port, inner) = rest
                .split_once(':')
                .with_context(|| format!("Forwarded pattern needs a port: {}", text))?;
            let port = port
                .trim()
                .parse::<u8>()
                .with_context(|| format!("Invalid forwarding port: {}", port))?;
            return Ok(EventPattern::forwarded(port, EventPattern::parse(inner)?));
        }

        if let Some(tokens) = text.strip_prefix("bytes:") {
            let matchers = tokens
                .split_whitespace()
                .map(ByteMatcher::parse_token)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid byte pattern: {}", text))?;
            if matchers.is_empty() {
                bail!("Byte pattern without matchers: {}", text);
            }
            return Ok(EventPattern::Sequence(matchers));
        }

        // Shorthands with an optional @chN suffix
        let (body, channel) = match text.split_once('@') {
            Some((body, ch)) => (body.trim(), Some(parse_channel(ch)?)),
            None => (text, None),
        };

        if let Some(cc) = body.strip_prefix("cc=") {
            Ok(EventPattern::control_change(parse_decimal(cc, "CC number")?, channel))
        } else if let Some(note) = body.strip_prefix("note=") {
            Ok(EventPattern::note(parse_decimal(note, "note number")?, channel))
        } else if let Some(note) = body.strip_prefix("at=") {
            Ok(EventPattern::poly_pressure(parse_decimal(note, "note number")?, channel))
        } else if body == "pb" {
            Ok(EventPattern::pitch_bend(channel))
        } else if let Some(ch) = body.strip_prefix("pb=") {
            Ok(EventPattern::pitch_bend(Some(parse_channel(ch)?)))
        } else {
            bail!("Unknown pattern format: {}", text);
        }
    }
}

/// Split on `;` outside parentheses
fn split_alternatives(text: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .with_context(|| format!("Unbalanced ')': {}", text))?;
            }
            ';' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        bail!("Unbalanced '(': {}", text);
    }

    parts.push(&text[start..]);
    Ok(parts)
}

fn status_matcher(nibble: u8, channel: Option<u8>) -> ByteMatcher {
    match channel {
        Some(ch) => ByteMatcher::Literal(nibble | (ch & 0x0F)),
        None => ByteMatcher::Masked {
            mask: 0xF0,
            bits: nibble,
        },
    }
}

impl FromStr for EventPattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EventPattern::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPattern::Sequence(matchers) => {
                let parts: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
                write!(f, "bytes:{}", parts.join(" "))
            }
            EventPattern::Union(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                f.write_str(&parts.join(" ; "))
            }
            EventPattern::Forwarded { port, inner } => match inner.as_ref() {
                EventPattern::Union(_) => write!(f, "fwd:{}:({})", port, inner),
                _ => write!(f, "fwd:{}:{}", port, inner),
            },
        }
    }
}
