//! Forwarded message envelopes
//!
//! Secondary physical ports are multiplexed onto the primary input by wrapping
//! each of their messages in a system exclusive envelope:
//!
//! ```text
//! F0 7D <target-port> <origin-port> <payload-kind> <payload...> F7
//! ```
//!
//! Payload kind `0x01` carries a short message with its status byte split into
//! two nibbles (so every payload byte stays 7-bit). Payload kind `0x02` carries
//! the body of a system exclusive message without its own framing.

use crate::message::{SYSEX_END, SYSEX_START};

/// Manufacturer id used by forwarding envelopes
pub const FORWARD_VENDOR_ID: u8 = 0x7D;

/// Payload kind for short (channel voice / system common) messages
pub const PAYLOAD_SHORT: u8 = 0x01;

/// Payload kind for system exclusive bodies
pub const PAYLOAD_SYSEX: u8 = 0x02;

/// Header bytes before the payload: start, vendor, target, origin, kind
const HEADER_LEN: usize = 5;

/// A decoded envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarded {
    pub target_port: u8,
    pub origin_port: u8,
    /// The original message, framing restored
    pub message: Vec<u8>,
}

/// Check whether a message looks like a forwarding envelope without decoding it
pub fn is_envelope(raw: &[u8]) -> bool {
    raw.len() > HEADER_LEN
        && raw[0] == SYSEX_START
        && raw[1] == FORWARD_VENDOR_ID
        && raw.last() == Some(&SYSEX_END)
}

/// Decode an envelope. Anything that is not a well-formed envelope yields None.
pub fn decode(raw: &[u8]) -> Option<Forwarded> {
    if !is_envelope(raw) {
        return None;
    }

    let target_port = raw[2];
    let origin_port = raw[3];
    let payload = &raw[HEADER_LEN..raw.len() - 1];

    let message = match raw[4] {
        PAYLOAD_SHORT => {
            let (&hi, rest) = payload.split_first()?;
            let (&lo, data) = rest.split_first()?;
            if hi > 0x0F || lo > 0x0F || hi < 0x08 {
                return None;
            }
            let mut message = Vec::with_capacity(1 + data.len());
            message.push((hi << 4) | lo);
            message.extend_from_slice(data);
            message
        }
        PAYLOAD_SYSEX => {
            let mut message = Vec::with_capacity(payload.len() + 2);
            message.push(SYSEX_START);
            message.extend_from_slice(payload);
            message.push(SYSEX_END);
            message
        }
        _ => return None,
    };

    Some(Forwarded {
        target_port,
        origin_port,
        message,
    })
}

/// Wrap a message into an envelope
pub fn encode(target_port: u8, origin_port: u8, message: &[u8]) -> Vec<u8> {
    let mut out = vec![
        SYSEX_START,
        FORWARD_VENDOR_ID,
        target_port & 0x7F,
        origin_port & 0x7F,
    ];

    match message.first() {
        Some(&SYSEX_START) => {
            out.push(PAYLOAD_SYSEX);
            let body_end = if message.last() == Some(&SYSEX_END) {
                message.len() - 1
            } else {
                message.len()
            };
            out.extend_from_slice(&message[1..body_end.max(1)]);
        }
        Some(&status) => {
            out.push(PAYLOAD_SHORT);
            out.push(status >> 4);
            out.push(status & 0x0F);
            out.extend(message[1..].iter().map(|b| b & 0x7F));
        }
        None => {
            out.push(PAYLOAD_SHORT);
        }
    }

    out.push(SYSEX_END);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_envelope() {
        let envelope = encode(0, 2, &[0x91, 0x24, 0x7F]);
        assert_eq!(
            envelope,
            vec![0xF0, 0x7D, 0x00, 0x02, 0x01, 0x09, 0x01, 0x24, 0x7F, 0xF7]
        );

        let decoded = decode(&envelope).unwrap();
        assert_eq!(decoded.origin_port, 2);
        assert_eq!(decoded.target_port, 0);
        assert_eq!(decoded.message, vec![0x91, 0x24, 0x7F]);
    }

    #[test]
    fn test_sysex_envelope() {
        let inner = [0xF0, 0x00, 0x20, 0x29, 0x02, 0xF7];
        let decoded = decode(&encode(0, 1, &inner)).unwrap();
        assert_eq!(decoded.message, inner.to_vec());
    }

    #[test]
    fn test_rejects_foreign_sysex() {
        assert_eq!(decode(&[0xF0, 0x00, 0x20, 0x29, 0x02, 0x0D, 0xF7]), None);
        assert_eq!(decode(&[0x90, 0x3C, 0x7F]), None);
    }

    #[test]
    fn test_rejects_malformed_payload() {
        // Unknown payload kind
        assert_eq!(decode(&[0xF0, 0x7D, 0x00, 0x01, 0x09, 0x01, 0xF7]), None);
        // Status nibble without its low half
        assert_eq!(decode(&[0xF0, 0x7D, 0x00, 0x01, 0x01, 0x09, 0xF7]), None);
        // Data byte in the status position
        assert_eq!(decode(&[0xF0, 0x7D, 0x00, 0x01, 0x01, 0x03, 0x00, 0xF7]), None);
    }
}
