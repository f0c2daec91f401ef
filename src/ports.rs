//! MIDI port discovery, input connection and the feedback output sink

use anyhow::{anyhow, Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::matcher::ControlMatcher;
use crate::message::{format_hex, StatusKind};
use crate::shadow::{DisplayState, OutputSink};
use crate::surface::ControlId;

const CLIENT_NAME: &str = "surface-shadow";

/// Raw message received from the device
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub timestamp: Instant,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

fn is_virtual_port(name: &str) -> bool {
    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
}

/// Discover input ports
pub fn discover_input_ports() -> Result<Vec<PortInfo>> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;

    Ok(midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            let name = midi_in.port_name(port).ok()?;
            Some(PortInfo {
                index,
                is_virtual: is_virtual_port(&name),
                name,
            })
        })
        .collect())
}

/// Discover output ports
pub fn discover_output_ports() -> Result<Vec<PortInfo>> {
    let midi_out = MidiOutput::new(CLIENT_NAME)?;

    Ok(midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            let name = midi_out.port_name(port).ok()?;
            Some(PortInfo {
                index,
                is_virtual: is_virtual_port(&name),
                name,
            })
        })
        .collect())
}

/// Print all ports in a formatted way
pub fn list_ports_formatted() {
    use colored::*;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let sections = [
        ("Input Ports:", discover_input_ports()),
        ("Output Ports:", discover_output_ports()),
    ];
    for (title, ports) in sections {
        println!("\n{}", title.bold());
        match ports {
            Ok(ports) if ports.is_empty() => println!("  {}", "No ports found".dimmed()),
            Ok(ports) => {
                for port in ports {
                    let marker = if port.is_virtual {
                        "[VIRTUAL]".yellow()
                    } else {
                        "[PHYSICAL]".green()
                    };
                    println!("  {} {}", marker, port.name);
                }
            }
            Err(e) => println!("  {}", format!("Port scan failed: {}", e).red()),
        }
    }
    println!();
}

/// Case-insensitive substring match on port names
fn matches_port(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    midi_in.ports().into_iter().find_map(|port| {
        let name = midi_in.port_name(&port).ok()?;
        matches_port(&name, pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    midi_out.ports().into_iter().find_map(|port| {
        let name = midi_out.port_name(&port).ok()?;
        matches_port(&name, pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

/// Connect to the input port matching `pattern`, forwarding every message
/// to `tx`. The connection stays open while the returned handle lives.
pub fn connect_input(
    pattern: &str,
    tx: mpsc::Sender<RawMessage>,
) -> Result<MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new(CLIENT_NAME).context("Failed to create MIDI input")?;
    // Sysex is part of the device vocabulary
    midi_in.ignore(midir::Ignore::None);

    let (port, name) = find_input_port(&midi_in, pattern)
        .ok_or_else(|| anyhow!("Input port '{}' not found", pattern))?;
    info!("Connecting to input port: {}", name);

    midi_in
        .connect(
            &port,
            CLIENT_NAME,
            move |_timestamp, data, _| {
                let message = RawMessage {
                    timestamp: Instant::now(),
                    data: data.to_vec(),
                };
                // Never block the MIDI thread
                if tx.try_send(message).is_err() {
                    debug!("Input queue full, dropped: {}", format_hex(data));
                }
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect to input port: {}", e))
}

/// Feedback message for a control at `(status, data1)` showing `state`.
///
/// Pitch bend carries the 14-bit value, notes carry the LED colour as
/// velocity, controllers carry the value (or the LED colour when there is no
/// value yet).
pub fn feedback_message(status: u8, data1: Option<u8>, state: &DisplayState) -> Option<Vec<u8>> {
    let kind = StatusKind::from_status(status)?;
    let channel = status & 0x0F;
    let led = if state.color.is_off() {
        0
    } else {
        state.color.to_velocity().max(1)
    };
    let seven_bit = |v: f32| (v.clamp(0.0, 1.0) * 127.0).round() as u8;

    match kind {
        StatusKind::PitchBend => {
            let value = (state.value.unwrap_or(0.0).clamp(0.0, 1.0) * 16383.0).round() as u16;
            Some(vec![status, (value & 0x7F) as u8, (value >> 7) as u8])
        }
        StatusKind::NoteOn | StatusKind::NoteOff => {
            Some(vec![StatusKind::NoteOn.nibble() | channel, data1?, led])
        }
        StatusKind::ControlChange | StatusKind::PolyPressure => {
            let value = state.value.map(seven_bit).unwrap_or(led);
            Some(vec![status, data1?, value])
        }
        StatusKind::ChannelPressure => Some(vec![status, state.value.map(seven_bit).unwrap_or(led)]),
        StatusKind::ProgramChange => None,
    }
}

/// Sink that sends shadow state back to the device
pub struct MidiFeedbackSink {
    conn: MidiOutputConnection,
    addresses: HashMap<ControlId, (u8, Option<u8>)>,
}

impl MidiFeedbackSink {
    /// Connect to the output port matching `pattern`; controls whose pattern
    /// has a fixed address receive feedback
    pub fn connect(pattern: &str, matcher: &dyn ControlMatcher) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to create MIDI output")?;
        let (port, name) = find_output_port(&midi_out, pattern)
            .ok_or_else(|| anyhow!("Output port '{}' not found", pattern))?;
        info!("Connecting to output port: {}", name);

        let conn = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| anyhow!("Failed to connect to output port: {}", e))?;

        let addresses: HashMap<ControlId, (u8, Option<u8>)> = matcher
            .controls()
            .into_iter()
            .filter_map(|c| Some((c.id(), c.pattern().feedback_address()?)))
            .collect();
        info!("{} control(s) accept feedback", addresses.len());

        Ok(Self { conn, addresses })
    }
}

impl OutputSink for MidiFeedbackSink {
    fn paint(&mut self, control: ControlId, state: &DisplayState) {
        let Some(&(status, data1)) = self.addresses.get(&control) else {
            return;
        };
        let Some(message) = feedback_message(status, data1, state) else {
            return;
        };

        match self.conn.send(&message) {
            Ok(()) => debug!("Sent: {}", format_hex(&message)),
            Err(e) => warn!("Failed to send feedback to {}: {}", control, e),
        }
    }
}
