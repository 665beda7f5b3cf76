//! midir-backed surface ports

use anyhow::Result;
use colored::*;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{InputPort, LedPort, PortInfo, SurfaceBackend};
use crate::controls::RawEvent;
use crate::error::{GatewayError, PortDirection};
use crate::midi::format_hex;

const CLIENT_NAME: &str = "Surface-GW";

/// Case-insensitive substring match, the way port names differ between
/// Windows, ALSA and CoreMIDI
fn matches_pattern(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

fn is_virtual(name: &str) -> bool {
    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
}

/// Surface backend over the system MIDI API
#[derive(Debug, Default, Clone, Copy)]
pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }
}

struct MidirOutput {
    name: String,
    conn: Mutex<MidiOutputConnection>,
}

impl LedPort for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.conn
            .lock()
            .send(data)
            .map_err(|e| anyhow::anyhow!("Failed to send to '{}': {}", self.name, e))?;
        debug!("Sent: {}", format_hex(data));
        Ok(())
    }
}

struct MidirInput {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl InputPort for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MidirInput {
    fn drop(&mut self) {
        debug!("Closing MIDI input '{}'", self.name);
    }
}

impl SurfaceBackend for MidirBackend {
    fn open_output(&self, pattern: &str) -> Result<Arc<dyn LedPort>> {
        let midi_out = MidiOutput::new(&format!("{}-Output", CLIENT_NAME))
            .map_err(|e| GatewayError::MidiInit(PortDirection::Output, e.to_string()))?;

        debug!("Found {} MIDI output ports", midi_out.port_count());
        let (port, name) = midi_out
            .ports()
            .into_iter()
            .find_map(|port| {
                let name = midi_out.port_name(&port).ok()?;
                matches_pattern(&name, pattern).then_some((port, name))
            })
            .ok_or_else(|| GatewayError::PortNotFound(PortDirection::Output, pattern.to_string()))?;

        info!("Connecting to output port: {}", name);
        let conn = midi_out.connect(&port, CLIENT_NAME).map_err(|e| {
            GatewayError::PortConnect(PortDirection::Output, name.clone(), e.to_string())
        })?;

        Ok(Arc::new(MidirOutput {
            name,
            conn: Mutex::new(conn),
        }))
    }

    fn open_input(
        &self,
        pattern: &str,
        events: mpsc::Sender<RawEvent>,
    ) -> Result<Box<dyn InputPort>> {
        let midi_in = MidiInput::new(&format!("{}-Input", CLIENT_NAME))
            .map_err(|e| GatewayError::MidiInit(PortDirection::Input, e.to_string()))?;

        debug!("Found {} MIDI input ports", midi_in.port_count());
        let (port, name) = midi_in
            .ports()
            .into_iter()
            .find_map(|port| {
                let name = midi_in.port_name(&port).ok()?;
                matches_pattern(&name, pattern).then_some((port, name))
            })
            .ok_or_else(|| GatewayError::PortNotFound(PortDirection::Input, pattern.to_string()))?;

        info!("Connecting to input port: {}", name);
        let conn = midi_in
            .connect(
                &port,
                CLIENT_NAME,
                move |_timestamp, data, _| match RawEvent::from_bytes(data) {
                    // Never block the MIDI thread; drop when the loop lags
                    Some(event) => {
                        if events.try_send(event).is_err() {
                            warn!("Surface event dropped: {}", format_hex(data));
                        }
                    }
                    None => debug!("Ignoring MIDI: {}", format_hex(data)),
                },
                (),
            )
            .map_err(|e| {
                GatewayError::PortConnect(PortDirection::Input, name.clone(), e.to_string())
            })?;

        Ok(Box::new(MidirInput { name, _conn: conn }))
    }

    fn list_ports(&self) -> Result<(Vec<PortInfo>, Vec<PortInfo>)> {
        let midi_in = MidiInput::new(&format!("{}-Discovery", CLIENT_NAME))
            .map_err(|e| GatewayError::MidiInit(PortDirection::Input, e.to_string()))?;
        let midi_out = MidiOutput::new(&format!("{}-Discovery", CLIENT_NAME))
            .map_err(|e| GatewayError::MidiInit(PortDirection::Output, e.to_string()))?;

        let inputs = midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(PortInfo {
                    index,
                    is_virtual: is_virtual(&name),
                    name,
                })
            })
            .collect();

        let outputs = midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_out.port_name(port).ok()?;
                Some(PortInfo {
                    index,
                    is_virtual: is_virtual(&name),
                    name,
                })
            })
            .collect();

        Ok((inputs, outputs))
    }
}

/// Print available ports for `--list-ports`
pub fn print_ports(backend: &dyn SurfaceBackend) -> Result<()> {
    let (inputs, outputs) = backend.list_ports()?;

    println!("\n{}", "=== MIDI Ports ===".bold().cyan());
    for (title, ports) in [("Input ports:", &inputs), ("Output ports:", &outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for port in ports {
            let tag = if port.is_virtual {
                " [virtual]".yellow()
            } else {
                "".normal()
            };
            println!("  {} {}{}", format!("[{}]", port.index).dimmed(), port.name.green(), tag);
        }
    }
    println!();
    Ok(())
}
