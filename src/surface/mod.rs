//! Pad surface hardware
//!
//! The orchestrator only sees [`SurfaceBackend`]: open an output the LED
//! buffer can flush to, open an input that feeds raw events into a channel.
//! [`ports::MidirBackend`] implements it on top of midir.

pub mod animation;
pub mod led;
pub mod ports;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::controls::RawEvent;

pub use animation::Animator;
pub use led::{LedColor, LedQueue, LedState, LedSurface};
pub use ports::MidirBackend;

/// Enter the Launchkey's host-owned (InControl) mode
pub const IN_CONTROL_ON: [u8; 3] = [0x90, 0x0C, 0x7F];

/// Leave InControl mode
pub const IN_CONTROL_OFF: [u8; 3] = [0x90, 0x0C, 0x00];

/// Pad notes in InControl mode, top row then bottom row
pub const PAD_SLOTS: [u8; 16] = [
    96, 97, 98, 99, 100, 101, 102, 103, 112, 113, 114, 115, 116, 117, 118, 119,
];

/// Output side of the surface
pub trait LedPort: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, data: &[u8]) -> Result<()>;
}

/// Open input connection; dropping it closes the port
pub trait InputPort: Send {
    fn name(&self) -> &str;
}

/// A port seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

/// Opens surface ports by name pattern
pub trait SurfaceBackend: Send + Sync {
    fn open_output(&self, pattern: &str) -> Result<Arc<dyn LedPort>>;

    /// Open an input port; decoded events are pushed into `events`
    fn open_input(&self, pattern: &str, events: mpsc::Sender<RawEvent>)
        -> Result<Box<dyn InputPort>>;

    /// (inputs, outputs)
    fn list_ports(&self) -> Result<(Vec<PortInfo>, Vec<PortInfo>)>;
}
