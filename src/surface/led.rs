//! LED state buffer
//!
//! Controls enqueue the visual state they want; the orchestrator flushes the
//! whole batch to the output port in one synchronous pass.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::LedPort;
use crate::error::GatewayError;
use crate::midi::{format_hex, MidiMessage};

/// Bi-color pad intensity, each component 0-3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedColor {
    green: u8,
    red: u8,
}

impl LedColor {
    pub const OFF: LedColor = LedColor { green: 0, red: 0 };
    pub const GREEN: LedColor = LedColor { green: 3, red: 0 };
    pub const RED: LedColor = LedColor { green: 0, red: 3 };
    /// Used while a command is in flight
    pub const AMBER: LedColor = LedColor { green: 1, red: 3 };

    pub fn new(green: u8, red: u8) -> Result<Self, GatewayError> {
        if green > 3 || red > 3 {
            return Err(GatewayError::LedRange { green, red });
        }
        Ok(Self { green, red })
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn red(&self) -> u8 {
        self.red
    }

    /// Velocity byte understood by the pads: green in the high nibble
    pub fn color_byte(&self) -> u8 {
        (self.green << 4) | self.red
    }
}

/// One pending LED write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub channel: u8,
    pub note: u8,
    pub color: LedColor,
    /// Flash duration; 0 means hold until overwritten
    pub duration_ms: u32,
}

impl LedState {
    pub fn held(channel: u8, note: u8, color: LedColor) -> Self {
        Self {
            channel,
            note,
            color,
            duration_ms: 0,
        }
    }

    pub fn flash(channel: u8, note: u8, color: LedColor, duration_ms: u32) -> Self {
        Self {
            channel,
            note,
            color,
            duration_ms,
        }
    }

    fn note_on(&self) -> Vec<u8> {
        MidiMessage::NoteOn {
            channel: self.channel,
            note: self.note,
            velocity: self.color.color_byte(),
        }
        .encode()
    }

    fn note_off(&self) -> Vec<u8> {
        MidiMessage::NoteOff {
            channel: self.channel,
            note: self.note,
            velocity: 0,
        }
        .encode()
    }
}

/// Ordered, non-deduplicated queue of pending LED writes
#[derive(Debug, Default)]
pub struct LedQueue {
    pending: Mutex<Vec<LedState>>,
}

impl LedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, state: LedState) {
        self.pending.lock().push(state);
    }

    /// Validate raw intensities, then enqueue a held state
    pub fn set(&self, channel: u8, note: u8, green: u8, red: u8) -> Result<()> {
        let color = LedColor::new(green, red)?;
        self.enqueue(LedState::held(channel, note, color));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Copy of the pending states, oldest first
    pub fn snapshot(&self) -> Vec<LedState> {
        self.pending.lock().clone()
    }

    fn take(&self) -> Vec<LedState> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// LED queue plus the output port it flushes to
pub struct LedSurface {
    queue: LedQueue,
    port: Mutex<Option<Arc<dyn LedPort>>>,
}

impl Default for LedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl LedSurface {
    pub fn new() -> Self {
        Self {
            queue: LedQueue::new(),
            port: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &LedQueue {
        &self.queue
    }

    pub fn attach(&self, port: Arc<dyn LedPort>) {
        *self.port.lock() = Some(port);
    }

    /// Release the output port, returning it
    pub fn detach(&self) -> Option<Arc<dyn LedPort>> {
        self.port.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.port.lock().is_some()
    }

    /// Send every queued state to the output port and clear the queue
    ///
    /// Holds the port lock for the whole batch and never awaits, so two
    /// flushes cannot interleave. Flash note-offs are scheduled on the
    /// runtime and sent after their duration.
    pub fn flush(&self) -> Result<()> {
        let port_guard = self.port.lock();
        let states = self.queue.take();
        let Some(port) = port_guard.as_ref() else {
            if !states.is_empty() {
                debug!("No LED output attached, dropped {} states", states.len());
            }
            return Ok(());
        };

        let mut first_error = None;
        for state in &states {
            let data = state.note_on();
            if let Err(e) = port.send(&data) {
                warn!("Failed to send LED {}: {:#}", format_hex(&data), e);
                first_error.get_or_insert(e);
                continue;
            }

            if state.duration_ms > 0 {
                let port = Arc::clone(port);
                let off = state.note_off();
                let duration = Duration::from_millis(u64::from(state.duration_ms));
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    if let Err(e) = port.send(&off) {
                        debug!("Failed to end LED flash: {:#}", e);
                    }
                });
            }
        }

        if !states.is_empty() {
            debug!("Flushed {} LED states to {}", states.len(), port.name());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
