//! Surface GW
//!
//! Gateway between a MIDI pad controller and OBS Studio: pads and knobs
//! drive scenes, mute and volume; pad LEDs mirror OBS state.

pub mod assembly;
pub mod config;
pub mod controls;
pub mod error;
pub mod midi;
pub mod orchestrator;
pub mod relay;
pub mod remote;
pub mod surface;
pub mod tracker;

#[cfg(test)]
mod testing;
