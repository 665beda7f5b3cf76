//! Configuration management for Surface GW
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::fs;

use crate::controls::volume::VolumeCurve;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub obs: ObsConfig,
    pub midi: MidiConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,
}

/// OBS WebSocket configuration and the controls bound to it
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub volume_curve: VolumeCurve,
    #[serde(default = "default_audio_sources")]
    pub audio_sources: Vec<AudioSource>,
    #[serde(default)]
    pub scene_buttons: Vec<SceneButtonConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_scene_buttons: Option<AutoSceneButtons>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
            volume_curve: VolumeCurve::default(),
            audio_sources: default_audio_sources(),
            scene_buttons: Vec::new(),
            auto_scene_buttons: None,
        }
    }
}

/// Audio source (name only, or with explicit control ids)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AudioSource {
    Name(String),
    Detailed {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mute_button: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume_knob: Option<u8>,
    },
}

impl AudioSource {
    pub fn name(&self) -> &str {
        match self {
            AudioSource::Name(name) | AudioSource::Detailed { name, .. } => name,
        }
    }
}

/// Pad bound to a fixed scene
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SceneButtonConfig {
    pub id: u8,
    pub scene: String,
}

/// One pad per OBS scene, in scene-list order, starting at `first_id`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AutoSceneButtons {
    pub first_id: u8,
    #[serde(default = "default_auto_scene_max")]
    pub max: u8,
}

/// MIDI port configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    pub input_port: String,
    pub output_port: String,
    #[serde(default = "default_true")]
    pub in_control: bool,
    #[serde(default)]
    pub led_channel: u8,
}

/// Now-playing relay configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RelayConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_relay_interval")]
    pub interval_ms: u64,
}

impl RelayConfig {
    /// The relay only runs with a real token
    pub fn is_enabled(&self) -> bool {
        matches!(self.token.as_deref(), Some(token) if !token.is_empty() && token != "default")
    }
}

fn default_obs_host() -> String {
    "localhost".to_string()
}

fn default_obs_port() -> u16 {
    4455
}

fn default_audio_sources() -> Vec<AudioSource> {
    vec![
        AudioSource::Name("Desktop Audio".to_string()),
        AudioSource::Name("Mic/Aux".to_string()),
    ]
}

fn default_auto_scene_max() -> u8 {
    8
}

fn default_true() -> bool {
    true
}

fn default_relay_interval() -> u64 {
    1000
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.input_port.is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty");
        }
        if self.midi.output_port.is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }
        if self.midi.led_channel > 15 {
            anyhow::bail!(
                "MIDI led_channel {} is invalid (must be 0-15)",
                self.midi.led_channel
            );
        }

        if self.obs.host.is_empty() {
            anyhow::bail!("OBS host cannot be empty");
        }

        let mut source_names = HashSet::new();
        for source in &self.obs.audio_sources {
            if source.name().is_empty() {
                anyhow::bail!("Audio source name cannot be empty");
            }
            if !source_names.insert(source.name()) {
                anyhow::bail!("Audio source '{}' is listed twice", source.name());
            }
        }

        for button in &self.obs.scene_buttons {
            if button.scene.is_empty() {
                anyhow::bail!("Scene button {} has no scene", button.id);
            }
        }

        // Pads and knobs use different message types, so ids only clash
        // within one kind
        let mut pads = HashSet::new();
        let mut knobs = HashSet::new();
        for (kind, id) in self.control_ids() {
            if id > 127 {
                anyhow::bail!("Control id {} is invalid (must be 0-127)", id);
            }
            let taken = match kind {
                ControlSlot::Pad => !pads.insert(id),
                ControlSlot::Knob => !knobs.insert(id),
            };
            if taken {
                anyhow::bail!("Control id {} is bound twice", id);
            }
        }

        if let Some(auto) = &self.obs.auto_scene_buttons {
            let last = u16::from(auto.first_id) + u16::from(auto.max);
            if last > 128 {
                anyhow::bail!(
                    "auto_scene_buttons from {} with max {} runs past id 127",
                    auto.first_id,
                    auto.max
                );
            }
        }

        if let Some(relay) = &self.relay {
            if relay.url.is_empty() {
                anyhow::bail!("Relay url cannot be empty");
            }
            if relay.interval_ms == 0 {
                anyhow::bail!("Relay interval_ms must be positive");
            }
        }

        Ok(())
    }

    /// Explicit control ids: audio source pads/knobs and scene pads
    fn control_ids(&self) -> Vec<(ControlSlot, u8)> {
        let mut ids = Vec::new();
        for (index, source) in self.obs.audio_sources.iter().enumerate() {
            let (mute, knob) = audio_source_ids(index, source);
            ids.extend(mute.map(|id| (ControlSlot::Pad, id)));
            ids.extend(knob.map(|id| (ControlSlot::Knob, id)));
        }
        ids.extend(
            self.obs
                .scene_buttons
                .iter()
                .map(|b| (ControlSlot::Pad, b.id)),
        );
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSlot {
    Pad,
    Knob,
}

/// Base ids for audio sources given by name only
pub const FIRST_MUTE_BUTTON: u8 = 40;
pub const FIRST_VOLUME_KNOB: u8 = 21;

/// (mute pad, volume knob) ids of the audio source at `index`
///
/// Name-only entries get consecutive pads from 40 and knobs from 21.
pub fn audio_source_ids(index: usize, source: &AudioSource) -> (Option<u8>, Option<u8>) {
    match source {
        AudioSource::Name(_) => {
            let offset = u8::try_from(index).ok();
            (
                offset.and_then(|o| FIRST_MUTE_BUTTON.checked_add(o)),
                offset.and_then(|o| FIRST_VOLUME_KNOB.checked_add(o)),
            )
        }
        AudioSource::Detailed {
            mute_button,
            volume_knob,
            ..
        } => (*mute_button, *volume_knob),
    }
}
