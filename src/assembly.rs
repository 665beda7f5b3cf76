//! Control assembly from configuration

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{audio_source_ids, ObsConfig};
use crate::controls::obs::{mute_button, scene_button, volume_knob};
use crate::controls::{Bindings, Control};
use crate::tracker::StateTracker;

/// Build the control set described by the OBS section
///
/// Audio sources get a mute pad and a volume knob, scene buttons a fixed
/// scene pad. `auto_scene_buttons` registers a deferred builder that lays out
/// one pad per scene each time the session starts.
pub fn build_bindings(obs: &ObsConfig) -> Bindings {
    let mut bindings = Bindings::new();

    for (index, source) in obs.audio_sources.iter().enumerate() {
        let (mute, knob) = audio_source_ids(index, source);
        if let Some(id) = mute {
            debug!("Pad {} toggles mute of '{}'", id, source.name());
            bindings.register(mute_button(id, source.name()));
        }
        if let Some(id) = knob {
            debug!("Knob {} sets volume of '{}'", id, source.name());
            bindings.register(volume_knob(id, source.name(), obs.volume_curve));
        }
    }

    for button in &obs.scene_buttons {
        debug!("Pad {} switches to scene '{}'", button.id, button.scene);
        bindings.register(scene_button(button.id, button.scene.clone()));
    }

    if let Some(auto) = obs.auto_scene_buttons.clone() {
        bindings.register_deferred(Arc::new(move |tracker: &StateTracker| {
            scene_pads(tracker, auto.first_id, auto.max)
        }));
    }

    info!("Assembled {} static controls", bindings.len());
    bindings
}

fn scene_pads(tracker: &StateTracker, first_id: u8, max: u8) -> Vec<Control> {
    tracker
        .scene_list()
        .into_iter()
        .take(usize::from(max))
        .zip(first_id..)
        .map(|(scene, id)| scene_button(id, scene))
        .collect()
}
