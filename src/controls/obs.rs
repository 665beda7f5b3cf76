//! OBS-bound controls: scene pads, mute pads, volume knobs

use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use super::volume::VolumeCurve;
use super::{action, Control, LedStateProvider, RenderContext};
use crate::surface::{LedColor, LedState};
use crate::tracker::{StateTracker, TrackerChange};

/// Green when the scene is on program, red otherwise
pub struct SceneIndicator {
    scene: String,
}

impl SceneIndicator {
    pub fn new(scene: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
        }
    }
}

impl LedStateProvider for SceneIndicator {
    fn update_led_state(&self, ctx: &RenderContext<'_>, slot: u8) -> Result<()> {
        let color = if ctx.tracker.current_scene() == self.scene {
            LedColor::GREEN
        } else {
            LedColor::RED
        };
        ctx.leds.enqueue(LedState::held(ctx.channel, slot, color));
        Ok(())
    }

    fn depends_on(&self, change: &TrackerChange) -> bool {
        matches!(
            change,
            TrackerChange::SceneSwitched { .. } | TrackerChange::ScenesRefreshed
        )
    }

    fn init(&self, tracker: &StateTracker) {
        if !tracker.scene_list().contains(&self.scene) {
            warn!("Scene '{}' does not exist in OBS", self.scene);
        }
    }
}

/// Red when the source is muted, green otherwise
pub struct MuteIndicator {
    source: String,
}

impl MuteIndicator {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl LedStateProvider for MuteIndicator {
    fn update_led_state(&self, ctx: &RenderContext<'_>, slot: u8) -> Result<()> {
        let color = if ctx.tracker.is_source_muted(&self.source) {
            LedColor::RED
        } else {
            LedColor::GREEN
        };
        ctx.leds.enqueue(LedState::held(ctx.channel, slot, color));
        Ok(())
    }

    fn depends_on(&self, change: &TrackerChange) -> bool {
        match change {
            TrackerChange::MuteChanged { source, .. } => *source == self.source,
            TrackerChange::SourcesRefreshed => true,
            _ => false,
        }
    }

    fn init(&self, tracker: &StateTracker) {
        if tracker.mute_state(&self.source).is_none() {
            warn!("Source '{}' has no mute state in OBS", self.source);
        }
    }
}

/// Pad switching the program scene
///
/// Pressing it while another scene is live shows amber until OBS confirms
/// the switch. A refused switch puts the pad back to its real state.
pub fn scene_button(id: u8, scene: impl Into<String>) -> Control {
    let scene: String = scene.into();
    let indicator = Arc::new(SceneIndicator::new(scene.clone()));
    let scene = Arc::new(scene);
    let pending_indicator = Arc::clone(&indicator);

    Control::button(id)
        .with_action(action(move |ctx, _velocity| {
            let (scene, indicator) = (Arc::clone(&scene), Arc::clone(&pending_indicator));
            async move {
                let pending = ctx.tracker.current_scene() != *scene;
                if pending {
                    ctx.leds
                        .queue()
                        .enqueue(LedState::held(ctx.channel, id, LedColor::AMBER));
                    ctx.leds.flush()?;
                }

                let result = ctx.remote.set_current_scene(&scene).await;
                if result.is_err() && pending {
                    let render = RenderContext {
                        tracker: &ctx.tracker,
                        leds: ctx.leds.queue(),
                        channel: ctx.channel,
                    };
                    indicator.update_led_state(&render, id)?;
                    ctx.leds.flush()?;
                }
                result
            }
        }))
        .with_led(id, indicator)
}

/// Pad toggling a source's mute state
pub fn mute_button(id: u8, source: impl Into<String>) -> Control {
    let source: String = source.into();
    let indicator = Arc::new(MuteIndicator::new(source.clone()));
    let source = Arc::new(source);

    Control::button(id)
        .with_action(action(move |ctx, _velocity| {
            let source = Arc::clone(&source);
            async move { ctx.remote.toggle_mute(&source).await }
        }))
        .with_led(id, indicator)
}

/// Knob driving a source's volume
pub fn volume_knob(id: u8, source: impl Into<String>, curve: VolumeCurve) -> Control {
    let source = Arc::new(source.into());

    Control::knob(id).with_action(action(move |ctx, value| {
        let source = Arc::clone(&source);
        async move { ctx.remote.set_volume(&source, curve.apply(value)).await }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{RawEvent, BUTTON_DOWN};
    use crate::surface::LedQueue;
    use crate::testing::{action_context, FakeRemote, RecordingPort};

    #[tokio::test]
    async fn test_scene_button_shows_pending_then_switches() {
        let remote = FakeRemote::new(&["Intro", "Live"], &[]);
        let ctx = action_context(remote.clone());
        ctx.tracker.init(remote.clone()).await.unwrap().shutdown();
        let port = RecordingPort::new("pads");
        ctx.leds.attach(port.clone());

        let pad = scene_button(97, "Live");
        assert!(pad.handle_event(&ctx, &RawEvent::new(BUTTON_DOWN, 97, 127)).await);

        assert_eq!(port.sent(), vec![vec![0x90, 97, 0x13]]);
        assert_eq!(remote.set_scene_calls(), vec!["Live".to_string()]);
    }

    #[tokio::test]
    async fn test_scene_button_on_current_scene_skips_pending() {
        let remote = FakeRemote::new(&["Intro", "Live"], &[]);
        let ctx = action_context(remote.clone());
        ctx.tracker.init(remote.clone()).await.unwrap().shutdown();
        let port = RecordingPort::new("pads");
        ctx.leds.attach(port.clone());

        let pad = scene_button(96, "Intro");
        assert!(pad.handle_event(&ctx, &RawEvent::new(BUTTON_DOWN, 96, 127)).await);

        assert!(port.sent().is_empty());
        assert_eq!(remote.set_scene_calls(), vec!["Intro".to_string()]);
    }

    #[tokio::test]
    async fn test_refused_scene_switch_clears_pending() {
        let remote = FakeRemote::new(&["Intro", "Live"], &[]);
        let ctx = action_context(remote.clone());
        ctx.tracker.init(remote.clone()).await.unwrap().shutdown();
        let port = RecordingPort::new("pads");
        ctx.leds.attach(port.clone());

        // Scene renamed in OBS after the pad was bound
        let pad = scene_button(98, "Old Name");
        assert!(pad.handle_event(&ctx, &RawEvent::new(BUTTON_DOWN, 98, 127)).await);

        assert_eq!(port.sent(), vec![vec![0x90, 98, 0x13], vec![0x90, 98, 0x03]]);
        assert_eq!(remote.set_scene_calls(), vec!["Old Name".to_string()]);
    }

    #[tokio::test]
    async fn test_indicators_render_from_mirror() {
        let remote = FakeRemote::new(&["Intro", "Live"], &["Mic/Aux", "Desktop Audio"]);
        remote.set_muted("Mic/Aux", true);
        let tracker = Arc::new(StateTracker::new());
        tracker.init(remote.clone()).await.unwrap().shutdown();

        let leds = LedQueue::new();
        let render = RenderContext {
            tracker: &tracker,
            leds: &leds,
            channel: 0,
        };
        scene_button(96, "Intro").update(&render).unwrap();
        scene_button(97, "Live").update(&render).unwrap();
        mute_button(40, "Mic/Aux").update(&render).unwrap();
        mute_button(41, "Desktop Audio").update(&render).unwrap();
        volume_knob(21, "Mic/Aux", VolumeCurve::Fader).update(&render).unwrap();

        let colors: Vec<(u8, LedColor)> = leds.snapshot().iter().map(|s| (s.note, s.color)).collect();
        assert_eq!(
            colors,
            vec![
                (96, LedColor::GREEN),
                (97, LedColor::RED),
                (40, LedColor::RED),
                (41, LedColor::GREEN),
            ]
        );
    }

    #[test]
    fn test_mute_indicator_dependencies() {
        let pad = mute_button(40, "Mic/Aux");
        assert!(pad.depends_on(&TrackerChange::MuteChanged {
            source: "Mic/Aux".into(),
            muted: true,
        }));
        assert!(!pad.depends_on(&TrackerChange::MuteChanged {
            source: "Desktop Audio".into(),
            muted: true,
        }));
        assert!(pad.depends_on(&TrackerChange::SourcesRefreshed));
        assert!(!pad.depends_on(&TrackerChange::SceneSwitched {
            scene: "Live".into(),
        }));
        assert!(!volume_knob(21, "Mic/Aux", VolumeCurve::Linear).depends_on(&TrackerChange::SourcesRefreshed));
    }

    #[tokio::test]
    async fn test_volume_knob_sets_curved_volume() {
        let remote = FakeRemote::new(&["Live"], &["Mic/Aux"]);
        let ctx = action_context(remote.clone());

        let knob = volume_knob(21, "Mic/Aux", VolumeCurve::Linear);
        assert!(knob.handle_event(&ctx, &RawEvent::new(0xB0, 21, 127)).await);

        assert_eq!(remote.volume_calls(), vec![("Mic/Aux".to_string(), 1.0)]);
    }
}
