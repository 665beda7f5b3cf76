//! Surface controls
//!
//! A [`Control`] is one physical input (pad or knob). It decides from a raw
//! event whether it fires, runs its bound [`Action`] when it does, and
//! renders its LED through an optional [`LedStateProvider`].
//!
//! Two pad encodings exist on the Launchkey:
//!
//! - plain: `0x99` press / `0x89` release (channel 10 drum pads)
//! - InControl: `0x90` press / `0x80` (or `0x90` velocity 0) release
//!
//! Both decode to the same [`EventKind`] edges.

pub mod obs;
pub mod volume;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::midi::{format_hex, MidiMessage};
use crate::remote::RemoteClient;
use crate::surface::{LedQueue, LedSurface};
use crate::tracker::{StateTracker, TrackerChange};

/// Plain encoding press
pub const BUTTON_DOWN: u8 = 0x99;
/// Plain encoding release
pub const BUTTON_UP: u8 = 0x89;
/// Knob movement
pub const CONTROL_CHANGE: u8 = 0xB0;
/// InControl press (velocity 0 is a release)
pub const IN_CONTROL_DOWN: u8 = 0x90;
/// InControl release
pub const IN_CONTROL_UP: u8 = 0x80;

/// Decoded meaning of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Down,
    Up,
    Continuous,
    Other,
}

/// One hardware message: (status, input id, velocity)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub status: u8,
    pub id: u8,
    pub velocity: u8,
}

impl RawEvent {
    pub fn new(status: u8, id: u8, velocity: u8) -> Self {
        Self {
            status,
            id,
            velocity,
        }
    }

    /// Take a 3-byte channel message; anything else is not a surface event
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match *data {
            [status, id, velocity] if (0x80..0xF0).contains(&status) => {
                Some(Self::new(status, id & 0x7F, velocity & 0x7F))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match (self.status, self.velocity) {
            (BUTTON_DOWN, _) => EventKind::Down,
            (BUTTON_UP, _) => EventKind::Up,
            (IN_CONTROL_DOWN, 0) | (IN_CONTROL_UP, _) => EventKind::Up,
            (IN_CONTROL_DOWN, _) => EventKind::Down,
            (status, _) if status & 0xF0 == CONTROL_CHANGE => EventKind::Continuous,
            _ => EventKind::Other,
        }
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = [self.status, self.id, self.velocity];
        match MidiMessage::parse(&bytes) {
            Some(message) => write!(f, "{} ({})", format_hex(&bytes), message),
            None => write!(f, "{}", format_hex(&bytes)),
        }
    }
}

/// What a control reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Fires on the press (or release) edge with velocity 1 (or 0)
    Button { trigger_on_up: bool },
    /// Fires on non-zero (or zero) velocity, whatever the status, with the
    /// raw velocity
    AdvancedButton { trigger_on_up: bool },
    /// Fires on every control change with the raw value
    Knob,
}

/// Capabilities an action runs with
#[derive(Clone)]
pub struct ActionContext {
    pub remote: Arc<dyn RemoteClient>,
    pub tracker: Arc<StateTracker>,
    pub leds: Arc<LedSurface>,
    /// LED channel of the surface
    pub channel: u8,
}

/// A remote command bound to a control
pub type Action = Arc<dyn Fn(ActionContext, u8) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`Action`]
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(ActionContext, u8) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx, velocity| f(ctx, velocity).boxed())
}

/// What LED rendering reads from and writes to
pub struct RenderContext<'a> {
    pub tracker: &'a StateTracker,
    pub leds: &'a LedQueue,
    pub channel: u8,
}

/// Computes the LED state of a slot from the mirror
pub trait LedStateProvider: Send + Sync {
    /// Enqueue the current visual state of `slot`
    fn update_led_state(&self, ctx: &RenderContext<'_>, slot: u8) -> Result<()>;

    /// Whether a tracker change may alter the rendered state
    fn depends_on(&self, change: &TrackerChange) -> bool;

    /// Check the binding against a freshly initialized mirror
    fn init(&self, _tracker: &StateTracker) {}
}

/// LED slot plus the provider rendering it
#[derive(Clone)]
pub struct LedBinding {
    pub slot: u8,
    pub provider: Arc<dyn LedStateProvider>,
}

/// One physical input
#[derive(Clone)]
pub struct Control {
    id: u8,
    kind: ControlKind,
    action: Option<Action>,
    led: Option<LedBinding>,
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("action", &self.action.is_some())
            .field("led", &self.led.as_ref().map(|l| l.slot))
            .finish()
    }
}

impl Control {
    fn new(id: u8, kind: ControlKind) -> Self {
        Self {
            id,
            kind,
            action: None,
            led: None,
        }
    }

    /// Pad firing on press
    pub fn button(id: u8) -> Self {
        Self::new(id, ControlKind::Button { trigger_on_up: false })
    }

    /// Pad firing on non-zero velocity
    pub fn advanced_button(id: u8) -> Self {
        Self::new(id, ControlKind::AdvancedButton { trigger_on_up: false })
    }

    pub fn knob(id: u8) -> Self {
        Self::new(id, ControlKind::Knob)
    }

    /// Fire on release instead of press. No effect on knobs.
    pub fn on_release(mut self) -> Self {
        self.kind = match self.kind {
            ControlKind::Button { .. } => ControlKind::Button { trigger_on_up: true },
            ControlKind::AdvancedButton { .. } => {
                ControlKind::AdvancedButton { trigger_on_up: true }
            }
            ControlKind::Knob => ControlKind::Knob,
        };
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_led(mut self, slot: u8, provider: Arc<dyn LedStateProvider>) -> Self {
        self.led = Some(LedBinding { slot, provider });
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn led_slot(&self) -> Option<u8> {
        self.led.as_ref().map(|l| l.slot)
    }

    /// Velocity to pass to the action if this event fires the control
    pub fn trigger(&self, event: &RawEvent) -> Option<u8> {
        match self.kind {
            ControlKind::Button { trigger_on_up } => match (event.kind(), trigger_on_up) {
                (EventKind::Down, false) => Some(1),
                (EventKind::Up, true) => Some(0),
                _ => None,
            },
            ControlKind::AdvancedButton { trigger_on_up } => {
                ((event.velocity == 0) == trigger_on_up).then_some(event.velocity)
            }
            ControlKind::Knob => {
                (event.kind() == EventKind::Continuous).then_some(event.velocity)
            }
        }
    }

    /// Run the action if `event` fires this control
    ///
    /// Returns whether the control fired. A failing action is logged and
    /// still counts as fired.
    pub async fn handle_event(&self, ctx: &ActionContext, event: &RawEvent) -> bool {
        if event.id != self.id {
            return false;
        }
        let Some(velocity) = self.trigger(event) else {
            return false;
        };

        match &self.action {
            Some(action) => {
                debug!("Control {} fired with velocity {}", self.id, velocity);
                if let Err(e) = action(ctx.clone(), velocity).await {
                    warn!("Action for control {} failed: {:#}", self.id, e);
                }
            }
            None => debug!("Control {} fired, no action bound", self.id),
        }
        true
    }

    /// Enqueue the current LED state, if the control has one
    pub fn update(&self, ctx: &RenderContext<'_>) -> Result<()> {
        match &self.led {
            Some(led) => led.provider.update_led_state(ctx, led.slot),
            None => Ok(()),
        }
    }

    pub fn init(&self, tracker: &StateTracker) {
        if let Some(led) = &self.led {
            led.provider.init(tracker);
        }
    }

    pub fn depends_on(&self, change: &TrackerChange) -> bool {
        self.led
            .as_ref()
            .is_some_and(|led| led.provider.depends_on(change))
    }
}

/// Builds controls from the mirror on every start
pub type ControlBuilder = Arc<dyn Fn(&StateTracker) -> Vec<Control> + Send + Sync>;

/// Controls registered at assembly time plus deferred builders
#[derive(Clone, Default)]
pub struct Bindings {
    controls: Vec<Arc<Control>>,
    deferred: Vec<ControlBuilder>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, control: Control) {
        self.controls.push(Arc::new(control));
    }

    /// Register controls that depend on remote state (e.g. one pad per scene)
    pub fn register_deferred(&mut self, builder: ControlBuilder) {
        self.deferred.push(builder);
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty() && self.deferred.is_empty()
    }

    /// Static controls followed by whatever the builders produce now
    pub fn resolve(&self, tracker: &StateTracker) -> Vec<Arc<Control>> {
        let mut controls = self.controls.clone();
        for builder in &self.deferred {
            controls.extend(builder(tracker).into_iter().map(Arc::new));
        }
        controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{action_context, FakeRemote};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_action(counter: Arc<AtomicU32>, last: Arc<AtomicU32>) -> Action {
        action(move |_ctx, velocity| {
            let (counter, last) = (Arc::clone(&counter), Arc::clone(&last));
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                last.store(u32::from(velocity), Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
    }

    proptest! {
        #[test]
        fn prop_button_fires_only_on_matching_edge(
            status in any::<u8>(),
            id in 0u8..128,
            velocity in 0u8..128,
            trigger_on_up in any::<bool>(),
        ) {
            let mut control = Control::button(id);
            if trigger_on_up {
                control = control.on_release();
            }
            let event = RawEvent::new(status, id, velocity);

            let is_down = status == BUTTON_DOWN || (status == IN_CONTROL_DOWN && velocity > 0);
            let is_up = status == BUTTON_UP
                || status == IN_CONTROL_UP
                || (status == IN_CONTROL_DOWN && velocity == 0);

            let expected = match trigger_on_up {
                false if is_down => Some(1),
                true if is_up => Some(0),
                _ => None,
            };
            prop_assert_eq!(control.trigger(&event), expected);
        }

        #[test]
        fn prop_advanced_button_uses_velocity_only(
            status in any::<u8>(),
            velocity in 0u8..128,
            trigger_on_up in any::<bool>(),
        ) {
            let mut control = Control::advanced_button(36);
            if trigger_on_up {
                control = control.on_release();
            }
            let fired = control.trigger(&RawEvent::new(status, 36, velocity));
            if (velocity == 0) == trigger_on_up {
                prop_assert_eq!(fired, Some(velocity));
            } else {
                prop_assert_eq!(fired, None);
            }
        }

        #[test]
        fn prop_knob_passes_value_through(status in any::<u8>(), value in 0u8..128) {
            let fired = Control::knob(21).trigger(&RawEvent::new(status, 21, value));
            if status & 0xF0 == CONTROL_CHANGE {
                prop_assert_eq!(fired, Some(value));
            } else {
                prop_assert_eq!(fired, None);
            }
        }
    }

    #[test]
    fn test_raw_event_from_bytes() {
        assert_eq!(
            RawEvent::from_bytes(&[0x99, 40, 127]),
            Some(RawEvent::new(0x99, 40, 127))
        );
        assert_eq!(RawEvent::from_bytes(&[0xF8]), None);
        assert_eq!(RawEvent::from_bytes(&[0x90, 40]), None);
        assert_eq!(RawEvent::from_bytes(&[0xF0, 0x00, 0x20, 0xF7]), None);
    }

    #[tokio::test]
    async fn test_knob_action_receives_raw_value() {
        let (count, last) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let knob = Control::knob(21).with_action(counting_action(count.clone(), last.clone()));
        let ctx = action_context(FakeRemote::new(&["Live"], &[]));

        assert!(knob.handle_event(&ctx, &RawEvent::new(0xB0, 21, 64)).await);
        assert_eq!(last.load(Ordering::SeqCst), 64);
        assert!(knob.handle_event(&ctx, &RawEvent::new(0xB0, 21, 0)).await);
        assert_eq!(last.load(Ordering::SeqCst), 0);

        assert!(!knob.handle_event(&ctx, &RawEvent::new(0x99, 21, 64)).await);
        assert!(!knob.handle_event(&ctx, &RawEvent::new(0xB0, 22, 64)).await);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_action_still_counts_as_fired() {
        let pad = Control::button(40).with_action(action(|_ctx, _v| async {
            Err::<(), _>(anyhow::anyhow!("OBS not connected"))
        }));
        let ctx = action_context(FakeRemote::new(&["Live"], &[]));

        assert!(pad.handle_event(&ctx, &RawEvent::new(BUTTON_DOWN, 40, 100)).await);
    }

    #[test]
    fn test_deferred_builders_run_on_resolve() {
        let mut bindings = Bindings::new();
        bindings.register(Control::button(40));
        bindings.register_deferred(Arc::new(|tracker: &StateTracker| {
            tracker
                .scene_list()
                .iter()
                .enumerate()
                .map(|(i, _)| Control::button(96 + i as u8))
                .collect()
        }));

        let tracker = StateTracker::new();
        let ids: Vec<u8> = bindings.resolve(&tracker).iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![40]);
    }
}
