//! Session orchestrator
//!
//! Owns the surface ports, the OBS connection and the control set for one
//! session, and runs the single event loop that ties them together:
//!
//! - surface events are dispatched to controls (first match wins)
//! - tracker changes re-render the controls that depend on them
//! - connection failures arm a single reconnect timer
//! - reload requests tear the session down and build a new one
//!
//! Hardware port failures are fatal; everything on the OBS side is retried.

mod reconnect;

pub use reconnect::{ReconnectTimer, RECONNECT_DELAY};

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::MidiConfig;
use crate::controls::{ActionContext, Bindings, Control, RawEvent, RenderContext};
use crate::error::is_fatal;
use crate::remote::{RemoteClient, RemoteConnector, RemoteEvent};
use crate::surface::animation::{entrance_sweep, loading_chaser};
use crate::surface::{
    Animator, InputPort, LedColor, LedState, LedSurface, SurfaceBackend, IN_CONTROL_OFF,
    IN_CONTROL_ON, PAD_SLOTS,
};
use crate::tracker::{StateTracker, TrackerChange, TrackerTasks};

/// Capacity of the surface event channel
const SURFACE_CHANNEL_CAPACITY: usize = 1000;

/// Per-session hardware settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub input_port: String,
    pub output_port: String,
    /// Switch the surface into InControl mode while the session is open
    pub in_control: bool,
    pub led_channel: u8,
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(midi: &MidiConfig) -> Self {
        Self {
            input_port: midi.input_port.clone(),
            output_port: midi.output_port.clone(),
            in_control: midi.in_control,
            led_channel: midi.led_channel,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Connecting,
    Live,
}

/// Replacement pieces applied on reload
pub struct Reconfigure {
    pub settings: SessionSettings,
    pub connector: Arc<dyn RemoteConnector>,
    pub bindings: Bindings,
}

enum Command {
    Reload(Option<Box<Reconfigure>>),
    Shutdown,
}

/// Cloneable handle for requesting reloads from other tasks
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    /// Full reload, optionally with new settings and bindings
    pub async fn reload(&self, reconfigure: Option<Reconfigure>) -> Result<()> {
        self.tx
            .send(Command::Reload(reconfigure.map(Box::new)))
            .await
            .map_err(|_| anyhow::anyhow!("Orchestrator is not running"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Orchestrator is not running"))
    }
}

/// Everything bound to one connection; rebuilt wholesale on reload
#[derive(Default)]
struct Session {
    remote: Option<Arc<dyn RemoteClient>>,
    remote_events: Option<broadcast::Receiver<RemoteEvent>>,
    tracker_tasks: Option<TrackerTasks>,
    input: Option<Box<dyn InputPort>>,
    controls: Vec<Arc<Control>>,
}

pub struct Orchestrator {
    settings: SessionSettings,
    connector: Arc<dyn RemoteConnector>,
    backend: Arc<dyn SurfaceBackend>,
    bindings: Bindings,

    tracker: Arc<StateTracker>,
    tracker_changes: broadcast::Receiver<TrackerChange>,
    leds: Arc<LedSurface>,
    animator: Animator,

    session: Session,
    state: SessionState,
    reconnect: ReconnectTimer,

    surface_tx: mpsc::Sender<RawEvent>,
    surface_rx: mpsc::Receiver<RawEvent>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl Orchestrator {
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn RemoteConnector>,
        backend: Arc<dyn SurfaceBackend>,
        bindings: Bindings,
    ) -> Self {
        let tracker = Arc::new(StateTracker::new());
        let tracker_changes = tracker.subscribe();
        let (surface_tx, surface_rx) = mpsc::channel(SURFACE_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(16);

        Self {
            reconnect: ReconnectTimer::new(settings.reconnect_delay),
            settings,
            connector,
            backend,
            bindings,
            tracker,
            tracker_changes,
            leds: Arc::new(LedSurface::new()),
            animator: Animator::new(),
            session: Session::default(),
            state: SessionState::Stopped,
            surface_tx,
            surface_rx,
            commands_tx,
            commands_rx,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn leds(&self) -> &Arc<LedSurface> {
        &self.leds
    }

    /// Build a session: surface output, OBS connection, tracker, controls,
    /// surface input, first render
    pub async fn start(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        let channel = self.settings.led_channel;

        let output = self
            .backend
            .open_output(&self.settings.output_port)
            .context("Failed to open surface output")?;
        if self.settings.in_control {
            if let Err(e) = output.send(&IN_CONTROL_ON) {
                warn!("Failed to enter InControl mode: {:#}", e);
            }
        }
        info!("🎛️ Surface output: {}", output.name());
        self.leds.attach(output);

        if let Err(e) = entrance_sweep(&self.leds, channel, &PAD_SLOTS).await {
            warn!("Entrance animation failed: {:#}", e);
        }
        self.animator
            .animate(loading_chaser(Arc::clone(&self.leds), channel, PAD_SLOTS.to_vec()))
            .await;

        info!("🎬 Connecting to OBS at {}", self.connector.target());
        let remote = self.connector.connect().await?;
        self.session.remote = Some(Arc::clone(&remote));
        self.session.remote_events = Some(remote.subscribe());

        let tasks = self
            .tracker
            .init(Arc::clone(&remote))
            .await
            .context("Failed to load OBS state")?;
        self.session.tracker_tasks = Some(tasks);

        let controls = self.bindings.resolve(&self.tracker);

        let input = self
            .backend
            .open_input(&self.settings.input_port, self.surface_tx.clone())
            .context("Failed to open surface input")?;
        info!("🎛️ Surface input: {}", input.name());
        self.session.input = Some(input);

        self.animator.stop().await;
        for &slot in &PAD_SLOTS {
            self.leds
                .queue()
                .enqueue(LedState::held(channel, slot, LedColor::OFF));
        }

        for control in &controls {
            control.init(&self.tracker);
        }
        self.session.controls = controls;
        // A full render supersedes whatever the tracker reported while loading
        self.drain_tracker_changes();
        self.render(|_| true);

        self.state = SessionState::Live;
        info!(
            "✅ Surface live with {} controls (scene: {})",
            self.session.controls.len(),
            self.tracker.current_scene()
        );
        Ok(())
    }

    /// Tear the session down. Every step runs even if an earlier one fails.
    pub async fn stop(&mut self) {
        if let Some(input) = self.session.input.take() {
            debug!("Closing surface input {}", input.name());
        }
        if let Some(tasks) = self.session.tracker_tasks.take() {
            tasks.shutdown();
        }
        self.session.remote_events = None;
        if let Some(remote) = self.session.remote.take() {
            remote.disconnect().await;
        }
        self.animator.stop().await;

        if let Some(output) = self.leds.detach() {
            if self.settings.in_control {
                if let Err(e) = output.send(&IN_CONTROL_OFF) {
                    warn!("Failed to leave InControl mode: {:#}", e);
                }
            }
            debug!("Released surface output {}", output.name());
        }

        while self.surface_rx.try_recv().is_ok() {}
        self.session.controls.clear();

        if self.state != SessionState::Stopped {
            info!("Session stopped");
        }
        self.state = SessionState::Stopped;
    }

    /// Stop, then start again. Connectivity failures schedule a retry;
    /// hardware failures are returned.
    pub async fn reload(&mut self) -> Result<()> {
        self.reload_with(None).await
    }

    async fn reload_with(&mut self, reconfigure: Option<Reconfigure>) -> Result<()> {
        self.reconnect.disarm();
        self.stop().await;
        if let Some(reconfigure) = reconfigure {
            self.apply(reconfigure);
        }
        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => self.handle_start_failure(e).await,
        }
    }

    async fn handle_start_failure(&mut self, err: anyhow::Error) -> Result<()> {
        self.stop().await;
        if is_fatal(&err) {
            error!("❌ {:#}", err);
            return Err(err);
        }

        warn!(
            "Connection closed or authentication failure ({:#}). Retrying in {}s...",
            err,
            self.settings.reconnect_delay.as_secs()
        );
        self.reconnect.arm();
        Ok(())
    }

    fn apply(&mut self, reconfigure: Reconfigure) {
        self.reconnect.set_delay(reconfigure.settings.reconnect_delay);
        self.settings = reconfigure.settings;
        self.connector = reconfigure.connector;
        self.bindings = reconfigure.bindings;
    }

    /// Run until shutdown or a fatal error
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if let Err(e) = self.start().await {
            self.handle_start_failure(e).await?;
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = self.surface_rx.recv() => {
                    self.dispatch(event).await;
                }

                event = next_connection_failure(&mut self.session.remote_events) => {
                    self.on_connection_failure(&event);
                }

                change = self.tracker_changes.recv() => {
                    self.on_tracker_change(change);
                }

                _ = self.reconnect.expired() => {
                    info!("🔌 Reconnecting...");
                    self.reload().await?;
                }

                Some(command) = self.commands_rx.recv() => match command {
                    Command::Reload(reconfigure) => {
                        info!("📝 Reloading session...");
                        self.reload_with(reconfigure.map(|r| *r)).await?;
                    }
                    Command::Shutdown => break,
                },

                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping event loop");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Hand a surface event to the first control that fires on it
    pub async fn dispatch(&mut self, event: RawEvent) {
        if self.state != SessionState::Live {
            debug!("Surface not live, dropping {}", event);
            return;
        }
        let Some(remote) = self.session.remote.clone() else {
            return;
        };

        let ctx = ActionContext {
            remote,
            tracker: Arc::clone(&self.tracker),
            leds: Arc::clone(&self.leds),
            channel: self.settings.led_channel,
        };
        if !dispatch_event(&self.session.controls, &ctx, &event).await {
            debug!("Unhandled surface event: {}", event);
        }

        if !self.leds.queue().is_empty() {
            if let Err(e) = self.leds.flush() {
                warn!("Failed to flush LEDs: {:#}", e);
            }
        }
    }

    fn on_connection_failure(&mut self, event: &RemoteEvent) {
        if self.reconnect.arm() {
            warn!(
                "Connection closed or authentication failure ({:?}). Retrying in {}s...",
                event,
                self.settings.reconnect_delay.as_secs()
            );
        } else {
            debug!("Reconnect already scheduled, ignoring {:?}", event);
        }
    }

    fn on_tracker_change(&mut self, change: Result<TrackerChange, broadcast::error::RecvError>) {
        if self.state != SessionState::Live {
            return;
        }
        match change {
            Ok(change) => {
                debug!("Tracker change: {:?}", change);
                self.render(|control| control.depends_on(&change));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} tracker changes, redrawing surface", skipped);
                self.render(|_| true);
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    /// Enqueue the LED state of every matching control, then flush
    fn render(&self, filter: impl Fn(&Control) -> bool) {
        let ctx = RenderContext {
            tracker: &self.tracker,
            leds: self.leds.queue(),
            channel: self.settings.led_channel,
        };
        for control in self.session.controls.iter().filter(|c| filter(c)) {
            if let Err(e) = control.update(&ctx) {
                warn!("Failed to render control {}: {:#}", control.id(), e);
            }
        }
        if let Err(e) = self.leds.flush() {
            warn!("Failed to flush LEDs: {:#}", e);
        }
    }

    fn drain_tracker_changes(&mut self) {
        loop {
            match self.tracker_changes.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
    }
}

/// First control with a matching id that fires wins
pub async fn dispatch_event(
    controls: &[Arc<Control>],
    ctx: &ActionContext,
    event: &RawEvent,
) -> bool {
    for control in controls.iter().filter(|c| c.id() == event.id) {
        if control.handle_event(ctx, event).await {
            return true;
        }
    }
    false
}

/// Next connection-level failure on the session's notification stream.
/// Pending while there is no session.
async fn next_connection_failure(
    events: &mut Option<broadcast::Receiver<RemoteEvent>>,
) -> RemoteEvent {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(event) if event.is_connection_failure() => return event,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Skipped {} OBS events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    // Sender gone without a close notification
    *events = None;
    RemoteEvent::ConnectionClosed
}
