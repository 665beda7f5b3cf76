//! In-memory fakes for tests

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::controls::{ActionContext, RawEvent};
use crate::error::{GatewayError, PortDirection};
use crate::remote::{RemoteClient, RemoteConnector, RemoteEvent, SceneList, SourceInfo};
use crate::surface::{InputPort, LedPort, LedSurface, PortInfo, SurfaceBackend};
use crate::tracker::StateTracker;

#[derive(Default)]
struct FakeObs {
    current: String,
    scenes: Vec<String>,
    sources: Vec<String>,
    muted: HashMap<String, bool>,
    no_audio: HashSet<String>,
    set_scene_calls: Vec<String>,
    toggle_calls: Vec<String>,
    volume_calls: Vec<(String, f32)>,
}

/// Scriptable stand-in for OBS
pub struct FakeRemote {
    state: Mutex<FakeObs>,
    latency: Mutex<Duration>,
    events: broadcast::Sender<RemoteEvent>,
    scene_list_calls: AtomicUsize,
    sources_list_calls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeRemote {
    pub fn new(scenes: &[&str], sources: &[&str]) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let state = FakeObs {
            current: scenes.first().map(|s| s.to_string()).unwrap_or_default(),
            scenes: scenes.iter().map(|s| s.to_string()).collect(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
            latency: Mutex::new(Duration::ZERO),
            events,
            scene_list_calls: AtomicUsize::new(0),
            sources_list_calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn set_current(&self, scene: &str) {
        self.state.lock().current = scene.to_string();
    }

    pub fn set_muted(&self, source: &str, muted: bool) {
        self.state.lock().muted.insert(source.to_string(), muted);
    }

    /// Source without audio: mute queries fail
    pub fn set_no_audio(&self, source: &str) {
        self.state.lock().no_audio.insert(source.to_string());
    }

    pub fn add_source(&self, source: &str) {
        self.state.lock().sources.push(source.to_string());
    }

    /// Delay applied to every query
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn emit(&self, event: RemoteEvent) {
        let _ = self.events.send(event);
    }

    pub fn scene_list_calls(&self) -> usize {
        self.scene_list_calls.load(Ordering::SeqCst)
    }

    pub fn sources_list_calls(&self) -> usize {
        self.sources_list_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_scene_calls(&self) -> Vec<String> {
        self.state.lock().set_scene_calls.clone()
    }

    pub fn toggle_calls(&self) -> Vec<String> {
        self.state.lock().toggle_calls.clone()
    }

    pub fn volume_calls(&self) -> Vec<(String, f32)> {
        self.state.lock().volume_calls.clone()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn current_scene(&self) -> Result<String> {
        self.delay().await;
        Ok(self.state.lock().current.clone())
    }

    async fn scene_list(&self) -> Result<SceneList> {
        self.scene_list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let state = self.state.lock();
        Ok(SceneList {
            current: state.current.clone(),
            scenes: state.scenes.clone(),
        })
    }

    async fn sources_list(&self) -> Result<Vec<SourceInfo>> {
        self.sources_list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self
            .state
            .lock()
            .sources
            .iter()
            .map(|name| SourceInfo {
                name: name.clone(),
                kind: "fake_input".to_string(),
            })
            .collect())
    }

    async fn is_muted(&self, source: &str) -> Result<bool> {
        self.delay().await;
        let state = self.state.lock();
        if state.no_audio.contains(source) {
            anyhow::bail!("'{}' has no audio", source);
        }
        Ok(state.muted.get(source).copied().unwrap_or(false))
    }

    async fn set_current_scene(&self, scene: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.set_scene_calls.push(scene.to_string());
        if !state.scenes.iter().any(|s| s == scene) {
            anyhow::bail!("No scene named '{}'", scene);
        }
        Ok(())
    }

    async fn toggle_mute(&self, source: &str) -> Result<()> {
        self.state.lock().toggle_calls.push(source.to_string());
        Ok(())
    }

    async fn set_volume(&self, source: &str, volume: f32) -> Result<()> {
        self.state
            .lock()
            .volume_calls
            .push((source.to_string(), volume));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out one shared [`FakeRemote`]
pub struct FakeConnector {
    remote: Arc<FakeRemote>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeConnector {
    pub fn new(remote: Arc<FakeRemote>) -> Arc<Self> {
        Arc::new(Self {
            remote,
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        })
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    fn target(&self) -> String {
        "fake:4455".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::RemoteConnect(self.target(), "connection refused".into()).into());
        }
        Ok(self.remote.clone())
    }
}

/// Output port recording everything sent to it
pub struct RecordingPort {
    name: String,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPort {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl LedPort for RecordingPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.sent.lock().push(data.to_vec());
        Ok(())
    }
}

struct FakeInput {
    name: String,
}

impl InputPort for FakeInput {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Surface backend with one recording output and an injectable input
pub struct FakeBackend {
    output: Arc<RecordingPort>,
    input: Mutex<Option<mpsc::Sender<RawEvent>>>,
    missing_input: bool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            output: RecordingPort::new("Fake Launchkey"),
            input: Mutex::new(None),
            missing_input: false,
        })
    }

    /// Backend whose input port can never be found
    pub fn without_input() -> Arc<Self> {
        Arc::new(Self {
            output: RecordingPort::new("Fake Launchkey"),
            input: Mutex::new(None),
            missing_input: true,
        })
    }

    pub fn output(&self) -> &Arc<RecordingPort> {
        &self.output
    }

    /// Push an event as if the surface sent it
    pub async fn press(&self, event: RawEvent) {
        let tx = self.input.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

impl SurfaceBackend for FakeBackend {
    fn open_output(&self, _pattern: &str) -> Result<Arc<dyn LedPort>> {
        Ok(self.output.clone())
    }

    fn open_input(
        &self,
        pattern: &str,
        events: mpsc::Sender<RawEvent>,
    ) -> Result<Box<dyn InputPort>> {
        if self.missing_input {
            return Err(GatewayError::PortNotFound(PortDirection::Input, pattern.to_string()).into());
        }
        *self.input.lock() = Some(events);
        Ok(Box::new(FakeInput {
            name: "Fake Launchkey".to_string(),
        }))
    }

    fn list_ports(&self) -> Result<(Vec<PortInfo>, Vec<PortInfo>)> {
        let port = PortInfo {
            index: 0,
            name: "Fake Launchkey".to_string(),
            is_virtual: false,
        };
        Ok((vec![port.clone()], vec![port]))
    }
}

/// Action context over a fresh tracker and an unattached LED surface
pub fn action_context(remote: Arc<FakeRemote>) -> ActionContext {
    ActionContext {
        remote,
        tracker: Arc::new(StateTracker::new()),
        leds: Arc::new(LedSurface::new()),
        channel: 0,
    }
}
