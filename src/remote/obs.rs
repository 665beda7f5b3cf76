//! OBS Studio WebSocket remote
//!
//! Maps obs-websocket v5 requests and events onto [`RemoteClient`].
//! One [`ObsRemote`] is one connection; reconnecting means asking the
//! [`ObsConnector`] for a fresh one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use obws::events::Event;
use obws::requests::inputs::Volume;
use obws::Client as ObsClient;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{RemoteClient, RemoteConnector, RemoteEvent, SceneList, SourceInfo, EVENT_CHANNEL_CAPACITY};
use crate::config::ObsConfig;
use crate::error::GatewayError;

/// Connection factory for OBS
pub struct ObsConnector {
    host: String,
    port: u16,
    password: Option<String>,
}

impl ObsConnector {
    pub fn new(host: String, port: u16, password: Option<String>) -> Self {
        Self { host, port, password }
    }

    /// Create from config
    pub fn from_config(config: &ObsConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.password.clone())
    }
}

#[async_trait]
impl RemoteConnector for ObsConnector {
    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteClient>> {
        let remote = ObsRemote::connect(&self.host, self.port, self.password.as_deref()).await?;
        Ok(Arc::new(remote))
    }
}

/// A live obs-websocket connection
pub struct ObsRemote {
    client: RwLock<Option<ObsClient>>,
    events_tx: broadcast::Sender<RemoteEvent>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ObsRemote {
    /// Connect to OBS WebSocket and start forwarding events
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        info!("🎬 Connecting to OBS at {}:{}", host, port);

        let client = ObsClient::connect(host, port, password)
            .await
            .map_err(|e| classify_connect_error(host, port, &e.to_string()))?;

        let events = client
            .events()
            .context("Failed to get OBS event stream")?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let listener = Self::spawn_event_listener(events, events_tx.clone());

        info!("✅ OBS WebSocket connected");
        Ok(Self {
            client: RwLock::new(Some(client)),
            events_tx,
            listener: parking_lot::Mutex::new(Some(listener)),
        })
    }

    /// Forward OBS events until the stream ends, then report the closed connection
    fn spawn_event_listener(
        events: impl tokio_stream::Stream<Item = Event> + Send + 'static,
        events_tx: broadcast::Sender<RemoteEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            use tokio_stream::StreamExt;

            tokio::pin!(events);
            while let Some(event) = events.next().await {
                if let Some(mapped) = map_event(event) {
                    debug!("OBS event: {:?}", mapped);
                    // No subscribers is fine (nothing is listening yet)
                    let _ = events_tx.send(mapped);
                }
            }

            warn!("🔌 OBS event stream closed");
            let _ = events_tx.send(RemoteEvent::ConnectionClosed);
        })
    }
}

fn classify_connect_error(host: &str, port: u16, message: &str) -> anyhow::Error {
    if message.to_lowercase().contains("auth") {
        GatewayError::Authentication.into()
    } else {
        GatewayError::RemoteConnect(format!("{}:{}", host, port), message.to_string()).into()
    }
}

/// Translate an obs-websocket event into a gateway notification
fn map_event(event: Event) -> Option<RemoteEvent> {
    match event {
        Event::CurrentProgramSceneChanged { name, .. } => Some(RemoteEvent::SceneSwitched { scene: name }),
        Event::SceneListChanged { .. }
        | Event::SceneCreated { .. }
        | Event::SceneRemoved { .. }
        | Event::SceneNameChanged { .. } => Some(RemoteEvent::SceneListChanged),
        Event::InputCreated { name, .. } => Some(RemoteEvent::SourceCreated { source: name }),
        Event::InputRemoved { name, .. } => Some(RemoteEvent::SourceDestroyed { source: name }),
        Event::InputNameChanged {
            old_name, new_name, ..
        } => Some(RemoteEvent::SourceRenamed {
            from: old_name,
            to: new_name,
        }),
        Event::InputMuteStateChanged { name, muted, .. } => {
            Some(RemoteEvent::SourceMuteChanged { source: name, muted })
        }
        _ => None,
    }
}

#[async_trait]
impl RemoteClient for ObsRemote {
    async fn current_scene(&self) -> Result<String> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        Ok(client.scenes().current_program_scene().await?)
    }

    async fn scene_list(&self) -> Result<SceneList> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;

        let mut scenes = client.scenes().list().await?.scenes;
        // OBS reports the bottom of its scene dock first
        scenes.sort_by(|a, b| b.index.cmp(&a.index));
        let current = client.scenes().current_program_scene().await?;

        Ok(SceneList {
            current,
            scenes: scenes.into_iter().map(|s| s.name).collect(),
        })
    }

    async fn sources_list(&self) -> Result<Vec<SourceInfo>> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;

        let inputs = client.inputs().list(None).await?;
        Ok(inputs
            .into_iter()
            .map(|input| SourceInfo {
                name: input.name,
                kind: input.kind,
            })
            .collect())
    }

    async fn is_muted(&self, source: &str) -> Result<bool> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        client
            .inputs()
            .muted(source)
            .await
            .with_context(|| format!("Failed to get mute state of '{}'", source))
    }

    async fn set_current_scene(&self, scene: &str) -> Result<()> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        client
            .scenes()
            .set_current_program_scene(scene)
            .await
            .with_context(|| format!("Failed to switch to scene '{}'", scene))
    }

    async fn toggle_mute(&self, source: &str) -> Result<()> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        client
            .inputs()
            .toggle_mute(source)
            .await
            .with_context(|| format!("Failed to toggle mute of '{}'", source))?;
        Ok(())
    }

    async fn set_volume(&self, source: &str, volume: f32) -> Result<()> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        client
            .inputs()
            .set_volume(source, Volume::Mul(volume.clamp(0.0, 1.0)))
            .await
            .with_context(|| format!("Failed to set volume of '{}'", source))
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events_tx.subscribe()
    }

    async fn disconnect(&self) {
        // Stop forwarding first so a deliberate close is not reported as a drop
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if let Some(client) = self.client.write().await.take() {
            drop(client);
            info!("OBS WebSocket disconnected");
        }
    }
}

impl Drop for ObsRemote {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
