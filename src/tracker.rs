//! OBS state tracker
//!
//! Local mirror of the remote scene list, current scene, source list and
//! per-source mute state. Controls read it synchronously while rendering; it
//! is kept current by remote notifications:
//!
//! - scene switches update the current scene in place
//! - scene list / source topology changes trigger an async refetch
//! - mute changes update the mute map in place
//!
//! Refetches are coalesced per kind: while one is in flight, at most one more
//! is queued no matter how many notifications arrive. Mute changes that land
//! while a source refetch is in flight are replayed over its answers, which
//! may predate them.
//!
//! Every applied change is re-broadcast as a [`TrackerChange`] so the
//! orchestrator can re-render the controls that depend on it.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::remote::{RemoteClient, RemoteEvent, SourceInfo};

/// Capacity of the change broadcast channel
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change applied to the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerChange {
    SceneSwitched { scene: String },
    ScenesRefreshed,
    SourcesRefreshed,
    MuteChanged { source: String, muted: bool },
}

#[derive(Debug, Default)]
struct Mirror {
    current_scene: String,
    scenes: Vec<String>,
    sources: Vec<SourceInfo>,
    muted: HashMap<String, bool>,
    /// Mute notifications seen since the in-flight source refetch started
    mutes_during_refresh: Option<HashMap<String, bool>>,
}

/// Which list a refetch rebuilds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshKind {
    Scenes,
    Sources,
}

/// Single-slot refresh queue feeding one worker task
#[derive(Clone)]
struct RefreshQueue {
    kind: RefreshKind,
    tx: mpsc::Sender<()>,
}

impl RefreshQueue {
    fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) => debug!("{:?} refresh queued", self.kind),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("{:?} refresh already pending, coalesced", self.kind)
            }
            Err(mpsc::error::TrySendError::Closed(())) => {}
        }
    }
}

/// Background tasks bound to one remote connection
///
/// Dropping (or [`TrackerTasks::shutdown`]) aborts the notification listener
/// and the refresh workers.
pub struct TrackerTasks {
    handles: Vec<JoinHandle<()>>,
}

impl TrackerTasks {
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TrackerTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Mirror of remote OBS state
pub struct StateTracker {
    mirror: RwLock<Mirror>,
    changes: broadcast::Sender<TrackerChange>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            mirror: RwLock::new(Mirror::default()),
            changes,
        }
    }

    /// Subscribe to applied changes
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerChange> {
        self.changes.subscribe()
    }

    /// Bind the tracker to a fresh connection
    ///
    /// Subscribes to notifications before the initial fetch, so events that
    /// arrive while fetching are applied on top of the snapshot afterwards.
    pub async fn init(self: &Arc<Self>, remote: Arc<dyn RemoteClient>) -> Result<TrackerTasks> {
        let mut events = remote.subscribe();
        *self.mirror.write() = Mirror::default();

        let current = remote
            .current_scene()
            .await
            .context("Failed to get current scene")?;
        self.set_scene(current);
        self.refresh_scenes(remote.as_ref()).await?;
        self.refresh_sources(remote.as_ref()).await?;

        let (scenes, scenes_worker) = self.spawn_refresh_worker(RefreshKind::Scenes, &remote);
        let (sources, sources_worker) = self.spawn_refresh_worker(RefreshKind::Sources, &remote);

        let tracker = Arc::clone(self);
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => tracker.apply_event(&event, &scenes, &sources),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("State tracker missed {} OBS events, refreshing", skipped);
                        scenes.request();
                        sources.request();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("State tracker listener stopped");
        });

        Ok(TrackerTasks {
            handles: vec![listener, scenes_worker, sources_worker],
        })
    }

    fn spawn_refresh_worker(
        self: &Arc<Self>,
        kind: RefreshKind,
        remote: &Arc<dyn RemoteClient>,
    ) -> (RefreshQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(1);
        let tracker = Arc::clone(self);
        let remote = Arc::clone(remote);

        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let result = match kind {
                    RefreshKind::Scenes => tracker.refresh_scenes(remote.as_ref()).await,
                    RefreshKind::Sources => tracker.refresh_sources(remote.as_ref()).await,
                };
                if let Err(e) = result {
                    warn!("{:?} refresh failed: {:#}", kind, e);
                }
            }
        });

        (RefreshQueue { kind, tx }, handle)
    }

    fn apply_event(&self, event: &RemoteEvent, scenes: &RefreshQueue, sources: &RefreshQueue) {
        match event {
            RemoteEvent::SceneSwitched { scene } => self.set_scene(scene.clone()),
            RemoteEvent::SceneListChanged => {
                info!("Scenes changed.");
                scenes.request();
            }
            RemoteEvent::SourceCreated { .. }
            | RemoteEvent::SourceDestroyed { .. }
            | RemoteEvent::SourceRenamed { .. } => sources.request(),
            RemoteEvent::SourceMuteChanged { source, muted } => self.set_muted(source, *muted),
            RemoteEvent::ConnectionClosed | RemoteEvent::AuthenticationFailure => {}
        }
    }

    fn set_scene(&self, scene: String) {
        {
            let mut mirror = self.mirror.write();
            if mirror.current_scene == scene {
                return;
            }
            mirror.current_scene = scene.clone();
        }
        info!("Scene switched to {}", scene);
        let _ = self.changes.send(TrackerChange::SceneSwitched { scene });
    }

    fn set_muted(&self, source: &str, muted: bool) {
        {
            let mut mirror = self.mirror.write();
            if let Some(seen) = mirror.mutes_during_refresh.as_mut() {
                seen.insert(source.to_string(), muted);
            }
            if !mirror.sources.iter().any(|s| s.name == source) {
                // Unknown until the pending source refetch lands
                debug!("Mute change for unknown source '{}' deferred", source);
                return;
            }
            mirror.muted.insert(source.to_string(), muted);
        }
        debug!("Source '{}' muted={}", source, muted);
        let _ = self.changes.send(TrackerChange::MuteChanged {
            source: source.to_string(),
            muted,
        });
    }

    async fn refresh_scenes(&self, remote: &dyn RemoteClient) -> Result<()> {
        let list = remote
            .scene_list()
            .await
            .context("Failed to get scene list")?;

        self.mirror.write().scenes = list.scenes;
        let _ = self.changes.send(TrackerChange::ScenesRefreshed);
        self.set_scene(list.current);
        Ok(())
    }

    async fn refresh_sources(&self, remote: &dyn RemoteClient) -> Result<()> {
        self.mirror.write().mutes_during_refresh = Some(HashMap::new());
        let fetched = Self::fetch_sources(remote).await;

        {
            let mut mirror = self.mirror.write();
            let seen = mirror.mutes_during_refresh.take().unwrap_or_default();
            let (sources, mut muted) = fetched?;
            for (source, state) in seen {
                if sources.iter().any(|s| s.name == source) {
                    debug!("> {} muted={} (changed while loading)", source, state);
                    muted.insert(source, state);
                }
            }
            mirror.sources = sources;
            mirror.muted = muted;
        }
        let _ = self.changes.send(TrackerChange::SourcesRefreshed);
        Ok(())
    }

    /// Source list plus the mute state of every source that has one
    async fn fetch_sources(
        remote: &dyn RemoteClient,
    ) -> Result<(Vec<SourceInfo>, HashMap<String, bool>)> {
        let sources = remote
            .sources_list()
            .await
            .context("Failed to get sources list")?;

        info!("Loading source mute states...");
        let mut muted = HashMap::new();
        for source in &sources {
            match remote.is_muted(&source.name).await {
                Ok(state) => {
                    debug!("> {} muted={}", source.name, state);
                    muted.insert(source.name.clone(), state);
                }
                // Sources without audio have no mute state
                Err(e) => debug!("> {} has no mute state: {:#}", source.name, e),
            }
        }

        Ok((sources, muted))
    }

    pub fn current_scene(&self) -> String {
        self.mirror.read().current_scene.clone()
    }

    pub fn scene_list(&self) -> Vec<String> {
        self.mirror.read().scenes.clone()
    }

    pub fn sources_list(&self) -> Vec<String> {
        self.mirror
            .read()
            .sources
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Mute state of a source; unknown sources read as unmuted
    pub fn is_source_muted(&self, source: &str) -> bool {
        self.mute_state(source).unwrap_or(false)
    }

    pub fn mute_state(&self, source: &str) -> Option<bool> {
        self.mirror.read().muted.get(source).copied()
    }
}
