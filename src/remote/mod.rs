//! Remote broadcast application boundary
//!
//! The gateway talks to OBS through [`RemoteClient`]: a handful of commands
//! plus a broadcast of change notifications. [`obs`] implements it over
//! obs-websocket; tests use an in-memory fake.

pub mod obs;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use obs::{ObsConnector, ObsRemote};

/// Capacity of the notification broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification emitted by the remote application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// The connection dropped (event stream ended)
    ConnectionClosed,
    /// The remote refused our credentials
    AuthenticationFailure,
    /// Program scene changed
    SceneSwitched { scene: String },
    /// A scene was added, removed or renamed
    SceneListChanged,
    SourceCreated { source: String },
    SourceDestroyed { source: String },
    SourceRenamed { from: String, to: String },
    SourceMuteChanged { source: String, muted: bool },
}

impl RemoteEvent {
    /// Connection-level failures that should arm a reconnect
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            RemoteEvent::ConnectionClosed | RemoteEvent::AuthenticationFailure
        )
    }
}

/// Scene list snapshot, in display order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneList {
    pub current: String,
    pub scenes: Vec<String>,
}

/// Source (OBS input) description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub kind: String,
}

/// Command/notify channel to the remote application
///
/// Methods take `&self`; implementations use interior mutability so the
/// client can be shared as `Arc<dyn RemoteClient>` between the tracker, the
/// orchestrator and control actions.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Current program scene name
    async fn current_scene(&self) -> Result<String>;

    /// All scenes plus the current one
    async fn scene_list(&self) -> Result<SceneList>;

    /// All sources (inputs)
    async fn sources_list(&self) -> Result<Vec<SourceInfo>>;

    /// Mute state of a source
    async fn is_muted(&self, source: &str) -> Result<bool>;

    async fn set_current_scene(&self, scene: &str) -> Result<()>;

    async fn toggle_mute(&self, source: &str) -> Result<()>;

    /// Set source volume as a linear multiplier (0.0-1.0)
    async fn set_volume(&self, source: &str, volume: f32) -> Result<()>;

    /// Subscribe to notifications. Each receiver sees every event sent
    /// after the call.
    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;

    /// Close the connection and stop forwarding notifications
    async fn disconnect(&self);
}

/// Opens new remote connections (one per session)
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Human readable target, for logs
    fn target(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn RemoteClient>>;
}
