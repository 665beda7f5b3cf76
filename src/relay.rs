//! Now-playing relay
//!
//! Polls the desktop media player through `playerctl` and pushes the track
//! metadata to a stream widget over a websocket. Runs independently of the
//! surface session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

/// Delay before reopening a closed websocket
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// playerctl template: one field per line
const PLAYERCTL_FORMAT: &str = "{{status}}\n{{artist}}\n{{title}}\n{{album}}\n{{mpris:artUrl}}";

/// Track payload sent to the widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackMetadata {
    pub playing: bool,
    pub author: String,
    pub title: String,
    pub album: String,
    #[serde(rename = "artUrl")]
    pub art_url: String,
}

#[derive(Serialize)]
struct Announce<'a> {
    token: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Parse `playerctl metadata -f` output in [`PLAYERCTL_FORMAT`] order
pub fn parse_metadata(output: &str) -> TrackMetadata {
    let mut lines = output.lines();
    let mut next = || lines.next().unwrap_or_default().to_string();

    let status = next();
    let author = next();
    let title = next();
    let album = next();
    // Spotify reports cover art on a host that does not serve images
    let art_url = next().replace("open.spotify.com", "i.scdn.co");

    TrackMetadata {
        playing: status == "Playing",
        author,
        title,
        album,
        art_url,
    }
}

/// Where the metadata comes from
#[async_trait]
pub trait NowPlaying: Send + Sync {
    /// Raw metadata in [`PLAYERCTL_FORMAT`] layout
    async fn read(&self) -> Result<String>;
}

/// Reads the active MPRIS player through the playerctl CLI
pub struct Playerctl;

#[async_trait]
impl NowPlaying for Playerctl {
    async fn read(&self) -> Result<String> {
        let output = Command::new("playerctl")
            .args(["metadata", "-f", PLAYERCTL_FORMAT])
            .output()
            .await
            .context("Failed to run playerctl")?;

        if !output.status.success() {
            anyhow::bail!(
                "playerctl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Remembers the last payload so unchanged metadata is not resent
#[derive(Debug, Default)]
struct ChangeFilter {
    last_sent: Option<String>,
}

impl ChangeFilter {
    fn should_send(&mut self, payload: &str) -> bool {
        if self.last_sent.as_deref() == Some(payload) {
            return false;
        }
        self.last_sent = Some(payload.to_string());
        true
    }
}

/// Start the relay in the background
///
/// Returns None when the relay has no usable token.
pub fn spawn(config: &RelayConfig) -> Option<JoinHandle<()>> {
    spawn_with(config, Playerctl)
}

pub fn spawn_with(config: &RelayConfig, source: impl NowPlaying + 'static) -> Option<JoinHandle<()>> {
    if !config.is_enabled() {
        warn!("Now-playing relay not started due to missing token.");
        return None;
    }

    let config = config.clone();
    Some(tokio::spawn(async move {
        loop {
            match run_session(&config, &source).await {
                Ok(()) => info!("Relay websocket closed. Retrying in {}s...", RETRY_DELAY.as_secs()),
                Err(e) => warn!(
                    "Relay websocket failed: {:#}. Retrying in {}s...",
                    e,
                    RETRY_DELAY.as_secs()
                ),
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }))
}

/// One websocket connection: announce, wait for the first reply, then
/// publish changes until the socket closes
async fn run_session(config: &RelayConfig, source: &dyn NowPlaying) -> Result<()> {
    let (ws_stream, _) = connect_async(config.url.as_str())
        .await
        .with_context(|| format!("Failed to connect relay websocket: {}", config.url))?;
    let (mut sink, mut stream) = ws_stream.split();

    let announce = serde_json::to_string(&Announce {
        token: config.token.as_deref().unwrap_or_default(),
        kind: "emitter",
    })?;
    sink.send(Message::Text(announce)).await?;

    let mut ready = false;
    let mut filter = ChangeFilter::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms));

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {
                    if !ready {
                        info!("🎵 Relay websocket ready!");
                        ready = true;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
            },

            _ = ticker.tick(), if ready => {
                let raw = match source.read().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!("No player metadata: {:#}", e);
                        continue;
                    }
                };
                let payload = serde_json::to_string(&parse_metadata(&raw))?;
                if filter.should_send(&payload) {
                    debug!("Relay out: {}", payload);
                    sink.send(Message::Text(payload)).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    struct FixedTrack(Arc<parking_lot::Mutex<String>>);

    #[async_trait]
    impl NowPlaying for FixedTrack {
        async fn read(&self) -> Result<String> {
            Ok(self.0.lock().clone())
        }
    }

    #[test]
    fn test_parse_metadata() {
        let track = parse_metadata(
            "Playing\nDaft Punk\nOne More Time\nDiscovery\nhttps://open.spotify.com/image/ab67\n",
        );
        assert_eq!(
            track,
            TrackMetadata {
                playing: true,
                author: "Daft Punk".into(),
                title: "One More Time".into(),
                album: "Discovery".into(),
                art_url: "https://i.scdn.co/image/ab67".into(),
            }
        );

        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["artUrl"], "https://i.scdn.co/image/ab67");
    }

    #[test]
    fn test_parse_partial_metadata() {
        let track = parse_metadata("Paused\nSomeone\n");
        assert!(!track.playing);
        assert_eq!(track.author, "Someone");
        assert_eq!(track.title, "");
        assert_eq!(track.art_url, "");
    }

    #[test]
    fn test_change_filter() {
        let mut filter = ChangeFilter::default();
        assert!(filter.should_send("a"));
        assert!(!filter.should_send("a"));
        assert!(filter.should_send("b"));
        assert!(filter.should_send("a"));
    }

    #[tokio::test]
    async fn test_relay_without_token_is_not_started() {
        let config = RelayConfig {
            url: "ws://127.0.0.1:1".into(),
            token: None,
            interval_ms: 1000,
        };
        assert!(spawn(&config).is_none());
    }

    #[tokio::test]
    async fn test_relay_announces_then_sends_changes_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let track = Arc::new(parking_lot::Mutex::new("Playing\nA\nB\nC\n".to_string()));

        let relay = spawn_with(
            &RelayConfig {
                url,
                token: Some("abc".into()),
                interval_ms: 20,
            },
            FixedTrack(track.clone()),
        )
        .unwrap();

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let hello = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let hello: serde_json::Value = serde_json::from_str(&hello).unwrap();
        assert_eq!(hello, serde_json::json!({"token": "abc", "type": "emitter"}));

        ws.send(Message::Text("ok".into())).await.unwrap();

        let first = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["title"], "B");
        assert_eq!(first["playing"], true);

        // Unchanged metadata is not resent
        let quiet = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
        assert!(quiet.is_err());

        *track.lock() = "Paused\nA\nB\nC\n".to_string();
        let second = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["playing"], false);

        relay.abort();
    }
}
