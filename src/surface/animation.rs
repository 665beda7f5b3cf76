//! Cooperative LED animations
//!
//! An [`Animator`] runs one repeating frame task at a time. Frames are
//! async closures; the runner checks a stop flag between frames, so
//! [`Animator::stop`] only has to wait for the frame in flight.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::led::{LedColor, LedState, LedSurface};

/// Delay between steps of the entrance sweep
const SWEEP_STEP: Duration = Duration::from_millis(25);

/// Delay between steps of the loading chaser
const CHASER_STEP: Duration = Duration::from_millis(60);

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Runner for one repeating animation
#[derive(Default)]
pub struct Animator {
    running: Option<Running>,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `frame` back to back until stopped or until a frame fails
    ///
    /// Any animation already running is stopped first.
    pub async fn animate<F, Fut>(&mut self, mut frame: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stop().await;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            while !stop_flag.load(Ordering::Acquire) {
                if let Err(e) = frame().await {
                    warn!("Animation frame failed, stopping animation: {:#}", e);
                    break;
                }
                tokio::task::yield_now().await;
            }
            debug!("Animation finished");
        });

        self.running = Some(Running { stop, handle });
    }

    /// Request cancellation and wait for the in-flight frame
    ///
    /// Once this returns no further frame runs. Calling it while idle is a
    /// no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        if let Err(e) = running.handle.await {
            if e.is_panic() {
                warn!("Animation frame panicked");
            }
        }
    }

    /// Whether frames are still being produced
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for Animator {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Release);
            running.handle.abort();
        }
    }
}

/// Light every slot in order, then clear them in the same order
///
/// Played once when the surface opens, before anything else is shown.
pub async fn entrance_sweep(surface: &LedSurface, channel: u8, slots: &[u8]) -> Result<()> {
    for color in [LedColor::GREEN, LedColor::OFF] {
        for &note in slots {
            surface.queue().enqueue(LedState::held(channel, note, color));
            surface.flush()?;
            tokio::time::sleep(SWEEP_STEP).await;
        }
    }
    Ok(())
}

/// Frame source for the "connecting" chaser
///
/// Each call lights the next slot amber and clears the previous one.
pub fn loading_chaser(
    surface: Arc<LedSurface>,
    channel: u8,
    slots: Vec<u8>,
) -> impl FnMut() -> BoxFuture<'static, Result<()>> + Send + 'static {
    let mut position = 0usize;
    move || -> BoxFuture<'static, Result<()>> {
        let surface = Arc::clone(&surface);
        let current = slots.get(position).copied();
        let previous = slots
            .get((position + slots.len().saturating_sub(1)) % slots.len().max(1))
            .copied();
        position = (position + 1) % slots.len().max(1);

        async move {
            if let (Some(current), Some(previous)) = (current, previous) {
                if previous != current {
                    surface
                        .queue()
                        .enqueue(LedState::held(channel, previous, LedColor::OFF));
                }
                surface
                    .queue()
                    .enqueue(LedState::held(channel, current, LedColor::AMBER));
                surface.flush()?;
            }
            tokio::time::sleep(CHASER_STEP).await;
            Ok(())
        }
        .boxed()
    }
}
