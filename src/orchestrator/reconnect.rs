//! Single-shot reconnect timer

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Default delay before reconnecting
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Timer that is either idle or armed with one deadline
///
/// Arming an armed timer is a no-op, so a burst of failure notifications
/// schedules exactly one reconnect.
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer; returns false if it was already armed
    pub fn arm(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Box::pin(tokio::time::sleep_until(Instant::now() + self.delay)));
        true
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Resolves when the armed deadline passes, disarming the timer.
    /// Pending forever while idle.
    pub async fn expired(&mut self) {
        match self.deadline.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Default for ReconnectTimer {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY)
    }
}
