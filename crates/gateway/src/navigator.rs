//! Client navigation hook
//!
//! The gateway and scheduler end a session by sending the user to the login
//! entry point. What "navigate" means is up to the embedder; a CLI just logs
//! it and lets the main loop react.

use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::warn;

/// Receives forced navigations (always to the login route today).
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator for headless clients: logs, remembers the route, wakes waiters.
#[derive(Default)]
pub struct LogNavigator {
    last: Mutex<Option<String>>,
    notify: Notify,
}

impl LogNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent route navigated to.
    pub fn last_route(&self) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves on the next navigation, or immediately if one happened
    /// since the last call.
    pub async fn navigated(&self) {
        self.notify.notified().await;
    }
}

impl Navigator for LogNavigator {
    fn navigate(&self, route: &str) {
        warn!(route, "session ended, navigating to login");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(route.to_string());
        self.notify.notify_one();
    }
}
