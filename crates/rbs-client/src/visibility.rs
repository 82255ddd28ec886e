//! Host visibility signal.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Foreground,
    Background,
}

/// Records whether the host is in the foreground. Receivers are only woken
/// by actual transitions.
#[derive(Debug)]
pub struct VisibilityTracker {
    tx: watch::Sender<Visibility>,
}

impl Default for VisibilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityTracker {
    /// Starts in the foreground.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Foreground);
        Self { tx }
    }

    pub fn set_visible(&self, visible: bool) {
        let next = if visible {
            Visibility::Foreground
        } else {
            Visibility::Background
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(visibility = ?next, "Visibility changed");
        }
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    pub fn is_visible(&self) -> bool {
        self.current() == Visibility::Foreground
    }

    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}
