use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::TryCurrentError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::guard::TaskGuard;

const TRANSITION_BUFFER: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl Connectivity {
    #[must_use]
    pub const fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Connectivity::Available
        } else {
            Connectivity::Unavailable
        }
    }

    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Connectivity::Available)
    }
}

struct Inner {
    current: watch::Sender<Connectivity>,
    transitions: broadcast::Sender<Connectivity>,
}

/// Process-wide reachability state.
///
/// Cloning yields another handle to the same state. Platform notifications
/// are edge-triggered: repeating the current state is not a transition.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    /// A monitor that has not been probed yet.
    pub fn new() -> Self {
        Self::with_state(Connectivity::Unknown)
    }

    /// A monitor seeded from the startup probe. Seeding is not a transition.
    pub fn from_probe(reachable: bool) -> Self {
        Self::with_state(Connectivity::from_reachable(reachable))
    }

    fn with_state(state: Connectivity) -> Self {
        let (current, _) = watch::channel(state);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            inner: Arc::new(Inner {
                current,
                transitions,
            }),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.inner.current.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.current().is_available()
    }

    /// Applies a reachability notification. Returns whether the state changed.
    pub fn report(&self, reachable: bool) -> bool {
        let next = Connectivity::from_reachable(reachable);
        let changed = self.inner.current.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            info!(state = ?next, "connectivity changed");
            // No subscribers is fine; the watch channel still holds the value.
            let _ = self.inner.transitions.send(next);
        } else {
            debug!(state = ?next, "duplicate connectivity notification ignored");
        }
        changed
    }

    /// Every transition from now on. Observers that fall more than a few
    /// transitions behind see `Lagged` and should re-read `current()`.
    pub fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.inner.transitions.subscribe()
    }

    pub async fn wait_until_available(&self) {
        let mut receiver = self.inner.current.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = receiver.wait_for(|state| state.is_available()).await;
    }

    /// Feeds a platform reachability stream into the monitor until the
    /// stream ends or the returned guard is dropped. Fails outside a tokio
    /// runtime.
    pub fn attach(
        &self,
        mut notifications: mpsc::Receiver<bool>,
    ) -> Result<TaskGuard, TryCurrentError> {
        let monitor = self.clone();
        TaskGuard::spawn(async move {
            while let Some(reachable) = notifications.recv().await {
                monitor.report(reachable);
            }
            debug!("reachability stream closed");
        })
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("current", &self.current())
            .finish()
    }
}
