//! Connectivity tracking
//!
//! [`ConnectivityMonitor`] holds the current online flag and broadcasts
//! transitions. The platform (or [`spawn_probe`]) reports reachability
//! through [`ConnectivityMonitor::set_online`]; repeated reports of the
//! same state are not re-broadcast.

use crate::remote::RemoteBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Record the current reachability. Returns `true` when this changed
    /// the state (and an event was broadcast).
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        tracing::info!(?event, "Connectivity changed");

        // No receivers is fine; the flag is still updated
        let _ = self.events.send(event);
        true
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Periodically ping the remote store and report the result to `monitor`
/// until `shutdown` flips to `true`.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    backend: Arc<dyn RemoteBackend>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = match backend.ping().await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(error = %e, "Remote store unreachable");
                            false
                        }
                    };
                    monitor.set_online(reachable);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Connectivity probe stopped");
    })
}
