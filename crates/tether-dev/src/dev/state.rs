//! Shared state for the dev session server.
//!
//! Holds the event bus handle, the last completion snapshot and the
//! session's cancellation token. The snapshot is guarded by a
//! `parking_lot::RwLock`: many stream handlers read it, the completion cache
//! loop is the only writer.

use crate::env::EnvProvider;
use crate::events::CompleteEvent;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_bus::EventBus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared session state.
pub struct SessionState {
    bus: EventBus,
    snapshot: RwLock<Option<Arc<CompleteEvent>>>,
    env: Arc<dyn EnvProvider>,
    /// Dev directories are relative to this
    cwd: PathBuf,
    cancel: CancellationToken,
}

/// Type alias for shared state.
pub type SharedState = Arc<SessionState>;

impl SessionState {
    pub fn new(bus: EventBus, env: Arc<dyn EnvProvider>, cwd: PathBuf) -> Self {
        Self {
            bus,
            snapshot: RwLock::new(None),
            env,
            cwd,
            cancel: CancellationToken::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn env_provider(&self) -> &dyn EnvProvider {
        self.env.as_ref()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Latest completion snapshot, if any deploy has finished.
    pub fn snapshot(&self) -> Option<Arc<CompleteEvent>> {
        self.snapshot.read().clone()
    }

    /// Replaces the snapshot; last write wins.
    pub fn set_snapshot(&self, snapshot: Arc<CompleteEvent>) {
        *self.snapshot.write() = Some(snapshot);
    }

    /// Keeps the snapshot current with every published `CompleteEvent`.
    ///
    /// The subscription is registered before this returns, so no completion
    /// published afterwards is missed. The loop ends on cancellation.
    pub fn spawn_completion_cache(self: &Arc<Self>) -> JoinHandle<()> {
        let mut completions = self.bus.subscribe::<CompleteEvent>();
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = state.cancel.cancelled() => break,
                    event = completions.recv() => match event {
                        Some(complete) => {
                            tracing::debug!(
                                service = "dev",
                                finished = complete.finished,
                                "completion snapshot updated"
                            );
                            state.set_snapshot(complete);
                        }
                        None => {
                            // Dropped by the bus for lagging; resubscribe
                            if state.cancel.is_cancelled() {
                                break;
                            }
                            tracing::warn!(service = "dev", "completion cache lagged, resubscribing");
                            completions = state.bus.subscribe::<CompleteEvent>();
                        }
                    },
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("bus", &self.bus)
            .field("has_snapshot", &self.snapshot.read().is_some())
            .field("cwd", &self.cwd)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LinkEnvProvider;
    use std::time::Duration;

    fn state() -> SharedState {
        Arc::new(SessionState::new(
            EventBus::new(16),
            Arc::new(LinkEnvProvider),
            PathBuf::from("/project"),
        ))
    }

    #[tokio::test]
    async fn test_completion_cache_keeps_latest() {
        let state = state();
        let handle = state.spawn_completion_cache();

        state
            .bus()
            .publish(CompleteEvent {
                update_id: "first".to_string(),
                ..Default::default()
            })
            .unwrap();
        state
            .bus()
            .publish(CompleteEvent {
                update_id: "second".to_string(),
                finished: true,
                ..Default::default()
            })
            .unwrap();

        let mut latest = None;
        for _ in 0..50 {
            latest = state.snapshot();
            if latest.as_ref().is_some_and(|s| s.update_id == "second") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(latest.unwrap().update_id, "second");

        state.cancel_token().cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_snapshot_starts_empty() {
        assert!(state().snapshot().is_none());
    }
}
