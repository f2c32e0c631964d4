//! Session registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use colloquy_core::{Error, Result};
use colloquy_pipeline::SessionEvent;

/// One live client connection.
pub struct Session {
    pub id: String,
    pub events: mpsc::Sender<SessionEvent>,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    pub fn new(id: impl Into<String>, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            id: id.into(),
            events,
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }
}

/// Registry of live sessions with a capacity cap and inactivity sweep.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    inactivity_timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, inactivity_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            inactivity_timeout,
        }
    }

    pub fn register(
        &self,
        id: String,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(Error::Transport("session capacity reached".into()));
        }
        let session = Arc::new(Session::new(id.clone(), events));
        sessions.insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, live = sessions.len(), "session registered");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        if self.sessions.write().remove(id).is_some() {
            tracing::info!(session_id = %id, "session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Periodically disconnect sessions idle past the inactivity timeout.
    /// Returns a shutdown handle for the sweep task.
    pub fn start_sweep_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired: Vec<Arc<Session>> = manager
                            .sessions
                            .read()
                            .values()
                            .filter(|s| s.is_expired(manager.inactivity_timeout))
                            .cloned()
                            .collect();
                        for session in expired {
                            tracing::info!(session_id = %session.id, "session expired");
                            let _ = session.events.send(SessionEvent::Disconnect).await;
                            manager.remove(&session.id);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> mpsc::Sender<SessionEvent> {
        mpsc::channel(4).0
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let manager = SessionManager::new(4, Duration::from_secs(300));
        let session = manager.register("abc".into(), events()).unwrap();
        assert_eq!(session.id, "abc");
        assert!(manager.get("abc").is_some());
        assert_eq!(manager.count(), 1);

        manager.remove("abc");
        assert!(manager.get("abc").is_none());
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let manager = SessionManager::new(1, Duration::from_secs(300));
        manager.register("a".into(), events()).unwrap();
        assert!(manager.register("b".into(), events()).is_err());
    }

    #[tokio::test]
    async fn expiry_honors_touch() {
        let manager = SessionManager::new(4, Duration::from_millis(50));
        let session = manager.register("a".into(), events()).unwrap();
        assert!(!session.is_expired(Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(session.is_expired(Duration::from_millis(50)));
        session.touch();
        assert!(!session.is_expired(Duration::from_millis(50)));
    }
}
