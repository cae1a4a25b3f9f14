//! The session registry: the single writer of session state.

use crate::error::SessionError;
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use trunkline_types::{
    ProviderStrategy, SessionConfig, SessionEvent, SessionSnapshot, SessionState,
};

/// Capacity of the in-process session event broadcast channel.
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Directory of active and recent sessions.
///
/// Memory is the source of truth for live sessions; every mutation is
/// mirrored to the [`SessionStore`] so status queries survive restarts.
/// Store failures degrade the registry to memory-only operation — logged
/// at error level, never fatal to a call.
///
/// Uses `std::sync::RwLock` intentionally: all acquisitions are brief
/// HashMap operations that never span an `.await`, making a synchronous
/// lock safe and cheaper than `tokio::sync::RwLock`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
    store: Option<Arc<dyn SessionStore>>,
    degraded: AtomicBool,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(store: Option<Arc<dyn SessionStore>>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            degraded: AtomicBool::new(false),
            events_tx,
        }
    }

    /// Subscribes to the session event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Whether the last store operation failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Creates a new idle session and emits `SessionCreated`.
    pub async fn create(
        &self,
        provider_type: &str,
        strategy: ProviderStrategy,
        config: SessionConfig,
        call_id: Option<String>,
    ) -> SessionSnapshot {
        let now = chrono::Utc::now().to_rfc3339();
        let snapshot = SessionSnapshot {
            session_id: uuid::Uuid::new_v4().to_string(),
            provider_type: provider_type.to_string(),
            strategy,
            state: SessionState::Idle,
            state_reason: None,
            call_id,
            config,
            created_at: now.clone(),
            updated_at: now,
        };

        self.sessions
            .write()
            .expect("session registry lock poisoned")
            .insert(snapshot.session_id.clone(), snapshot.clone());

        if let Some(store) = &self.store {
            self.mirror(store.create(&snapshot).await);
        }

        self.emit(SessionEvent::SessionCreated {
            session_id: snapshot.session_id.clone(),
            provider_type: snapshot.provider_type.clone(),
            call_id: snapshot.call_id.clone(),
        })
        .await;

        snapshot
    }

    /// Returns a read-only snapshot of one session.
    pub fn get(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        self.sessions
            .read()
            .expect("session registry lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Finds the session bound to a carrier call leg.
    pub fn find_by_call(&self, call_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .expect("session registry lock poisoned")
            .values()
            .find(|s| s.call_id.as_deref() == Some(call_id))
            .cloned()
    }

    /// Lists sessions, newest first.
    pub fn list(&self, limit: usize) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().expect("session registry lock poisoned");
        let mut all: Vec<_> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    /// Moves a session to `next`, enforcing the lifecycle table.
    ///
    /// Duplicate webhook delivery makes teardown requests repeat, so
    /// idempotent cases return the unchanged snapshot instead of an
    /// error: a transition to the current state, or a teardown request
    /// against an already-terminal session, is a no-op.
    pub async fn transition(
        &self,
        session_id: &str,
        next: SessionState,
        reason: Option<&str>,
    ) -> Result<SessionSnapshot, SessionError> {
        let (snapshot, from) = {
            let mut sessions = self.sessions.write().expect("session registry lock poisoned");
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

            if session.state == next {
                return Ok(session.clone());
            }
            if session.state.is_terminal()
                && matches!(
                    next,
                    SessionState::Disconnecting | SessionState::Disconnected
                )
            {
                return Ok(session.clone());
            }
            if !session.state.can_transition_to(next) {
                return Err(SessionError::InvalidTransition {
                    from: session.state,
                    to: next,
                });
            }

            let from = session.state;
            session.state = next;
            if let Some(reason) = reason {
                session.state_reason = Some(reason.to_string());
            }
            session.updated_at = chrono::Utc::now().to_rfc3339();
            (session.clone(), from)
        };

        if let Some(store) = &self.store {
            self.mirror(store.update(&snapshot).await);
        }

        self.emit(SessionEvent::StateChanged {
            session_id: snapshot.session_id.clone(),
            from,
            to: snapshot.state,
            reason: reason.map(str::to_string),
        })
        .await;

        if snapshot.state.is_terminal() {
            self.emit(SessionEvent::SessionEnded {
                session_id: snapshot.session_id.clone(),
                state: snapshot.state,
                reason: snapshot.state_reason.clone(),
            })
            .await;
        }

        Ok(snapshot)
    }

    /// Marks a connected session active on its first payload. A no-op in
    /// any other state — both pumps race to call this.
    pub async fn mark_active(&self, session_id: &str) -> Result<(), SessionError> {
        let should_transition = {
            let sessions = self.sessions.read().expect("session registry lock poisoned");
            matches!(
                sessions.get(session_id).map(|s| s.state),
                Some(SessionState::Connected)
            )
        };
        if should_transition {
            // A concurrent teardown can still win the race; an invalid
            // jump here is fine to ignore.
            match self.transition(session_id, SessionState::Active, None).await {
                Ok(_) | Err(SessionError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Rebinds the session to a different provider instance (initial
    /// selection or failover).
    pub async fn set_provider(
        &self,
        session_id: &str,
        provider_type: &str,
        strategy: ProviderStrategy,
    ) -> Result<SessionSnapshot, SessionError> {
        let snapshot = {
            let mut sessions = self.sessions.write().expect("session registry lock poisoned");
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            session.provider_type = provider_type.to_string();
            session.strategy = strategy;
            session.updated_at = chrono::Utc::now().to_rfc3339();
            session.clone()
        };
        if let Some(store) = &self.store {
            self.mirror(store.update(&snapshot).await);
        }
        Ok(snapshot)
    }

    /// Removes a session from the registry and the store.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let removed = self
            .sessions
            .write()
            .expect("session registry lock poisoned")
            .remove(session_id);
        if removed.is_none() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        if let Some(store) = &self.store {
            self.mirror(store.delete(session_id).await);
        }
        Ok(())
    }

    /// Broadcasts an event and appends it to the persisted log.
    pub async fn emit(&self, event: SessionEvent) {
        if let Some(store) = &self.store {
            self.mirror(store.append_event(&event).await);
        }
        // No receivers is fine; consumers subscribe on demand.
        let _ = self.events_tx.send(event);
    }

    /// Records a store outcome, logging loudly on the way down and
    /// quietly on recovery.
    fn mirror(&self, result: Result<(), trunkline_db::StoreError>) {
        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("session store recovered, mirroring resumed");
                }
            }
            Err(e) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::error!(
                        error = %e,
                        "session store unavailable, continuing memory-only"
                    );
                } else {
                    tracing::debug!(error = %e, "session store still unavailable");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("model-a", 16_000)
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let registry = SessionRegistry::new(None);
        let created = registry
            .create("mock", ProviderStrategy::Realtime, config(), Some("CA1".into()))
            .await;
        assert_eq!(created.state, SessionState::Idle);

        let fetched = registry.get(&created.session_id).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(
            registry.find_by_call("CA1").unwrap().session_id,
            created.session_id
        );
        assert_eq!(registry.list(10).len(), 1);

        registry.delete(&created.session_id).await.unwrap();
        assert!(matches!(
            registry.get(&created.session_id),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete(&created.session_id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn transitions_follow_the_lifecycle_table() {
        let registry = SessionRegistry::new(None);
        let session = registry
            .create("mock", ProviderStrategy::Realtime, config(), None)
            .await;
        let id = &session.session_id;

        // Jumping idle -> active is rejected.
        assert!(matches!(
            registry.transition(id, SessionState::Active, None).await,
            Err(SessionError::InvalidTransition {
                from: SessionState::Idle,
                to: SessionState::Active
            })
        ));

        for state in [
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Active,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ] {
            registry.transition(id, state, None).await.unwrap();
        }
        assert_eq!(registry.get(id).unwrap().state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn duplicate_teardown_is_idempotent() {
        let registry = SessionRegistry::new(None);
        let session = registry
            .create("mock", ProviderStrategy::Realtime, config(), None)
            .await;
        let id = &session.session_id;
        for state in [
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ] {
            registry.transition(id, state, None).await.unwrap();
        }

        // A repeated hangup against a disconnected session is a no-op.
        let snap = registry
            .transition(id, SessionState::Disconnecting, Some("again"))
            .await
            .unwrap();
        assert_eq!(snap.state, SessionState::Disconnected);
        let snap = registry
            .transition(id, SessionState::Disconnected, None)
            .await
            .unwrap();
        assert_eq!(snap.state, SessionState::Disconnected);

        // But reviving a terminal session is rejected.
        assert!(matches!(
            registry.transition(id, SessionState::Connecting, None).await,
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn events_are_broadcast_in_order() {
        let registry = SessionRegistry::new(None);
        let mut events = registry.subscribe();
        let session = registry
            .create("mock", ProviderStrategy::Realtime, config(), None)
            .await;
        registry
            .transition(&session.session_id, SessionState::Connecting, None)
            .await
            .unwrap();
        registry
            .transition(&session.session_id, SessionState::Error, Some("boom"))
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::SessionCreated { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                to: SessionState::Connecting,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                to: SessionState::Error,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::SessionEnded {
                state: SessionState::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn mark_active_only_fires_from_connected() {
        let registry = SessionRegistry::new(None);
        let session = registry
            .create("mock", ProviderStrategy::Realtime, config(), None)
            .await;
        let id = &session.session_id;

        registry.mark_active(id).await.unwrap();
        assert_eq!(registry.get(id).unwrap().state, SessionState::Idle);

        registry.transition(id, SessionState::Connecting, None).await.unwrap();
        registry.transition(id, SessionState::Connected, None).await.unwrap();
        registry.mark_active(id).await.unwrap();
        assert_eq!(registry.get(id).unwrap().state, SessionState::Active);

        // Second call is a no-op.
        registry.mark_active(id).await.unwrap();
        assert_eq!(registry.get(id).unwrap().state, SessionState::Active);
    }
}
