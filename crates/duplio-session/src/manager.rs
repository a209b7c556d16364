// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session manager: binds users to sessions and runs their lifecycle.
//!
//! One user owns at most one live session. A rebind reattaches the existing
//! session (the old connection is cancelled); an unbind starts the grace
//! timer, after which the session is destroyed unless the user came back.
//! The map sits behind a single write-exclusive lock with fast read-only
//! lookup; no await happens under the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use duplio_core::error::DuplioError;
use duplio_core::types::{SessionId, UserId};
use duplio_prometheus::HealthAggregator;

use crate::session::{ClientEvent, Session, SessionProfile};

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    pub grace: Duration,
    pub idle_eviction: Duration,
    pub outbound_queue_frames: usize,
    pub history_turns: usize,
}

struct Entry {
    session: Arc<Session>,
    /// Bumped on every bind; grace timers check it before destroying.
    epoch: AtomicU64,
}

/// Result of a successful bind.
pub struct BindOutcome {
    pub session: Arc<Session>,
    /// True when an existing session was reattached within grace.
    pub resumed: bool,
    /// Controller input for a newly created session; `None` on resume
    /// (the controller from the first bind keeps running).
    pub events_rx: Option<mpsc::Receiver<ClientEvent>>,
}

/// Maps users to live sessions and enforces the process-wide cap.
pub struct SessionManager {
    sessions: RwLock<HashMap<UserId, Arc<Entry>>>,
    config: ManagerConfig,
    aggregator: Arc<HealthAggregator>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig, aggregator: Arc<HealthAggregator>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            aggregator,
        })
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().expect("manager lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a session by user.
    pub fn get(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("manager lock poisoned")
            .get(user_id)
            .map(|entry| entry.session.clone())
    }

    /// Binds a user to a session, creating one if needed.
    ///
    /// Beyond the cap, fails with a retryable `QUEUE_FULL` carrying an
    /// advisory wait; no partial session is left behind.
    pub fn bind(&self, profile: SessionProfile) -> Result<BindOutcome, DuplioError> {
        let mut sessions = self.sessions.write().expect("manager lock poisoned");

        if let Some(entry) = sessions.get(&profile.user_id) {
            entry.epoch.fetch_add(1, Ordering::SeqCst);
            entry.session.touch();
            debug!(
                session_id = %entry.session.id,
                user_id = %profile.user_id,
                "rebinding existing session"
            );
            return Ok(BindOutcome {
                session: entry.session.clone(),
                resumed: true,
                events_rx: None,
            });
        }

        if sessions.len() >= self.config.max_sessions {
            // The caller records the connection failure; this only tracks
            // cap pressure.
            duplio_prometheus::set_queue_depth(sessions.len() as f64);
            return Err(DuplioError::QueueFull {
                estimated_wait: self.config.grace,
            });
        }

        let (session, channels) = Session::new(
            profile.clone(),
            self.config.outbound_queue_frames,
            self.config.history_turns,
        );
        info!(
            session_id = %session.id,
            user_id = %profile.user_id,
            "session created"
        );

        sessions.insert(
            profile.user_id,
            Arc::new(Entry {
                session: session.clone(),
                epoch: AtomicU64::new(0),
            }),
        );
        self.aggregator.session_opened();
        duplio_prometheus::set_active_sessions(sessions.len() as f64);

        Ok(BindOutcome {
            session,
            resumed: false,
            events_rx: Some(channels.events_rx),
        })
    }

    /// Releases the user's connection and starts the grace timer.
    ///
    /// If the same user rebinds within the grace window the session resumes
    /// with its state preserved; otherwise it is destroyed.
    pub fn unbind(self: &Arc<Self>, user_id: &UserId) {
        let entry = {
            let sessions = self.sessions.read().expect("manager lock poisoned");
            sessions.get(user_id).cloned()
        };
        let Some(entry) = entry else {
            return;
        };

        entry.session.detach_connection();
        let epoch_at_unbind = entry.epoch.load(Ordering::SeqCst);
        let manager = Arc::clone(self);
        let user_id = user_id.clone();
        let grace = self.config.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let expired = {
                let sessions = manager.sessions.read().expect("manager lock poisoned");
                match sessions.get(&user_id) {
                    Some(entry) => {
                        entry.epoch.load(Ordering::SeqCst) == epoch_at_unbind
                            && !entry.session.connected()
                    }
                    None => false,
                }
            };
            if expired {
                debug!(user_id = %user_id, "grace window expired");
                manager.destroy(&user_id);
            }
        });
    }

    /// Destroys a session immediately (explicit end, eviction, shutdown).
    pub fn destroy(&self, user_id: &UserId) -> Option<SessionId> {
        let removed = self
            .sessions
            .write()
            .expect("manager lock poisoned")
            .remove(user_id);

        removed.map(|entry| {
            entry.session.cancel.cancel();
            self.aggregator.session_closed();
            duplio_prometheus::set_active_sessions(self.len() as f64);
            info!(session_id = %entry.session.id, user_id = %user_id, "session destroyed");
            entry.session.id.clone()
        })
    }

    /// Spawns the idle-eviction sweep. Sessions idle beyond the threshold
    /// are closed regardless of connection state.
    pub fn spawn_eviction_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let idle: Vec<UserId> = {
                    let sessions = manager.sessions.read().expect("manager lock poisoned");
                    sessions
                        .iter()
                        .filter(|(_, entry)| {
                            entry.session.idle_for() >= manager.config.idle_eviction
                        })
                        .map(|(user_id, _)| user_id.clone())
                        .collect()
                };
                for user_id in idle {
                    warn!(user_id = %user_id, "evicting idle session");
                    manager.destroy(&user_id);
                }
            }
        });
    }

    /// Destroys every session (process shutdown).
    pub fn destroy_all(&self) {
        let users: Vec<UserId> = {
            let sessions = self.sessions.read().expect("manager lock poisoned");
            sessions.keys().cloned().collect()
        };
        for user_id in users {
            self.destroy(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use duplio_core::types::VoiceModelHandle;
    use duplio_prometheus::AlertThresholds;

    use super::*;

    fn profile(user: &str) -> SessionProfile {
        SessionProfile {
            user_id: UserId(user.into()),
            voice_model: VoiceModelHandle("voice-1".into()),
            face_model: None,
            llm_provider: None,
        }
    }

    fn manager(max_sessions: usize, grace: Duration) -> Arc<SessionManager> {
        SessionManager::new(
            ManagerConfig {
                max_sessions,
                grace,
                idle_eviction: Duration::from_secs(300),
                outbound_queue_frames: 8,
                history_turns: 5,
            },
            Arc::new(HealthAggregator::new()),
        )
    }

    #[tokio::test]
    async fn bind_creates_then_resumes() {
        let manager = manager(4, Duration::from_secs(30));

        let first = manager.bind(profile("alice")).unwrap();
        assert!(!first.resumed);
        assert!(first.events_rx.is_some());
        let id = first.session.id.clone();

        let second = manager.bind(profile("alice")).unwrap();
        assert!(second.resumed);
        assert!(second.events_rx.is_none());
        assert_eq!(second.session.id, id);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn cap_rejects_with_queue_full() {
        let manager = manager(1, Duration::from_secs(30));
        manager.bind(profile("alice")).unwrap();

        match manager.bind(profile("bob")) {
            Err(DuplioError::QueueFull { estimated_wait }) => {
                assert_eq!(estimated_wait, Duration::from_secs(30));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should have been rejected"),
        }
        // No partial session left behind.
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&UserId("bob".into())).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_destroys_the_session() {
        let manager = manager(4, Duration::from_secs(30));
        let outcome = manager.bind(profile("alice")).unwrap();
        let session = outcome.session.clone();

        manager.unbind(&UserId("alice".into()));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(manager.len(), 0);
        assert!(session.cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn rebind_within_grace_keeps_the_session() {
        let manager = manager(4, Duration::from_secs(30));
        let first = manager.bind(profile("alice")).unwrap();
        let id = first.session.id.clone();

        manager.unbind(&UserId("alice".into()));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let second = manager.bind(profile("alice")).unwrap();
        assert!(second.resumed);
        assert_eq!(second.session.id, id);

        // The original grace timer must not fire after the rebind.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.len(), 1);
        assert!(!second.session.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn destroy_cancels_and_updates_gauge() {
        let aggregator = Arc::new(HealthAggregator::new());
        let manager = SessionManager::new(
            ManagerConfig {
                max_sessions: 4,
                grace: Duration::from_secs(30),
                idle_eviction: Duration::from_secs(300),
                outbound_queue_frames: 8,
                history_turns: 5,
            },
            aggregator.clone(),
        );

        let outcome = manager.bind(profile("alice")).unwrap();
        assert_eq!(
            aggregator.snapshot(&AlertThresholds::default()).active_sessions,
            1
        );

        manager.destroy(&UserId("alice".into()));
        assert!(outcome.session.cancel.is_cancelled());
        assert_eq!(
            aggregator.snapshot(&AlertThresholds::default()).active_sessions,
            0
        );
    }
}
