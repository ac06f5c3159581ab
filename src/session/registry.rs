// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide token → session table.
//!
//! The map lock only covers insert, lookup and sweep. Each session sits behind
//! its own async mutex, so one slow query serializes its own session and
//! nothing else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Session, SessionSettings};
use crate::engine::Backends;
use crate::error::{ChatError, ChatResult};
use crate::security::{resilient_read, resilient_write};
use crate::token;
use crate::utils::mask_sensitive;

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// `None` disables idle expiry.
    pub idle_timeout: Option<Duration>,
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

struct Entry {
    session: Arc<Mutex<Session>>,
    /// Milliseconds since the registry epoch.
    last_seen_ms: AtomicU64,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
    next_id: AtomicU64,
    epoch: Instant,
    config: RegistryConfig,
    settings: SessionSettings,
    backends: Backends,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, settings: SessionSettings, backends: Backends) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            epoch: Instant::now(),
            config,
            settings,
            backends,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_expired(&self, entry: &Entry, now_ms: u64) -> bool {
        match self.config.idle_timeout {
            Some(idle) => {
                let last = entry.last_seen_ms.load(Ordering::Relaxed);
                now_ms.saturating_sub(last) > idle.as_millis() as u64
            }
            None => false,
        }
    }

    /// Seconds until the least recently used session can be swept.
    fn retry_after_secs(&self, sessions: &HashMap<String, Entry>, now_ms: u64) -> Option<u64> {
        let idle_ms = self.config.idle_timeout?.as_millis() as u64;
        let stalest = sessions
            .values()
            .map(|entry| entry.last_seen_ms.load(Ordering::Relaxed))
            .min()?;
        let remaining_ms = (stalest + idle_ms).saturating_sub(now_ms);
        Some(remaining_ms.div_ceil(1000).max(1))
    }

    /// Allocate a session and return its token.
    pub fn create(&self, streaming_mode: bool) -> ChatResult<String> {
        if self.len() >= self.config.max_sessions {
            self.cleanup_expired();
        }

        let mut sessions = resilient_write(&self.sessions);
        if sessions.len() >= self.config.max_sessions {
            let retry_after_secs = self.retry_after_secs(&sessions, self.now_ms());
            warn!(live = sessions.len(), retry_after_secs = ?retry_after_secs, "Session limit reached");
            return Err(ChatError::CapacityExceeded {
                live: sessions.len(),
                retry_after_secs,
            });
        }

        let token = loop {
            let candidate = token::generate();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(
            id,
            token.clone(),
            streaming_mode,
            self.backends.clone(),
            &self.settings,
        );
        sessions.insert(
            token.clone(),
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_seen_ms: AtomicU64::new(self.now_ms()),
            },
        );

        info!(
            session_id = id,
            token = %mask_sensitive(&token, 4),
            streaming_mode,
            live = sessions.len(),
            "Session created"
        );
        Ok(token)
    }

    /// Find the session for `token`, refreshing its idle clock.
    pub fn lookup(&self, token: &str) -> ChatResult<Arc<Mutex<Session>>> {
        let now = self.now_ms();
        {
            let sessions = resilient_read(&self.sessions);
            let entry = sessions.get(token).ok_or(ChatError::InvalidSession)?;
            if !self.is_expired(entry, now) {
                entry.last_seen_ms.store(now, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.session));
            }
        }

        resilient_write(&self.sessions).remove(token);
        debug!(token = %mask_sensitive(token, 4), "Idle session expired on lookup");
        Err(ChatError::InvalidSession)
    }

    /// Drop every idle-expired session. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.now_ms();
        let mut sessions = resilient_write(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, live = sessions.len(), "Expired sessions removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("live", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::CountingEngine;
    use std::collections::HashSet;

    fn registry(config: RegistryConfig) -> SessionRegistry {
        SessionRegistry::new(
            config,
            SessionSettings::default(),
            Backends::uniform(Arc::new(CountingEngine::default())),
        )
    }

    #[test]
    fn test_unknown_token_is_invalid_session() {
        let reg = registry(RegistryConfig::default());
        reg.create(false).unwrap();
        assert!(matches!(reg.lookup("nosuchtoken"), Err(ChatError::InvalidSession)));
        assert!(matches!(reg.lookup(""), Err(ChatError::InvalidSession)));
    }

    #[tokio::test]
    async fn test_create_then_lookup_same_session() {
        let reg = registry(RegistryConfig::default());
        let token = reg.create(true).unwrap();
        assert!(token::is_well_formed(&token));

        let a = reg.lookup(&token).unwrap();
        let b = reg.lookup(&token).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let session = a.lock().await;
        assert_eq!(session.token(), token);
        assert!(session.streaming_mode());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_tokens_distinct() {
        let reg = registry(RegistryConfig::default());
        let tokens: Vec<String> = (0..50).map(|_| reg.create(false).unwrap()).collect();
        assert_eq!(tokens.iter().collect::<HashSet<_>>().len(), 50);

        let mut last = 0;
        for token in &tokens {
            let id = reg.lookup(token).unwrap().lock().await.id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_capacity_bound() {
        let reg = registry(RegistryConfig {
            idle_timeout: None,
            max_sessions: 2,
        });
        reg.create(false).unwrap();
        reg.create(false).unwrap();
        assert!(matches!(
            reg.create(false),
            Err(ChatError::CapacityExceeded { live: 2, retry_after_secs: None })
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_capacity_retry_after_tracks_stalest_session() {
        let reg = registry(RegistryConfig {
            idle_timeout: Some(Duration::from_secs(600)),
            max_sessions: 1,
        });
        reg.create(false).unwrap();
        match reg.create(false) {
            Err(ChatError::CapacityExceeded { live: 1, retry_after_secs: Some(secs) }) => {
                assert!(secs > 590 && secs <= 600, "retry after {}", secs);
            }
            other => panic!("expected capacity error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_idle_sessions_expire() {
        let reg = registry(RegistryConfig {
            idle_timeout: Some(Duration::from_millis(30)),
            max_sessions: 1,
        });
        let old = reg.create(false).unwrap();
        std::thread::sleep(Duration::from_millis(80));

        // At capacity, but the idle session is swept to make room.
        let fresh = reg.create(false).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(matches!(reg.lookup(&old), Err(ChatError::InvalidSession)));
        assert!(reg.lookup(&fresh).is_ok());
    }

    #[test]
    fn test_expired_lookup_removes_entry() {
        let reg = registry(RegistryConfig {
            idle_timeout: Some(Duration::from_millis(30)),
            max_sessions: 10,
        });
        let token = reg.create(false).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert!(matches!(reg.lookup(&token), Err(ChatError::InvalidSession)));
        assert!(reg.is_empty());
        assert_eq!(reg.cleanup_expired(), 0);
    }
}
