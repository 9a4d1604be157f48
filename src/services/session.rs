//! Broker session lifecycle.
//!
//! A session is reused while it is valid and unexpired, first from memory,
//! then from the snapshot store. Only when neither holds a usable session
//! is a new token minted, and concurrent callers share that one mint.

use super::clock::Clock;
use super::store::SnapshotStore;
use crate::types::Session;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Session errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Something that can mint a broker access token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self) -> Result<String, SessionError>;
}

/// Keeps at most one valid broker session alive.
pub struct SessionManager {
    issuer: Option<Arc<dyn TokenIssuer>>,
    store: Option<Arc<SnapshotStore>>,
    clock: Arc<dyn Clock>,
    validity: chrono::Duration,
    current: RwLock<Option<Session>>,
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        issuer: Option<Arc<dyn TokenIssuer>>,
        store: Option<Arc<SnapshotStore>>,
        clock: Arc<dyn Clock>,
        validity: chrono::Duration,
    ) -> Self {
        Self {
            issuer,
            store,
            clock,
            validity,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a usable session, minting one only if none exists.
    pub async fn ensure_session(&self) -> Result<Session, SessionError> {
        if let Some(session) = self.usable_in_memory().await {
            return Ok(session);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(session) = self.usable_in_memory().await {
            return Ok(session);
        }

        let now = self.clock.now();
        if let Some(stored) = self.load_stored() {
            if stored.is_usable(now) {
                debug!("Reusing stored broker session");
                *self.current.write().await = Some(stored.clone());
                return Ok(stored);
            }
        }

        let issuer = self
            .issuer
            .as_ref()
            .ok_or_else(|| SessionError::MissingCredentials("broker api key/secret".to_string()))?;

        let token = issuer.issue_token().await?;
        let session = Session::new(token, now, self.validity);
        if let Some(store) = &self.store {
            if let Err(e) = store.save_session(&session) {
                warn!("Failed to persist broker session: {}", e);
            }
        }
        *self.current.write().await = Some(session.clone());
        info!("Minted broker session valid until {}", session.expires_at);
        Ok(session)
    }

    /// Access token of a usable session.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        self.ensure_session().await.map(|s| s.access_token)
    }

    /// Mark the current session unusable, in memory and in storage.
    pub async fn invalidate(&self) {
        let mut current = self.current.write().await;
        if let Some(session) = current.as_mut() {
            session.valid = false;
            if let Some(store) = &self.store {
                if let Err(e) = store.save_session(session) {
                    warn!("Failed to persist invalidated session: {}", e);
                }
            }
        }
        info!("Broker session invalidated");
    }

    /// The in-memory session, usable or not.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    async fn usable_in_memory(&self) -> Option<Session> {
        let now = self.clock.now();
        self.current
            .read()
            .await
            .as_ref()
            .filter(|s| s.is_usable(now))
            .cloned()
    }

    fn load_stored(&self) -> Option<Session> {
        let store = self.store.as_ref()?;
        match store.load_session() {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to load stored session: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIssuer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        async fn issue_token(&self) -> Result<String, SessionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(format!("token-{}", n))
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl TokenIssuer for FailingIssuer {
        async fn issue_token(&self) -> Result<String, SessionError> {
            Err(SessionError::Upstream("503".to_string()))
        }
    }

    fn setup(store: Option<Arc<SnapshotStore>>) -> (Arc<CountingIssuer>, ManualClock, SessionManager) {
        let issuer = Arc::new(CountingIssuer {
            calls: AtomicUsize::new(0),
        });
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap());
        let manager = SessionManager::new(
            Some(issuer.clone() as Arc<dyn TokenIssuer>),
            store,
            Arc::new(clock.clone()),
            Duration::hours(24),
        );
        (issuer, clock, manager)
    }

    #[tokio::test]
    async fn test_session_reused_while_valid() {
        let (issuer, clock, manager) = setup(None);

        let first = manager.ensure_session().await.unwrap();
        clock.advance(Duration::hours(23));
        let second = manager.ensure_session().await.unwrap();

        assert_eq!(first.access_token, second.access_token);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_minted_after_expiry() {
        let (issuer, clock, manager) = setup(None);

        manager.ensure_session().await.unwrap();
        clock.advance(Duration::hours(25));
        let renewed = manager.ensure_session().await.unwrap();

        assert_eq!(renewed.access_token, "token-1");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_token() {
        let (issuer, _clock, manager) = setup(None);

        manager.ensure_session().await.unwrap();
        manager.invalidate().await;
        assert!(!manager.current().await.unwrap().valid);

        manager.ensure_session().await.unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stored_session_survives_restart() {
        let store = Arc::new(SnapshotStore::new_in_memory().unwrap());

        let (issuer, _clock, manager) = setup(Some(store.clone()));
        let minted = manager.ensure_session().await.unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        let (fresh_issuer, _clock, restarted) = setup(Some(store));
        let reused = restarted.ensure_session().await.unwrap();
        assert_eq!(reused.access_token, minted.access_token);
        assert_eq!(fresh_issuer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_mint() {
        let (issuer, _clock, manager) = setup(None);
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_session().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_issuer_reports_credentials() {
        let clock = ManualClock::new(Utc::now());
        let manager = SessionManager::new(None, None, Arc::new(clock), Duration::hours(24));

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SessionError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_issuer_failure_propagates() {
        let clock = ManualClock::new(Utc::now());
        let manager = SessionManager::new(
            Some(Arc::new(FailingIssuer)),
            None,
            Arc::new(clock),
            Duration::hours(24),
        );

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Upstream(_)));
        assert!(manager.current().await.is_none());
    }
}
