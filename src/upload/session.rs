//! Upload Session Registry
//!
//! Manages upload sessions with:
//! - One registry lock for structural changes (insert/remove)
//! - A lock per session for its uploaded-chunk set
//! - Compare-and-delete removal, so only one caller can claim a session
//!   for finalization or reclamation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::types::{UploadError, UploadSession};

// ============================================================================
// Session Manager
// ============================================================================

/// Registry of active upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Active sessions indexed by ID
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,

    /// Lifetime of a session from creation
    ttl: Duration,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Register a new session
    pub async fn insert(&self, session: UploadSession) -> Result<Arc<UploadSession>, UploadError> {
        let session = Arc::new(session);
        let mut sessions = self.inner.sessions.write().await;

        if sessions.contains_key(&session.id) {
            return Err(UploadError::Internal(format!(
                "session id already registered: {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), Arc::clone(&session));

        tracing::info!(
            session_id = %session.id,
            filename = %session.filename,
            total_size = session.total_size,
            total_chunks = session.total_chunks,
            "Created upload session"
        );

        Ok(session)
    }

    /// Get a session by ID
    pub async fn get(&self, id: &str) -> Result<Arc<UploadSession>, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions.contains_key(id)
    }

    /// Remove `id` only if it still maps to `expected`
    ///
    /// Returns true for exactly one caller per registered session; that
    /// caller owns whatever happens to the session next.
    pub async fn remove_if_same(&self, id: &str, expected: &Arc<UploadSession>) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Sessions whose TTL has elapsed at `now`
    pub async fn expired_sessions(&self, now: DateTime<Utc>) -> Vec<Arc<UploadSession>> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .cloned()
            .collect()
    }

    pub async fn active_ids(&self) -> HashSet<String> {
        let sessions = self.inner.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    /// Get session count
    pub async fn session_count(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::NewUpload;

    fn create_test_session(id: &str, ttl: Duration) -> UploadSession {
        let request = NewUpload {
            filename: "test.bin".to_string(),
            total_size: 10,
            ..Default::default()
        };
        UploadSession::new(id.to_string(), &request, 5, ttl)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let manager = SessionManager::new(Duration::hours(24));
        manager
            .insert(create_test_session("abc", manager.ttl()))
            .await
            .unwrap();

        let session = manager.get("abc").await.unwrap();
        assert_eq!(session.total_chunks, 2);
        assert!(manager.contains("abc").await);
        assert!(matches!(
            manager.get("nope").await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let manager = SessionManager::new(Duration::hours(24));
        manager.insert(create_test_session("abc", manager.ttl())).await.unwrap();
        let result = manager.insert(create_test_session("abc", manager.ttl())).await;
        assert!(result.is_err());
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_if_same_claims_once() {
        let manager = SessionManager::new(Duration::hours(24));
        let session = manager
            .insert(create_test_session("abc", manager.ttl()))
            .await
            .unwrap();

        let claims = futures::future::join_all(
            (0..8).map(|_| manager.remove_if_same("abc", &session)),
        )
        .await;

        assert_eq!(claims.iter().filter(|claimed| **claimed).count(), 1);
        assert!(!manager.contains("abc").await);
    }

    #[tokio::test]
    async fn test_remove_if_same_ignores_replacement() {
        let manager = SessionManager::new(Duration::hours(24));
        let stale = Arc::new(create_test_session("abc", manager.ttl()));
        manager.insert(create_test_session("abc", manager.ttl())).await.unwrap();

        assert!(!manager.remove_if_same("abc", &stale).await);
        assert!(manager.contains("abc").await);
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let manager = SessionManager::new(Duration::hours(24));
        manager.insert(create_test_session("old", Duration::seconds(-1))).await.unwrap();
        manager.insert(create_test_session("new", manager.ttl())).await.unwrap();

        let expired = manager.expired_sessions(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
        assert_eq!(manager.active_ids().await.len(), 2);
    }
}
