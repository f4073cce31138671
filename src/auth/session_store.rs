//! Server-side session storage.
//!
//! The session cookie carries only the session ID. Everything else, including
//! the SAML messages exchanged for the session, stays in the store.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::saml::UserPrincipal;

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session storage error: {0}")]
    Storage(String),
}

/// Per-session SAML state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session ID, also the cookie value.
    pub id: Uuid,

    /// Last outbound AuthnRequest XML.
    #[serde(default)]
    pub sp_saml_string: Option<String>,

    /// Last consumed assertion XML.
    #[serde(default)]
    pub idp_saml_string: Option<String>,

    /// ID of the last consumed assertion, sent as `SessionIndex` on logout.
    #[serde(default)]
    pub idp_token: Option<String>,

    /// Subject NameID of the last consumed assertion.
    #[serde(default)]
    pub name_id: Option<String>,

    /// Set once an assertion has been consumed.
    #[serde(default)]
    pub principal: Option<UserPrincipal>,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

impl SessionState {
    /// Create an empty session valid for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sp_saml_string: None,
            idp_saml_string: None,
            idp_token: None,
            name_id: None,
            principal: None,
            created_at: now,
            expires_at: expiry_from(now, ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Copy of this session under a fresh ID and lifetime.
    pub fn rotate(&self, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            expires_at: expiry_from(now, ttl),
            ..self.clone()
        }
    }
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session.
    async fn create_session(&self, session: SessionState) -> SessionResult<Uuid>;

    /// Get a session by ID. Expired sessions are removed and reported absent.
    async fn get_session(&self, id: Uuid) -> SessionResult<Option<SessionState>>;

    /// Replace an existing session.
    async fn update_session(&self, session: SessionState) -> SessionResult<()>;

    /// Delete a session. Deleting an unknown session is not an error.
    async fn delete_session(&self, id: Uuid) -> SessionResult<()>;

    /// Remove expired sessions.
    async fn cleanup(&self) -> SessionResult<usize>;
}

/// In-memory session store.
///
/// Sessions are lost on restart and not shared across nodes.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: SessionState) -> SessionResult<Uuid> {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> SessionResult<Option<SessionState>> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&id) {
                None => return Ok(None),
                Some(session) if !session.is_expired() => return Ok(Some(session.clone())),
                Some(_) => {}
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        tracing::debug!(session_id = %id, "Removed expired session");
        Ok(None)
    }

    async fn update_session(&self, session: SessionState) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session;
                Ok(())
            }
            None => Err(SessionError::NotFound),
        }
    }

    async fn delete_session(&self, id: Uuid) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        Ok(())
    }

    async fn cleanup(&self) -> SessionResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(1800);

    #[tokio::test]
    async fn test_memory_session_store() {
        let store = MemorySessionStore::new();

        let mut session = SessionState::new(TTL);
        session.sp_saml_string = Some("<samlp:AuthnRequest/>".to_string());
        let id = session.id;

        // Create session
        store.create_session(session).await.unwrap();

        // Get session
        let retrieved = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(
            retrieved.sp_saml_string.as_deref(),
            Some("<samlp:AuthnRequest/>")
        );
        assert!(!retrieved.is_authenticated());

        // Delete session
        store.delete_session(id).await.unwrap();
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let store = MemorySessionStore::new();
        let err = store
            .update_session(SessionState::new(TTL))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound));
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let store = MemorySessionStore::new();
        let mut session = SessionState::new(TTL);
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let id = store.create_session(session).await.unwrap();

        assert!(store.get_session(id).await.unwrap().is_none());
        assert_eq!(store.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let store = MemorySessionStore::new();
        let mut expired = SessionState::new(TTL);
        expired.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.create_session(expired).await.unwrap();
        let live = store.create_session(SessionState::new(TTL)).await.unwrap();

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(store.get_session(live).await.unwrap().is_some());
    }

    #[test]
    fn test_rotate_keeps_state_under_new_id() {
        let mut session = SessionState::new(TTL);
        session.sp_saml_string = Some("request".to_string());
        let rotated = session.rotate(TTL);

        assert_ne!(rotated.id, session.id);
        assert_eq!(rotated.sp_saml_string, session.sp_saml_string);
        assert!(!rotated.is_expired());
    }
}
