// src/crm/session.rs
use crate::crm::error::CrmError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// An authenticated CRM session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmSession {
    pub session_id: String,
    /// Remote user id returned by the login endpoint.
    pub uid: i64,
}

/// Performs the actual login call. Injected so tests can substitute a fake
/// and the session manager never owns transport concerns.
pub trait CrmAuthenticator: Send + Sync {
    fn login(&self) -> Result<CrmSession, CrmError>;
}

struct CachedSession {
    session: CrmSession,
    expires_at: Instant,
}

/// Process-wide holder of the one authenticated CRM session.
///
/// The cache sits behind a mutex that is held across the login call, so
/// concurrent callers that find no valid session block on the single
/// in-flight authentication and share its outcome instead of each logging in.
pub struct CrmSessionManager {
    authenticator: Box<dyn CrmAuthenticator>,
    ttl: Duration,
    cached: Mutex<Option<CachedSession>>,
}

impl CrmSessionManager {
    pub fn new(authenticator: Box<dyn CrmAuthenticator>, ttl: Duration) -> Self {
        Self {
            authenticator,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid session, authenticating if none is cached or the
    /// cached one has expired. A failed login clears the cache.
    pub fn ensure_authenticated(&self) -> Result<CrmSession, CrmError> {
        let mut slot = self
            .cached
            .lock()
            .map_err(|_| CrmError::Structural("session lock poisoned".into()))?;

        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.session.clone());
            }
        }

        // Expired or absent. We still hold the lock, so this is the single
        // in-flight authentication attempt.
        *slot = None;
        match self.authenticator.login() {
            Ok(session) => {
                eprintln!("🔑 CRM session established (uid {})", session.uid);
                *slot = Some(CachedSession {
                    session: session.clone(),
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }

    /// Drops the cached session so the next use re-authenticates. Called when
    /// the remote rejects a session mid-flight.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.cached.lock() {
            *slot = None;
        }
    }
}
