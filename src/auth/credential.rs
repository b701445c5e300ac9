use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::token::{TokenGrant, TokenSource};
use crate::error::AuthError;

/// Source of the current time for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Expiry is measured from `fetched_at`, the moment the grant arrived.
    pub fn from_grant(grant: TokenGrant, fetched_at: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(grant.ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            token: grant.token,
            expires_at: fetched_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Self-refreshing credential slot.
///
/// The slot lock is held for the whole refresh, so callers that find the
/// credential stale while a refresh is running queue on the lock. Once they
/// get it they take that refresh's outcome, success or failure, instead of
/// starting another one. At most one refresh is ever in flight.
pub struct CredentialCache {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    /// Completed refreshes. Read before queueing on the slot to tell whether a
    /// refresh finished while waiting.
    refreshes: AtomicU64,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    credential: Option<Credential>,
    /// Outcome of the most recent refresh if it failed.
    last_failure: Option<AuthError>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            refreshes: AtomicU64::new(0),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Cached credential if still valid, otherwise the result of exactly one refresh.
    ///
    /// A failed refresh leaves the cached credential as it was. Callers that
    /// were already waiting when it failed get the same error; the next caller
    /// after that tries again.
    pub async fn valid_token(&self) -> Result<Credential, AuthError> {
        let seen = self.refreshes.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(credential) = slot.credential.as_ref() {
            if credential.is_valid_at(self.clock.now()) {
                return Ok(credential.clone());
            }
        }

        if self.refreshes.load(Ordering::Acquire) != seen {
            if let Some(failure) = slot.last_failure.as_ref() {
                return Err(failure.duplicate());
            }
        }

        let result = self.source.fetch().await;
        self.refreshes.fetch_add(1, Ordering::Release);

        match result {
            Ok(grant) => {
                let credential = Credential::from_grant(grant, self.clock.now());
                tracing::debug!(expires_at = %credential.expires_at, "refreshed bearer token");
                slot.credential = Some(credential.clone());
                slot.last_failure = None;
                Ok(credential)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                slot.last_failure = Some(e.duplicate());
                Err(e)
            }
        }
    }

    /// Snapshot of the slot without refreshing.
    pub async fn current(&self) -> Option<Credential> {
        self.slot.lock().await.credential.clone()
    }
}
