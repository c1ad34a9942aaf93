//! Signed-in user and taxpayer profile, shared by explicit handle.
//!
//! DESIGN
//! ======
//! Session setup runs in two phases. `establish` records the user right
//! away and marks the profile as loading. The profile then arrives through
//! `load_profile` (awaited) or `spawn_profile_load` (detached, failures
//! logged and dropped). Every `establish` and `sign_out` starts a new
//! session generation; a profile fetched under an older generation is
//! discarded, even when the same user signed back in meanwhile.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxpayerProfile {
    pub rfc: String,
    pub full_name: String,
    #[serde(default)]
    pub tax_regime: Option<String>,
    #[serde(default)]
    pub annual_income: Option<f64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub dependents: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("profile store failed: {0}")]
    Store(String),
}

/// Backing store for taxpayer profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when the user has no profile yet.
    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<TaxpayerProfile>, SessionError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<SessionUser>,
    pub profile: Option<TaxpayerProfile>,
    pub profile_loading: bool,
}

#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<SessionState>>,
    generation: Arc<AtomicU64>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.read().await.clone()
    }

    /// Phase 1: record the user and drop any profile from a prior session.
    pub async fn establish(&self, user: SessionUser) {
        let mut state = self.inner.write().await;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(user_id = %user.id, generation, "session: established");
        state.user = Some(user);
        state.profile = None;
        state.profile_loading = true;
    }

    /// Phase 2, awaited. Returns the profile that was stored, if any.
    ///
    /// # Errors
    ///
    /// `NotSignedIn` without an established user, or the store's failure.
    /// `profile_loading` is cleared either way.
    pub async fn load_profile(&self, store: &dyn ProfileStore) -> Result<Option<TaxpayerProfile>, SessionError> {
        let (user_id, generation) = {
            let state = self.inner.read().await;
            let user_id = state.user.as_ref().map(|u| u.id).ok_or(SessionError::NotSignedIn)?;
            (user_id, self.generation.load(Ordering::Acquire))
        };
        let fetched = store.fetch_profile(user_id).await;

        let mut state = self.inner.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(%user_id, generation, "session: profile arrived for a stale session, discarded");
            return Ok(None);
        }
        state.profile_loading = false;
        let profile = fetched?;
        state.profile.clone_from(&profile);
        Ok(profile)
    }

    /// Phase 2, detached. Failures are logged and leave `profile` empty.
    pub fn spawn_profile_load(&self, store: Arc<dyn ProfileStore>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.load_profile(store.as_ref()).await {
                warn!(error = %e, "session: profile load failed");
            }
        })
    }

    pub async fn sign_out(&self) {
        let mut state = self.inner.write().await;
        *state = SessionState::default();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "session: signed out");
    }
}
