use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use ts_rs::TS;

use crate::local_store::{LocalStore, StoreError, CURRENT_USER_KEY};

/// An authenticated user. `epoch` identifies the sign-in that produced it, so
/// two sessions for the same user are still distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: String,
    pub access_token: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Anonymous,
    Authenticated(UserSession),
}

impl AuthState {
    pub fn session(&self) -> Option<&UserSession> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            AuthState::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session().map(|s| s.user_id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

/// What survives a restart under `currentUser`. The access token is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StoredUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<AuthState>>,
    epoch: Arc<AtomicU64>,
    store: Option<LocalStore>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::Anonymous);
        Self {
            tx: Arc::new(tx),
            epoch: Arc::new(AtomicU64::new(0)),
            store: None,
        }
    }

    /// Session that remembers the signed-in user in `store`.
    pub fn with_store(store: LocalStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    pub fn current(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    pub fn sign_in(
        &self,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<UserSession, StoreError> {
        let session = UserSession {
            user_id: user_id.into(),
            access_token: access_token.into(),
            epoch: self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
        };
        if let Some(store) = &self.store {
            let stored = StoredUser {
                id: session.user_id.clone(),
                username: None,
            };
            let text = serde_json::to_string(&stored).map_err(|source| StoreError::Encode {
                key: CURRENT_USER_KEY.to_string(),
                source,
            })?;
            store.write_raw(CURRENT_USER_KEY, &text)?;
        }
        info!(
            target: "cantoral",
            event = "session_signed_in",
            user_id = %session.user_id,
            epoch = session.epoch
        );
        self.tx.send_replace(AuthState::Authenticated(session.clone()));
        Ok(session)
    }

    pub fn sign_out(&self) -> Result<(), StoreError> {
        if let Some(store) = &self.store {
            store.remove_raw(CURRENT_USER_KEY)?;
        }
        let previous = self.tx.send_replace(AuthState::Anonymous);
        if let Some(session) = previous.session() {
            info!(
                target: "cantoral",
                event = "session_signed_out",
                user_id = %session.user_id,
                epoch = session.epoch
            );
        }
        Ok(())
    }

    /// Re-establishes the remembered user, if any. The restored session carries
    /// no access token. Unreadable entries are dropped.
    pub fn restore(&self) -> Result<Option<UserSession>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(text) = store.read_raw(CURRENT_USER_KEY) else {
            return Ok(None);
        };
        match serde_json::from_str::<StoredUser>(&text) {
            Ok(user) if !user.id.trim().is_empty() => self.sign_in(user.id, "").map(Some),
            Ok(_) | Err(_) => {
                warn!(
                    target: "cantoral",
                    event = "session_restore_discarded",
                    key = CURRENT_USER_KEY
                );
                store.remove_raw(CURRENT_USER_KEY)?;
                Ok(None)
            }
        }
    }
}
