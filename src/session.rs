use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StorageError;
use crate::model::{RecordType, SessionPayload};
use crate::storage::{KeyValueStore, TOKEN_KEY};
use crate::token;

/// Authorization state exposed to the rest of the client.
///
/// While `is_loading` is true the role is unknown and nothing role-gated may
/// be shown. Once it is false, `payload == None` means signed out.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub token: Option<String>,
    pub payload: Option<SessionPayload>,
    pub is_loading: bool,
}

impl SessionState {
    pub fn loading() -> Self {
        Self {
            token: None,
            payload: None,
            is_loading: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            token: None,
            payload: None,
            is_loading: false,
        }
    }

    pub fn authenticated(token: String, payload: SessionPayload) -> Self {
        Self {
            token: Some(token),
            payload: Some(payload),
            is_loading: false,
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        self.payload.as_ref().map(SessionPayload::record_type)
    }

    pub fn is_authenticated(&self) -> bool {
        !self.is_loading && self.payload.is_some()
    }
}

/// Owns the persisted session token and the decoded session derived from it.
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Create a manager in the loading state; call [`initialize`](Self::initialize) once per launch.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (state, _) = watch::channel(SessionState::loading());
        Self { store, state }
    }

    /// Restore the session from the persisted token.
    ///
    /// Never fails: a storage error is treated as "no token", and a token that
    /// does not decode (or has expired) is deleted and treated the same way.
    pub async fn initialize(&self) -> SessionState {
        self.state.send_replace(SessionState::loading());

        let next = match self.store.get_item(TOKEN_KEY).await {
            Ok(Some(token)) => self.restore(token).await,
            Ok(None) => {
                log::debug!("[session] no persisted token");
                SessionState::signed_out()
            }
            Err(e) => {
                log::error!("[session] failed to read persisted token: {e}");
                SessionState::signed_out()
            }
        };

        if let Some(payload) = &next.payload {
            log::info!(
                "[session] restored {} session for user {}",
                payload.record_type(),
                payload.user_id()
            );
        }

        self.state.send_replace(next.clone());
        next
    }

    /// Persist a freshly issued token and derive the session from it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the token could not be written. A token that
    /// does not decode is discarded and yields a signed-out state.
    pub async fn establish(&self, token: String) -> Result<SessionState, StorageError> {
        self.store.set_item(TOKEN_KEY, &token).await?;
        let next = self.restore(token).await;
        self.state.send_replace(next.clone());
        Ok(next)
    }

    /// Log out: forget the in-memory session and delete the persisted token.
    pub async fn teardown(&self) -> Result<(), StorageError> {
        self.state.send_replace(SessionState::signed_out());
        self.store.remove_item(TOKEN_KEY).await?;
        log::info!("[session] signed out");
        Ok(())
    }

    /// Current state snapshot
    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the loading flag clears and return that state.
    pub async fn wait_ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let ready = rx.wait_for(|state| !state.is_loading).await.map(|s| s.clone());
        ready.unwrap_or_else(|_| self.current())
    }

    async fn restore(&self, token: String) -> SessionState {
        match token::decode_unexpired(&token, Utc::now().timestamp()) {
            Ok(payload) => SessionState::authenticated(token, payload),
            Err(e) => {
                log::warn!("[session] discarding persisted token: {e}");
                if let Err(e) = self.store.remove_item(TOKEN_KEY).await {
                    log::error!("[session] failed to delete invalid token: {e}");
                }
                SessionState::signed_out()
            }
        }
    }
}
