//! Explicit authentication context.
//!
//! The auth provider owns principals; this session only mirrors which one is
//! current and lets live collections and the favorites coordinator observe
//! identity changes as events.

use std::sync::Arc;

use parkspot_engine::Principal;
use tokio::sync::watch;

/// The current principal plus a change stream.
///
/// Cloning is cheap and every clone observes the same session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    current: Arc<watch::Sender<Option<Principal>>>,
}

impl AuthSession {
    /// A signed-out session.
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
        }
    }

    /// A session already signed in as `principal`.
    pub fn signed_in(principal: Principal) -> Self {
        let session = Self::new();
        session.sign_in(principal);
        session
    }

    /// The current principal, if any.
    pub fn current(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Switch to `principal`. Signing in as the current principal again is
    /// not a change.
    pub fn sign_in(&self, principal: Principal) {
        let changed = self.current.send_if_modified(|current| {
            if current.as_ref() == Some(&principal) {
                return false;
            }
            *current = Some(principal.clone());
            true
        });
        if changed {
            tracing::info!(principal = %principal.id, "Principal signed in");
        }
    }

    pub fn sign_out(&self) {
        let changed = self.current.send_if_modified(|current| current.take().is_some());
        if changed {
            tracing::info!("Principal signed out");
        }
    }

    /// Receiver that is notified on every identity change.
    pub fn changes(&self) -> watch::Receiver<Option<Principal>> {
        self.current.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
