//! Live list - the state machine behind a collection subscription.
//!
//! ```text
//! Idle --start--> Loading --snapshot--> Streaming --snapshot--> Streaming
//!                    |                      |
//!                    +------error-----------+--> Error --refresh--> Loading
//!
//! stop: any phase --> Idle
//! ```
//!
//! The live list performs no IO. The driver that owns the real subscription
//! asks it for a [`SubscriptionToken`] when starting and passes that token
//! back with every event. Events whose token is not the active one are
//! discarded, which is what keeps a torn-down subscription from writing into
//! the list after a restart or stop.

use crate::{
    generation::{Generations, SubscriptionToken},
    CollectionSnapshot, Document, Error, Principal,
};
use serde::Serialize;
use std::sync::Arc;

/// Lifecycle phase of a live list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Streaming,
    Error,
}

/// What presentation code sees of a live list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListState {
    /// The materialized list. Shared, read-only.
    pub items: Arc<Vec<Document>>,
    pub loading: bool,
    pub error: Option<Error>,
    pub phase: Phase,
}

impl ListState {
    fn loading() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            loading: true,
            error: None,
            phase: Phase::Loading,
        }
    }

    fn settled_empty() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            loading: false,
            error: None,
            phase: Phase::Idle,
        }
    }

    /// Document IDs in list order.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|d| d.id.as_str()).collect()
    }
}

/// State machine for one subscriber.
#[derive(Debug, Default)]
pub struct LiveList {
    state: ListState,
    principal: Option<Principal>,
    generations: Generations,
    active: Option<SubscriptionToken>,
}

impl LiveList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &ListState {
        &self.state
    }

    /// The principal of the last `start`.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Token of the subscription currently allowed to write, if any.
    pub fn active_token(&self) -> Option<SubscriptionToken> {
        self.active
    }

    pub fn is_current(&self, token: SubscriptionToken) -> bool {
        self.active == Some(token)
    }

    /// Begin a new subscription for `principal`.
    ///
    /// Any previous subscription is retired first. Returns the token the
    /// driver must attach to the new subscription's events, or `None` when
    /// there is no principal and nothing should be subscribed.
    pub fn start(&mut self, principal: Option<Principal>) -> Option<SubscriptionToken> {
        self.active = None;
        self.principal = principal;

        if self.principal.is_none() {
            self.state = ListState::settled_empty();
            return None;
        }

        self.state = ListState::loading();
        let token = self.generations.next_token();
        self.active = Some(token);
        Some(token)
    }

    /// Retire the active subscription.
    ///
    /// The list and error are kept as they are; nothing is loading any more.
    /// Returns whether a subscription was active. Calling it again is a no-op.
    pub fn stop(&mut self) -> bool {
        let was_active = self.active.take().is_some();
        self.state.loading = false;
        self.state.phase = Phase::Idle;
        was_active
    }

    /// Restart with the principal of the last `start`.
    pub fn refresh(&mut self) -> Option<SubscriptionToken> {
        self.stop();
        let principal = self.principal.clone();
        self.start(principal)
    }

    /// Replace the list with a snapshot from the subscription `token`.
    ///
    /// Returns `false` if the token is stale and the snapshot was dropped.
    pub fn apply_snapshot(&mut self, token: SubscriptionToken, snapshot: CollectionSnapshot) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.state.items = Arc::new(snapshot.into_documents());
        self.state.loading = false;
        self.state.error = None;
        self.state.phase = Phase::Streaming;
        true
    }

    /// Record a subscription failure reported for `token`.
    ///
    /// The last known list stays available. The token is retired, so only
    /// `refresh` or `start` can bring the list back to life.
    pub fn apply_error(&mut self, token: SubscriptionToken, message: impl Into<String>) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.active = None;
        self.state.error = Some(Error::SubscriptionFailed(message.into()));
        self.state.loading = false;
        self.state.phase = Phase::Error;
        true
    }
}
