//! Optimistic favorites coordinator.
//!
//! A toggle updates the local set right away and then writes to the
//! principal's favorites document in a background task:
//!
//! 1. `ArrayUnion` / `ArrayRemove` of the item on `favorites/{principal}`.
//! 2. If that fails and the [`UpsertPolicy`](crate::UpsertPolicy) allows it,
//!    a merge write of the whole optimistic set plus the owner field.
//! 3. Commit on success, otherwise roll the item back and report
//!    [`Error::MutationFailed`].
//!
//! The local set belongs to the signed-in principal. An identity change
//! resets it, and writes still running for the previous principal resolve
//! without touching the new state.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use parkspot_engine::{
    document::union_string_sets, Direction, DocumentRef, Error, FieldMutation, Fields, ListState,
    MutationIntent, Phase, Principal, ToggleMachine, ToggleState, WriteMode,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::config::FavoritesSettings;
use crate::live::LiveCollection;
use crate::lock;
use crate::store::DocumentStore;

/// Toggles favorites for the signed-in principal.
pub struct FavoritesCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    auth: AuthSession,
    settings: FavoritesSettings,
    machine: Mutex<ToggleMachine>,
    publish: watch::Sender<ToggleState>,
    attachment: Mutex<Option<JoinHandle<()>>>,
    identity: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a toggle whose remote write may still be running.
#[derive(Debug)]
pub struct PendingToggle {
    optimistic: BTreeSet<String>,
    direction: Direction,
    task: JoinHandle<Result<(), Error>>,
}

impl PendingToggle {
    /// The local set right after the toggle was applied.
    pub fn optimistic(&self) -> &BTreeSet<String> {
        &self.optimistic
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Wait for the remote write to commit or roll back.
    pub async fn settled(self) -> Result<(), Error> {
        match self.task.await {
            Ok(result) => result,
            Err(join_error) => Err(Error::MutationFailed(join_error.to_string())),
        }
    }
}

impl FavoritesCoordinator {
    /// Create a coordinator for the principals of `auth`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: AuthSession,
        settings: FavoritesSettings,
    ) -> Self {
        let mut changes = auth.changes();
        let mut machine = ToggleMachine::new();
        machine.switch_principal(changes.borrow_and_update().as_ref());
        let (publish, _) = watch::channel(machine.state());

        let inner = Arc::new(Inner {
            store,
            auth,
            settings,
            machine: Mutex::new(machine),
            publish,
            attachment: Mutex::new(None),
            identity: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let follower = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let principal = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let mut machine = lock(&inner.machine);
                inner.switch_principal(&mut machine, principal.as_ref());
            }
        });
        *lock(&inner.identity) = Some(follower);

        Self { inner }
    }

    pub fn settings(&self) -> &FavoritesSettings {
        &self.inner.settings
    }

    /// Add `item_id` if it is not a favorite, remove it if it is.
    ///
    /// Returns as soon as the local set changed; the remote write keeps
    /// running even if the returned handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn toggle(&self, item_id: &str) -> Result<PendingToggle, Error> {
        let principal = self.inner.auth.current();

        let intent = {
            let mut machine = lock(&self.inner.machine);
            self.inner.switch_principal(&mut machine, principal.as_ref());
            let begun = machine.begin_toggle(principal.as_ref(), item_id);
            self.inner.publish.send_replace(machine.state());
            match begun {
                Ok(intent) => intent,
                Err(error) => {
                    warn!(item = item_id, "Toggle rejected without a signed-in principal");
                    return Err(error);
                }
            }
        };

        debug!(
            intent = intent.id,
            principal = %intent.principal_id,
            item = %intent.item_id,
            direction = ?intent.direction,
            "Optimistic toggle applied"
        );

        let optimistic = intent.target.clone();
        let direction = intent.direction;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.persist(intent).await });

        Ok(PendingToggle {
            optimistic,
            direction,
            task,
        })
    }

    /// Keep the confirmed set in sync with a live collection over the
    /// favorites feed. Replaces any previous attachment.
    pub fn attach(&self, live: &LiveCollection) {
        let mut states = live.watch();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let initial = states.borrow_and_update().clone();
        self.inner.rebase(&initial);

        let task = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let state = states.borrow_and_update().clone();
                inner.rebase(&state);
            }
        });

        if let Some(previous) = lock(&self.inner.attachment).replace(task) {
            previous.abort();
        }
    }

    /// Current favorites, saving flag, phase and last error.
    pub fn state(&self) -> ToggleState {
        lock(&self.inner.machine).state()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ToggleState> {
        self.inner.publish.subscribe()
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        lock(&self.inner.machine).items().clone()
    }

    pub fn is_favorite(&self, item_id: &str) -> bool {
        lock(&self.inner.machine).contains(item_id)
    }

    pub fn is_saving(&self) -> bool {
        lock(&self.inner.machine).is_saving()
    }

    /// Forget the last reported error.
    pub fn clear_error(&self) {
        let mut machine = lock(&self.inner.machine);
        machine.clear_error();
        self.inner.publish.send_replace(machine.state());
    }
}

impl std::fmt::Debug for FavoritesCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FavoritesCoordinator")
            .field("settings", &self.inner.settings)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn persist(&self, intent: MutationIntent) -> Result<(), Error> {
        let doc = DocumentRef::new(self.settings.collection.clone(), intent.principal_id.clone());
        let item = vec![Value::String(intent.item_id.clone())];
        let mutation = match intent.direction {
            Direction::Add => FieldMutation::array_union(self.settings.items_field.clone(), item),
            Direction::Remove => {
                FieldMutation::array_remove(self.settings.items_field.clone(), item)
            }
        };

        let outcome = match self.store.update_document(&doc, vec![mutation]).await {
            Ok(()) => Ok(()),
            Err(error) if self.settings.upsert_policy.should_upsert(&error) => {
                debug!(doc = %doc, error = %error, "Update failed, upserting favorites document");
                self.store
                    .set_document(&doc, self.upsert_fields(&intent), WriteMode::Merge)
                    .await
            }
            Err(error) => Err(error),
        };

        let mut machine = lock(&self.machine);
        let (applied, result) = match outcome {
            Ok(()) => (machine.commit(&intent), Ok(())),
            Err(error) => {
                let reason = error.to_string();
                let applied = machine.rollback(&intent, reason.clone());
                (applied, Err(Error::MutationFailed(reason)))
            }
        };

        if !applied {
            debug!(doc = %doc, item = %intent.item_id, "Toggle retired before its write resolved");
            return result;
        }
        match &result {
            Ok(()) => {
                info!(doc = %doc, item = %intent.item_id, direction = ?intent.direction, "Favorite saved")
            }
            Err(error) => {
                warn!(doc = %doc, item = %intent.item_id, error = %error, "Favorite rolled back")
            }
        }
        self.publish.send_replace(machine.state());
        result
    }

    /// Reset `machine` if `principal` is not the one it belongs to.
    fn switch_principal(&self, machine: &mut ToggleMachine, principal: Option<&Principal>) {
        if machine.switch_principal(principal) {
            info!(
                principal = principal.map(|p| p.id.as_str()),
                "Favorites reset for identity change"
            );
            self.publish.send_replace(machine.state());
        }
    }

    fn upsert_fields(&self, intent: &MutationIntent) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            self.settings.owner_field.clone(),
            Value::String(intent.principal_id.clone()),
        );
        fields.insert(
            self.settings.items_field.clone(),
            Value::Array(intent.target.iter().cloned().map(Value::String).collect()),
        );
        fields
    }

    /// Rebase on a settled, error-free list state.
    fn rebase(&self, state: &ListState) {
        if state.loading || state.error.is_some() {
            return;
        }
        if !matches!(state.phase, Phase::Streaming | Phase::Idle) {
            return;
        }

        let remote = union_string_sets(state.items.iter(), &self.settings.items_field);
        let mut machine = lock(&self.machine);
        let before = machine.state();
        machine.apply_snapshot(remote);
        let after = machine.state();
        if after != before {
            debug!(favorites = after.items.len(), "Rebased on confirmed favorites");
            self.publish.send_replace(after);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&self.attachment, &self.identity] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
    }
}
