//! Optimistic membership toggles with rollback.
//!
//! The [`ToggleMachine`] owns a set of item ids (e.g. favorite parkings) and
//! the intents of toggles whose remote write has not resolved yet:
//!
//! ```text
//! Idle --begin--> Saving --commit--> Idle
//!                   |
//!                   +----rollback--> RolledBack --begin--> Saving
//! ```
//!
//! A toggle is applied to the local set immediately. Commit leaves the local
//! set alone since the next remote snapshot confirms it; rollback reverts
//! the item's membership. Snapshots rebase the local set on the confirmed
//! remote set and replay whatever is still in flight.
//!
//! Two overlapping toggles of the same item both read the optimistic set, so
//! the second one computes its direction from a state the remote side has
//! not confirmed. That lost-update window is visible through
//! [`ToggleMachine::in_flight`].

use crate::{error::Result, DocumentId, Error, Principal, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of one toggle attempt.
pub type IntentId = u64;

/// Lifecycle phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SavePhase {
    #[default]
    Idle,
    Saving,
    RolledBack,
}

/// Which way a toggle moves an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Add,
    Remove,
}

impl Direction {
    fn apply(self, set: &mut BTreeSet<String>, item: &str) {
        match self {
            Direction::Add => {
                set.insert(item.to_owned());
            }
            Direction::Remove => {
                set.remove(item);
            }
        }
    }

    /// The opposite direction.
    pub fn inverse(self) -> Self {
        match self {
            Direction::Add => Direction::Remove,
            Direction::Remove => Direction::Add,
        }
    }
}

/// A pending toggle. Lives from `begin_toggle` until commit or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationIntent {
    pub id: IntentId,
    /// Owner of the document being mutated
    pub principal_id: PrincipalId,
    pub item_id: DocumentId,
    pub direction: Direction,
    /// Local set before the toggle
    pub baseline: BTreeSet<String>,
    /// Local set right after the toggle
    pub target: BTreeSet<String>,
}

/// What presentation code sees of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToggleState {
    pub items: BTreeSet<String>,
    pub is_saving: bool,
    pub phase: SavePhase,
    pub error: Option<Error>,
}

/// Optimistic toggle state machine.
#[derive(Debug, Clone, Default)]
pub struct ToggleMachine {
    owner: Option<PrincipalId>,
    local: BTreeSet<String>,
    confirmed: BTreeSet<String>,
    in_flight: BTreeMap<IntentId, MutationIntent>,
    phase: SavePhase,
    error: Option<Error>,
    next_intent: IntentId,
}

impl ToggleMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a machine whose confirmed and local sets are `items`.
    pub fn with_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = items.into_iter().map(Into::into).collect();
        Self {
            local: set.clone(),
            confirmed: set,
            ..Self::default()
        }
    }

    /// Principal whose set the machine currently holds.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Bind the machine to `principal`.
    ///
    /// On an identity change the sets, pending intents and error are
    /// dropped. Intent ids keep counting up, so a retired intent is refused
    /// by [`commit`](Self::commit) and [`rollback`](Self::rollback).
    /// Returns whether the machine was reset.
    pub fn switch_principal(&mut self, principal: Option<&Principal>) -> bool {
        let id = principal.map(|p| p.id.as_str());
        if self.owner.as_deref() == id {
            return false;
        }
        *self = Self {
            owner: id.map(str::to_owned),
            next_intent: self.next_intent,
            ..Self::default()
        };
        true
    }

    /// The optimistic local set.
    pub fn items(&self) -> &BTreeSet<String> {
        &self.local
    }

    /// The last set confirmed by the remote store.
    pub fn confirmed(&self) -> &BTreeSet<String> {
        &self.confirmed
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.local.contains(item_id)
    }

    pub fn phase(&self) -> SavePhase {
        self.phase
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_saving(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Intents whose remote write has not resolved, in begin order.
    pub fn in_flight(&self) -> impl Iterator<Item = &MutationIntent> {
        self.in_flight.values()
    }

    /// Snapshot of the state for presentation.
    pub fn state(&self) -> ToggleState {
        ToggleState {
            items: self.local.clone(),
            is_saving: self.is_saving(),
            phase: self.phase,
            error: self.error.clone(),
        }
    }

    /// Forget a previously reported error.
    pub fn clear_error(&mut self) {
        self.error = None;
        if self.phase == SavePhase::RolledBack {
            self.phase = SavePhase::Idle;
        }
    }

    /// Start a toggle of `item_id` for `principal`.
    ///
    /// Without a principal nothing changes except the reported error.
    pub fn begin_toggle(
        &mut self,
        principal: Option<&Principal>,
        item_id: &str,
    ) -> Result<MutationIntent> {
        let Some(principal) = principal else {
            self.error = Some(Error::Unauthenticated);
            return Err(Error::Unauthenticated);
        };

        let direction = if self.local.contains(item_id) {
            Direction::Remove
        } else {
            Direction::Add
        };

        let baseline = self.local.clone();
        direction.apply(&mut self.local, item_id);

        self.next_intent += 1;
        let intent = MutationIntent {
            id: self.next_intent,
            principal_id: principal.id.clone(),
            item_id: item_id.to_owned(),
            direction,
            baseline,
            target: self.local.clone(),
        };

        self.in_flight.insert(intent.id, intent.clone());
        self.phase = SavePhase::Saving;
        self.error = None;

        Ok(intent)
    }

    /// The remote write of `intent` succeeded.
    ///
    /// Returns `false` if the intent was not in flight.
    pub fn commit(&mut self, intent: &MutationIntent) -> bool {
        if self.in_flight.remove(&intent.id).is_none() {
            return false;
        }
        if self.in_flight.is_empty() {
            self.phase = if self.error.is_some() {
                SavePhase::RolledBack
            } else {
                SavePhase::Idle
            };
        }
        true
    }

    /// The remote write of `intent` failed for good: revert the item.
    ///
    /// Returns `false` if the intent was not in flight.
    pub fn rollback(&mut self, intent: &MutationIntent, reason: impl Into<String>) -> bool {
        if self.in_flight.remove(&intent.id).is_none() {
            return false;
        }
        intent.direction.inverse().apply(&mut self.local, &intent.item_id);
        self.error = Some(Error::MutationFailed(reason.into()));
        if self.in_flight.is_empty() {
            self.phase = SavePhase::RolledBack;
        }
        true
    }

    /// Rebase on a set confirmed by the remote store.
    pub fn apply_snapshot(&mut self, remote: BTreeSet<String>) {
        let mut local = remote.clone();
        for intent in self.in_flight.values() {
            intent.direction.apply(&mut local, &intent.item_id);
        }
        self.confirmed = remote;
        self.local = local;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn principal() -> Principal {
        Principal::new("P")
    }

    #[test]
    fn toggle_adds_missing_item() {
        let mut machine = ToggleMachine::with_items(["A", "C"]);
        let intent = machine.begin_toggle(Some(&principal()), "B").unwrap();

        assert_eq!(intent.direction, Direction::Add);
        assert_eq!(intent.baseline, set(&["A", "C"]));
        assert_eq!(intent.target, set(&["A", "B", "C"]));
        assert_eq!(machine.items(), &set(&["A", "B", "C"]));
        assert!(machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::Saving);
    }

    #[test]
    fn toggle_removes_present_item() {
        let mut machine = ToggleMachine::with_items(["A", "C"]);
        let intent = machine.begin_toggle(Some(&principal()), "A").unwrap();

        assert_eq!(intent.direction, Direction::Remove);
        assert_eq!(machine.items(), &set(&["C"]));
    }

    #[test]
    fn commit_keeps_optimistic_value() {
        let mut machine = ToggleMachine::with_items(["A", "C"]);
        let intent = machine.begin_toggle(Some(&principal()), "B").unwrap();

        assert!(machine.commit(&intent));
        assert_eq!(machine.items(), &set(&["A", "B", "C"]));
        assert!(!machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::Idle);
        assert!(machine.error().is_none());
    }

    #[test]
    fn rollback_restores_baseline() {
        let mut machine = ToggleMachine::with_items(["A", "C"]);
        let intent = machine.begin_toggle(Some(&principal()), "B").unwrap();

        assert!(machine.rollback(&intent, "unavailable"));
        assert_eq!(machine.items(), &intent.baseline);
        assert!(!machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::RolledBack);
        assert_eq!(
            machine.error(),
            Some(&Error::MutationFailed("unavailable".into()))
        );
    }

    #[test]
    fn unauthenticated_changes_nothing() {
        let mut machine = ToggleMachine::with_items(["A"]);
        let result = machine.begin_toggle(None, "B");

        assert_eq!(result, Err(Error::Unauthenticated));
        assert_eq!(machine.items(), &set(&["A"]));
        assert!(!machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::Idle);
        assert_eq!(machine.error(), Some(&Error::Unauthenticated));
    }

    #[test]
    fn resolving_twice_is_rejected() {
        let mut machine = ToggleMachine::new();
        let intent = machine.begin_toggle(Some(&principal()), "A").unwrap();
        assert!(machine.commit(&intent));
        assert!(!machine.commit(&intent));
        assert!(!machine.rollback(&intent, "late"));
        assert_eq!(machine.items(), &set(&["A"]));
    }

    #[test]
    fn snapshot_replays_in_flight_intents() {
        let mut machine = ToggleMachine::with_items(["A"]);
        let _pending = machine.begin_toggle(Some(&principal()), "B").unwrap();

        // A snapshot from before the write landed must not hide the toggle.
        machine.apply_snapshot(set(&["A", "D"]));
        assert_eq!(machine.items(), &set(&["A", "B", "D"]));
        assert_eq!(machine.confirmed(), &set(&["A", "D"]));
    }

    #[test]
    fn snapshot_is_source_of_truth_when_idle() {
        let mut machine = ToggleMachine::with_items(["A", "B"]);
        machine.apply_snapshot(set(&["C"]));
        assert_eq!(machine.items(), &set(&["C"]));
    }

    #[test]
    fn independent_toggles_resolve_independently() {
        let mut machine = ToggleMachine::with_items(["A"]);
        let add_b = machine.begin_toggle(Some(&principal()), "B").unwrap();
        let add_c = machine.begin_toggle(Some(&principal()), "C").unwrap();

        machine.rollback(&add_b, "denied");
        assert!(machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::Saving);
        assert_eq!(machine.items(), &set(&["A", "C"]));

        machine.commit(&add_c);
        assert!(!machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::RolledBack);
        assert_eq!(machine.items(), &set(&["A", "C"]));
    }

    #[test]
    fn overlapping_toggles_of_same_item_are_visible() {
        let mut machine = ToggleMachine::with_items(["A"]);
        let first = machine.begin_toggle(Some(&principal()), "B").unwrap();
        let second = machine.begin_toggle(Some(&principal()), "B").unwrap();

        // The second read the unconfirmed optimistic value.
        assert_eq!(first.direction, Direction::Add);
        assert_eq!(second.direction, Direction::Remove);
        assert_eq!(machine.in_flight().count(), 2);

        // First write fails: its rollback undoes the add the second one undid.
        machine.rollback(&first, "denied");
        machine.commit(&second);
        assert_eq!(machine.items(), &set(&["A"]));
    }

    #[test]
    fn switching_principal_retires_pending_intents() {
        let mut machine = ToggleMachine::new();
        assert!(machine.switch_principal(Some(&Principal::new("u1"))));
        assert!(!machine.switch_principal(Some(&Principal::new("u1"))));
        machine.apply_snapshot(set(&["A"]));
        let old = machine.begin_toggle(Some(&Principal::new("u1")), "B").unwrap();

        assert!(machine.switch_principal(Some(&Principal::new("u2"))));
        assert_eq!(machine.owner(), Some("u2"));
        assert!(machine.items().is_empty());
        assert!(!machine.is_saving());
        assert_eq!(machine.phase(), SavePhase::Idle);

        let fresh = machine.begin_toggle(Some(&Principal::new("u2")), "C").unwrap();
        assert_ne!(fresh.id, old.id);
        assert!(!machine.commit(&old));
        assert!(!machine.rollback(&old, "late"));
        assert_eq!(machine.items(), &set(&["C"]));
        assert!(machine.is_saving());
    }

    #[test]
    fn sign_out_clears_the_set() {
        let mut machine = ToggleMachine::new();
        machine.switch_principal(Some(&Principal::new("u1")));
        machine.apply_snapshot(set(&["A"]));

        assert!(machine.switch_principal(None));
        assert!(machine.owner().is_none());
        assert!(machine.items().is_empty());
        assert!(machine.confirmed().is_empty());
    }

    #[test]
    fn clear_error_leaves_rolled_back() {
        let mut machine = ToggleMachine::new();
        let intent = machine.begin_toggle(Some(&principal()), "A").unwrap();
        machine.rollback(&intent, "x");
        machine.clear_error();
        assert!(machine.error().is_none());
        assert_eq!(machine.phase(), SavePhase::Idle);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_set() -> impl Strategy<Value = BTreeSet<String>> {
            prop::collection::btree_set("[A-F]", 0..6)
        }

        proptest! {
            #[test]
            fn prop_commit_flips_membership(start in arb_set(), item in "[A-H]") {
                let mut machine = ToggleMachine::with_items(start.clone());
                let intent = machine.begin_toggle(Some(&principal()), &item).unwrap();
                machine.commit(&intent);

                prop_assert_eq!(machine.contains(&item), !start.contains(&item));
                prop_assert!(!machine.is_saving());
                prop_assert!(machine.error().is_none());
            }

            #[test]
            fn prop_rollback_restores_start(start in arb_set(), item in "[A-H]") {
                let mut machine = ToggleMachine::with_items(start.clone());
                let intent = machine.begin_toggle(Some(&principal()), &item).unwrap();
                machine.rollback(&intent, "failed");

                prop_assert_eq!(machine.items(), &start);
                prop_assert!(machine.error().is_some());
            }

            #[test]
            fn prop_unauthenticated_is_inert(start in arb_set(), item in "[A-H]") {
                let mut machine = ToggleMachine::with_items(start.clone());
                prop_assert_eq!(machine.begin_toggle(None, &item), Err(Error::Unauthenticated));
                prop_assert_eq!(machine.items(), &start);
                prop_assert_eq!(machine.in_flight().count(), 0);
            }
        }
    }
}
