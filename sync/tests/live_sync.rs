//! End-to-end tests for live collections and the favorites coordinator
//! running against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parkspot_engine::{Document, Error, Feed, ListState, Phase, Principal, SavePhase, ToggleState};
use parkspot_sync::{
    AuthSession, DocumentStore, FaultPoint, FavoritesCoordinator, FavoritesSettings,
    LiveCollection, MemoryStore, StoreError, UpsertPolicy,
};
use serde_json::json;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spot(id: &str) -> Document {
    Document::new(id, json!({"name": format!("Parking {}", id), "ownerId": "owner"}))
}

fn favorites_doc(owner: &str, ids: &[&str]) -> Document {
    Document::new(owner, json!({"userId": owner, "parkingIds": ids}))
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn list_until(
    rx: &mut watch::Receiver<ListState>,
    pred: impl FnMut(&ListState) -> bool,
) -> ListState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for list state")
        .expect("live collection dropped")
        .clone()
}

async fn toggles_until(
    rx: &mut watch::Receiver<ToggleState>,
    pred: impl FnMut(&ToggleState) -> bool,
) -> ToggleState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for toggle state")
        .expect("coordinator dropped")
        .clone()
}

/// Favorites feed plus coordinator for a signed-in principal.
fn favorites_setup(
    store: &Arc<MemoryStore>,
    auth: &AuthSession,
    settings: FavoritesSettings,
) -> (LiveCollection, FavoritesCoordinator) {
    let feed = LiveCollection::new(store.clone(), settings.feed());
    feed.follow(auth);
    let coordinator = FavoritesCoordinator::new(store.clone(), auth.clone(), settings);
    coordinator.attach(&feed);
    (feed, coordinator)
}

// ============================================================================
// Live collections
// ============================================================================

#[tokio::test]
async fn each_snapshot_replaces_the_list() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("parkings", spot("a"));

    let live = LiveCollection::new(store.clone(), Feed::global("parkings"));
    let mut rx = live.watch();
    live.start(Some(Principal::new("P")));

    let state = list_until(&mut rx, |s| s.phase == Phase::Streaming).await;
    assert_eq!(state.ids(), vec!["a"]);

    store.put("parkings", spot("b"));
    let state = list_until(&mut rx, |s| s.items.len() == 2).await;
    assert_eq!(state.ids(), vec!["a", "b"]);

    store.delete(&parkspot_engine::DocumentRef::new("parkings", "a"));
    let state = list_until(&mut rx, |s| s.items.len() == 1).await;
    assert_eq!(state.ids(), vec!["b"]);
    assert!(!state.loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn snapshot_then_error_keeps_last_list() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("parkings", spot("X"));
    store.put("parkings", spot("Y"));

    let live = LiveCollection::new(store.clone(), Feed::global("parkings"));
    let mut rx = live.watch();
    live.start(Some(Principal::new("P")));
    list_until(&mut rx, |s| s.phase == Phase::Streaming).await;

    let failed = store.fail_subscriptions(
        "parkings",
        StoreError::PermissionDenied("rules changed".into()),
    );
    assert_eq!(failed, 1);

    let state = list_until(&mut rx, |s| s.phase == Phase::Error).await;
    assert_eq!(state.ids(), vec!["X", "Y"]);
    assert!(!state.loading);
    assert!(matches!(state.error, Some(Error::SubscriptionFailed(_))));
}

#[tokio::test]
async fn failed_subscribe_is_terminal_until_refresh() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("parkings", spot("X"));
    store.fail_next(FaultPoint::Subscribe, StoreError::Unavailable("offline".into()));

    let live = LiveCollection::new(store.clone(), Feed::global("parkings"));
    let mut rx = live.watch();
    live.start(Some(Principal::new("P")));

    let state = list_until(&mut rx, |s| s.phase == Phase::Error).await;
    assert!(state.items.is_empty());
    assert!(live.active_token().is_none());

    live.refresh();
    let state = list_until(&mut rx, |s| s.phase == Phase::Streaming).await;
    assert_eq!(state.ids(), vec!["X"]);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn stop_freezes_state() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("parkings", spot("X"));

    let live = LiveCollection::new(store.clone(), Feed::global("parkings"));
    let mut rx = live.watch();
    live.start(Some(Principal::new("P")));
    list_until(&mut rx, |s| s.phase == Phase::Streaming).await;

    live.stop();
    live.stop();
    let frozen = live.state();

    store.put("parkings", spot("Y"));
    store.fail_subscriptions("parkings", StoreError::Unavailable("gone".into()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(live.state(), frozen);
    assert_eq!(frozen.ids(), vec!["X"]);
    assert!(!frozen.loading);
    assert_eq!(frozen.phase, Phase::Idle);
}

#[tokio::test]
async fn refresh_twice_converges_to_same_list() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("parkings", spot("a"));
    store.put("parkings", spot("b"));

    let live = LiveCollection::new(store.clone(), Feed::global("parkings"));
    let mut rx = live.watch();
    live.start(Some(Principal::new("P")));
    list_until(&mut rx, |s| s.phase == Phase::Streaming).await;

    live.refresh();
    let once = list_until(&mut rx, |s| s.phase == Phase::Streaming).await;
    live.refresh();
    let twice = list_until(&mut rx, |s| s.phase == Phase::Streaming).await;

    assert_eq!(once.items, twice.items);
    assert_eq!(twice.ids(), vec!["a", "b"]);
}

#[tokio::test]
async fn identity_change_discards_previous_feed() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("u1", &["A"]));
    store.put("favorites", favorites_doc("u2", &["B"]));

    let auth = AuthSession::signed_in(Principal::new("u1"));
    let live = LiveCollection::new(store.clone(), Feed::scoped("favorites", "userId"));
    let mut rx = live.watch();
    live.follow(&auth);

    let state = list_until(&mut rx, |s| s.phase == Phase::Streaming).await;
    assert_eq!(state.ids(), vec!["u1"]);

    auth.sign_in(Principal::new("u2"));
    let state = list_until(&mut rx, |s| s.ids() == vec!["u2"]).await;
    assert_eq!(state.phase, Phase::Streaming);

    // Writes to the old principal's document no longer reach the list.
    store.put("favorites", favorites_doc("u1", &["A", "C"]));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(live.state().ids(), vec!["u2"]);
    assert_eq!(store.subscriber_count(), 1);

    auth.sign_out();
    let state = list_until(&mut rx, |s| s.phase == Phase::Idle).await;
    assert!(state.items.is_empty());
    assert!(!state.loading);
}

// ============================================================================
// Favorites
// ============================================================================

#[tokio::test]
async fn toggle_adds_to_existing_favorites() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("P", &["A", "C"]));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let (_feed, favorites) = favorites_setup(&store, &auth, FavoritesSettings::default());
    let mut rx = favorites.watch();

    toggles_until(&mut rx, |s| s.items == set(&["A", "C"])).await;

    let pending = favorites.toggle("B").unwrap();
    assert_eq!(pending.optimistic(), &set(&["A", "B", "C"]));
    pending.settled().await.unwrap();

    let state = toggles_until(&mut rx, |s| !s.is_saving).await;
    assert_eq!(state.items, set(&["A", "B", "C"]));
    assert_eq!(state.phase, SavePhase::Idle);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn missing_document_falls_back_to_upsert() {
    init_tracing();
    let store = MemoryStore::new_shared();
    let auth = AuthSession::signed_in(Principal::new("P"));
    let (feed, favorites) = favorites_setup(&store, &auth, FavoritesSettings::default());
    let mut feed_rx = feed.watch();

    favorites.toggle("Z").unwrap().settled().await.unwrap();

    let state = favorites.state();
    assert!(state.items.contains("Z"));
    assert!(state.error.is_none());
    assert!(!state.is_saving);

    let list = list_until(&mut feed_rx, |s| !s.items.is_empty()).await;
    assert_eq!(list.items[0].get_str("userId"), Some("P"));
    assert_eq!(list.items[0].get("parkingIds"), Some(&json!(["Z"])));
}

#[tokio::test]
async fn failed_update_and_upsert_roll_back() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.fail_next(FaultPoint::Set, StoreError::Unavailable("offline".into()));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let favorites =
        FavoritesCoordinator::new(store.clone(), auth, FavoritesSettings::default());

    let before = favorites.favorites();
    let result = favorites.toggle("A").unwrap().settled().await;

    assert!(matches!(result, Err(Error::MutationFailed(_))));
    let state = favorites.state();
    assert_eq!(state.items, before);
    assert!(!state.is_saving);
    assert_eq!(state.phase, SavePhase::RolledBack);
    assert!(matches!(state.error, Some(Error::MutationFailed(_))));
    assert_eq!(store.document_count("favorites"), 0);
}

#[tokio::test]
async fn not_found_only_policy_skips_upsert_for_other_failures() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("P", &[]));
    store.fail_next(FaultPoint::Update, StoreError::PermissionDenied("rules".into()));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let favorites =
        FavoritesCoordinator::new(store.clone(), auth, FavoritesSettings::default());

    let result = favorites.toggle("A").unwrap().settled().await;

    assert!(matches!(result, Err(Error::MutationFailed(_))));
    let doc = store
        .get_document(&parkspot_engine::DocumentRef::new("favorites", "P"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get("parkingIds"), Some(&json!([])));
}

#[tokio::test]
async fn any_error_policy_upserts_after_other_failures() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("P", &["C"]));
    store.fail_next(FaultPoint::Update, StoreError::Unavailable("flaky".into()));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let settings = FavoritesSettings {
        upsert_policy: UpsertPolicy::AnyError,
        ..FavoritesSettings::default()
    };
    let (_feed, favorites) = favorites_setup(&store, &auth, settings);
    let mut rx = favorites.watch();
    toggles_until(&mut rx, |s| s.items == set(&["C"])).await;

    favorites.toggle("A").unwrap().settled().await.unwrap();

    let doc = store
        .get_document(&parkspot_engine::DocumentRef::new("favorites", "P"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get("parkingIds"), Some(&json!(["A", "C"])));
    assert!(favorites.state().error.is_none());
}

#[tokio::test]
async fn toggle_without_principal_changes_nothing() {
    init_tracing();
    let store = MemoryStore::new_shared();
    let favorites =
        FavoritesCoordinator::new(store.clone(), AuthSession::new(), FavoritesSettings::default());

    let result = favorites.toggle("A");

    assert!(matches!(result, Err(Error::Unauthenticated)));
    assert!(favorites.favorites().is_empty());
    assert!(!favorites.is_saving());
    tokio::task::yield_now().await;
    assert_eq!(store.document_count("favorites"), 0);
}

#[tokio::test(start_paused = true)]
async fn is_saving_spans_the_remote_write() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("P", &[]));
    store.set_latency(Duration::from_millis(200));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let favorites =
        FavoritesCoordinator::new(store.clone(), auth, FavoritesSettings::default());

    let pending = favorites.toggle("A").unwrap();
    assert!(favorites.is_saving());
    assert_eq!(favorites.state().phase, SavePhase::Saving);
    assert!(favorites.is_favorite("A"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(favorites.is_saving());

    pending.settled().await.unwrap();
    assert!(!favorites.is_saving());
    assert_eq!(favorites.state().phase, SavePhase::Idle);
}

#[tokio::test]
async fn overlapping_toggles_of_different_items_are_independent() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("P", &[]));
    let auth = AuthSession::signed_in(Principal::new("P"));
    let favorites =
        FavoritesCoordinator::new(store.clone(), auth, FavoritesSettings::default());

    // Both writes are spawned before either runs; the first one takes the fault.
    store.fail_next(FaultPoint::Update, StoreError::PermissionDenied("rules".into()));
    let first = favorites.toggle("A").unwrap();
    let second = favorites.toggle("B").unwrap();
    assert_eq!(second.optimistic(), &set(&["A", "B"]));
    assert!(favorites.is_saving());

    assert!(first.settled().await.is_err());
    second.settled().await.unwrap();

    let state = favorites.state();
    assert_eq!(state.items, set(&["B"]));
    assert!(!state.is_saving);
    assert_eq!(state.phase, SavePhase::RolledBack);
}

#[tokio::test]
async fn identity_change_resets_favorites() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("u1", &[]));
    store.put("favorites", favorites_doc("u2", &[]));
    store.set_latency(Duration::from_millis(100));
    let auth = AuthSession::signed_in(Principal::new("u1"));
    let (feed, favorites) = favorites_setup(&store, &auth, FavoritesSettings::default());
    let mut feed_rx = feed.watch();
    let mut rx = favorites.watch();
    list_until(&mut feed_rx, |s| s.ids() == vec!["u1"]).await;

    let pending = favorites.toggle("A").unwrap();
    assert!(favorites.is_favorite("A"));

    auth.sign_in(Principal::new("u2"));
    toggles_until(&mut rx, |s| s.items.is_empty() && !s.is_saving).await;
    list_until(&mut feed_rx, |s| s.ids() == vec!["u2"] && !s.loading).await;

    // The write for u1 still lands in u1's document.
    pending.settled().await.unwrap();
    let state = favorites.state();
    assert!(state.items.is_empty());
    assert!(!state.is_saving);
    assert_eq!(state.phase, SavePhase::Idle);

    let pending = favorites.toggle("A").unwrap();
    assert_eq!(pending.direction(), parkspot_engine::Direction::Add);
    pending.settled().await.unwrap();

    let own = store
        .get_document(&parkspot_engine::DocumentRef::new("favorites", "u2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(own.get("parkingIds"), Some(&json!(["A"])));
    let previous = store
        .get_document(&parkspot_engine::DocumentRef::new("favorites", "u1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(previous.get("parkingIds"), Some(&json!(["A"])));
}

#[tokio::test]
async fn rollback_for_previous_principal_does_not_leak() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("u1", &[]));
    store.put("favorites", favorites_doc("u2", &["B"]));
    store.set_latency(Duration::from_millis(100));
    store.fail_next(FaultPoint::Update, StoreError::PermissionDenied("rules".into()));
    let auth = AuthSession::signed_in(Principal::new("u1"));
    let (_feed, favorites) = favorites_setup(&store, &auth, FavoritesSettings::default());
    let mut rx = favorites.watch();

    let pending = favorites.toggle("A").unwrap();
    auth.sign_in(Principal::new("u2"));
    toggles_until(&mut rx, |s| s.items == set(&["B"])).await;

    assert!(matches!(pending.settled().await, Err(Error::MutationFailed(_))));
    let state = favorites.state();
    assert_eq!(state.items, set(&["B"]));
    assert_eq!(state.phase, SavePhase::Idle);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn sign_out_clears_favorites() {
    init_tracing();
    let store = MemoryStore::new_shared();
    store.put("favorites", favorites_doc("u1", &["A"]));
    let auth = AuthSession::signed_in(Principal::new("u1"));
    let (_feed, favorites) = favorites_setup(&store, &auth, FavoritesSettings::default());
    let mut rx = favorites.watch();
    toggles_until(&mut rx, |s| s.items == set(&["A"])).await;

    auth.sign_out();
    toggles_until(&mut rx, |s| s.items.is_empty()).await;

    assert!(matches!(favorites.toggle("A"), Err(Error::Unauthenticated)));
    assert!(favorites.favorites().is_empty());
}
