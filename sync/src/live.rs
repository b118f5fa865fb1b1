//! Live collection driver.
//!
//! Owns the real store subscription for one [`Feed`] and feeds its events
//! into a [`LiveList`]. Every published state goes out through a
//! `tokio::sync::watch` channel so presentation code only ever sees whole,
//! consistent [`ListState`] values.
//!
//! Each `start` retires the previous subscription before the new one is
//! requested. The pump task of a retired subscription may still hold an
//! event when it is aborted; the token check in [`LiveList`] drops it.

use std::sync::{Arc, Mutex, Weak};

use parkspot_engine::{
    CollectionQuery, Feed, ListState, LiveList, Principal, SubscriptionToken,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::error::StoreError;
use crate::lock;
use crate::store::{DocumentStore, SubscriptionEvent};

/// A collection kept in sync with the remote store.
///
/// Dropping it cancels the subscription.
pub struct LiveCollection {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    feed: Feed,
    list: Arc<Mutex<LiveList>>,
    publish: Arc<watch::Sender<ListState>>,
    /// Lock order: `pump` before `list`.
    pump: Mutex<Option<JoinHandle<()>>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl LiveCollection {
    /// Create an idle live collection over `feed`.
    pub fn new(store: Arc<dyn DocumentStore>, feed: Feed) -> Self {
        let (publish, _) = watch::channel(ListState::default());
        Self {
            inner: Arc::new(Inner {
                store,
                feed,
                list: Arc::new(Mutex::new(LiveList::new())),
                publish: Arc::new(publish),
                pump: Mutex::new(None),
                follower: Mutex::new(None),
            }),
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.inner.feed
    }

    /// Subscribe for `principal`, replacing any running subscription.
    ///
    /// Without a principal the list settles empty and nothing is subscribed.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self, principal: Option<Principal>) {
        self.inner.start(principal);
    }

    /// Cancel the running subscription. The last list and error stay visible.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stop, then start again for the principal of the last `start`.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Restart on every identity change of `auth`, starting right away with
    /// its current principal.
    pub fn follow(&self, auth: &AuthSession) {
        let mut changes = auth.changes();
        let initial = changes.borrow_and_update().clone();
        self.inner.start(initial);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let follower = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let principal = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!(
                    collection = %inner.feed.collection,
                    principal = principal.as_ref().map(|p| p.id.as_str()),
                    "Identity changed, restarting subscription"
                );
                inner.start(principal);
            }
        });

        if let Some(previous) = lock(&self.inner.follower).replace(follower) {
            previous.abort();
        }
    }

    /// The current state.
    pub fn state(&self) -> ListState {
        lock(&self.inner.list).state().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ListState> {
        self.inner.publish.subscribe()
    }

    /// Token of the subscription currently allowed to write, if any.
    pub fn active_token(&self) -> Option<SubscriptionToken> {
        lock(&self.inner.list).active_token()
    }
}

impl std::fmt::Debug for LiveCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCollection")
            .field("feed", &self.inner.feed)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn start(&self, principal: Option<Principal>) {
        let mut pump = lock(&self.pump);
        if let Some(previous) = pump.take() {
            previous.abort();
        }

        let query = principal.as_ref().map(|p| self.feed.query_for(p));
        let token = {
            let mut list = lock(&self.list);
            let token = list.start(principal);
            self.publish.send_replace(list.state().clone());
            token
        };

        *pump = self.spawn_pump(token, query);
    }

    fn stop(&self) {
        let mut pump = lock(&self.pump);
        if let Some(previous) = pump.take() {
            previous.abort();
        }

        let mut list = lock(&self.list);
        if list.stop() {
            info!(collection = %self.feed.collection, "Subscription stopped");
        }
        self.publish.send_replace(list.state().clone());
    }

    fn refresh(&self) {
        let mut pump = lock(&self.pump);
        if let Some(previous) = pump.take() {
            previous.abort();
        }

        let (token, query) = {
            let mut list = lock(&self.list);
            let token = list.refresh();
            let query = list.principal().map(|p| self.feed.query_for(p));
            self.publish.send_replace(list.state().clone());
            (token, query)
        };

        *pump = self.spawn_pump(token, query);
    }

    fn spawn_pump(
        &self,
        token: Option<SubscriptionToken>,
        query: Option<CollectionQuery>,
    ) -> Option<JoinHandle<()>> {
        let (token, query) = match (token, query) {
            (Some(token), Some(query)) => (token, query),
            _ => {
                debug!(collection = %self.feed.collection, "No principal, list settled empty");
                return None;
            }
        };

        info!(collection = %self.feed.collection, %token, "Starting subscription");
        Some(tokio::spawn(pump(
            Arc::clone(&self.store),
            query,
            token,
            Arc::clone(&self.list),
            Arc::clone(&self.publish),
        )))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&self.pump, &self.follower] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
    }
}

/// Forward subscription events for `token` until it is retired, fails, or the
/// store closes the channel.
async fn pump(
    store: Arc<dyn DocumentStore>,
    query: CollectionQuery,
    token: SubscriptionToken,
    list: Arc<Mutex<LiveList>>,
    publish: Arc<watch::Sender<ListState>>,
) {
    let collection = query.collection.clone();

    let mut subscription = match store.subscribe(query).await {
        Ok(subscription) => subscription,
        Err(error) => {
            warn!(%collection, %token, error = %error, "Subscribe failed");
            update(&list, &publish, |l| l.apply_error(token, error.to_string()));
            return;
        }
    };
    debug!(%collection, %token, subscription = subscription.id(), "Subscribed");

    while let Some(event) = subscription.next_event().await {
        let (applied, terminal) = match event {
            SubscriptionEvent::Snapshot(snapshot) => match snapshot.validate() {
                Ok(()) => {
                    debug!(%collection, %token, documents = snapshot.len(), "Snapshot");
                    (update(&list, &publish, |l| l.apply_snapshot(token, snapshot)), false)
                }
                Err(error) => {
                    warn!(%collection, %token, error = %error, "Rejected malformed snapshot");
                    (update(&list, &publish, |l| l.apply_error(token, error.to_string())), true)
                }
            },
            SubscriptionEvent::Error(error) => {
                warn!(%collection, %token, error = %error, "Subscription failed");
                (update(&list, &publish, |l| l.apply_error(token, error.to_string())), true)
            }
        };

        if !applied {
            debug!(%collection, %token, "Dropped event from retired subscription");
            return;
        }
        if terminal {
            return;
        }
    }

    warn!(%collection, %token, "Store closed the subscription");
    update(&list, &publish, |l| {
        l.apply_error(token, StoreError::Closed.to_string())
    });
}

/// Apply `f` to the list and publish the result if it changed anything.
fn update(
    list: &Mutex<LiveList>,
    publish: &watch::Sender<ListState>,
    f: impl FnOnce(&mut LiveList) -> bool,
) -> bool {
    let mut guard = lock(list);
    let applied = f(&mut guard);
    if applied {
        publish.send_replace(guard.state().clone());
    }
    applied
}
