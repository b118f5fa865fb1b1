//! # Parkspot Sync
//!
//! Async drivers around the `parkspot-engine` state machines.
//!
//! - [`LiveCollection`] keeps one collection feed in sync with a push-capable
//!   [`DocumentStore`] and publishes list state through a watch channel.
//! - [`FavoritesCoordinator`] toggles favorites optimistically and writes them
//!   back in the background, rolling back on failure.
//! - [`AuthSession`] is the explicit principal context both of them follow.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parkspot_engine::Principal;
//! use parkspot_sync::{AuthSession, FavoritesCoordinator, LiveCollection, MemoryStore, SyncConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let store = MemoryStore::new_shared();
//! let auth = AuthSession::signed_in(Principal::new("u1"));
//!
//! let parkings = LiveCollection::new(store.clone(), config.parkings_feed());
//! parkings.follow(&auth);
//!
//! let favorites_feed = LiveCollection::new(store.clone(), config.favorites_feed());
//! favorites_feed.follow(&auth);
//!
//! let favorites = FavoritesCoordinator::new(store, auth, config.favorites.clone());
//! favorites.attach(&favorites_feed);
//! favorites.toggle("parking-42")?.settled().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod favorites;
pub mod live;
pub mod memory;
pub mod store;

pub use auth::AuthSession;
pub use config::{ConfigError, FavoritesSettings, SyncConfig, UpsertPolicy};
pub use error::StoreError;
pub use favorites::{FavoritesCoordinator, PendingToggle};
pub use live::LiveCollection;
pub use memory::{FaultPoint, MemoryStore};
pub use store::{DocumentStore, Subscription, SubscriptionEvent};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
