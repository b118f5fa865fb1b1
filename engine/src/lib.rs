//! # Parkspot Engine
//!
//! Deterministic state machines for the realtime side of the Parkspot app.
//!
//! This crate holds the logic that sits between a push-capable document store
//! and presentation code: keeping a materialized list in step with a remote
//! collection, and applying membership toggles (favorites) optimistically.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to a store, a clock, or a runtime
//! - **Deterministic**: the same events always produce the same state
//! - **Testable**: pure logic, every transition is a plain method call
//!
//! The async drivers that wire these machines to a real store live in the
//! `parkspot-sync` crate.
//!
//! ## Core Concepts
//!
//! ### Documents and snapshots
//!
//! A [`Document`] is an id plus an untyped field map. The store pushes
//! [`CollectionSnapshot`]s: full, ordered materializations of a query, never
//! diffs.
//!
//! ### Feeds
//!
//! A [`Feed`] names a collection and how it is scoped to the current
//! [`Principal`]: the parkings feed is global, the favorites feed is filtered
//! by the principal id.
//!
//! ### Live lists
//!
//! [`LiveList`] is the subscriber state machine
//! (`Idle -> Loading -> {Streaming, Error}`). Every subscription it starts is
//! stamped with a [`SubscriptionToken`]; events from retired tokens are
//! dropped.
//!
//! ### Optimistic toggles
//!
//! [`ToggleMachine`] applies a toggle locally, tracks it as a
//! [`MutationIntent`] until the remote write resolves, and reverts it on
//! failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use parkspot_engine::{
//!     CollectionSnapshot, Document, Feed, LiveList, Principal, ToggleMachine,
//! };
//! use serde_json::json;
//!
//! let principal = Principal::new("uid-1");
//!
//! // 1. Resolve the favorites feed for the principal
//! let feed = Feed::scoped("favorites", "userId");
//! let query = feed.query_for(&principal);
//! assert!(query.filter.is_some());
//!
//! // 2. Drive the live list with store events
//! let mut list = LiveList::new();
//! let token = list.start(Some(principal.clone())).unwrap();
//! let favorites = Document::new("uid-1", json!({"userId": "uid-1", "parkingIds": ["A", "C"]}));
//! list.apply_snapshot(token, CollectionSnapshot::new(vec![favorites], 1706745600000));
//! assert_eq!(list.state().ids(), vec!["uid-1"]);
//!
//! // 3. Toggle a favorite optimistically
//! let mut toggles = ToggleMachine::with_items(["A", "C"]);
//! let intent = toggles.begin_toggle(Some(&principal), "B").unwrap();
//! assert!(toggles.contains("B"));
//! toggles.commit(&intent);
//! assert!(!toggles.is_saving());
//! ```

pub mod document;
pub mod error;
pub mod generation;
pub mod live;
pub mod mutation;
pub mod optimistic;
pub mod principal;
pub mod query;
pub mod snapshot;

// Re-export main types at crate root
pub use document::{Document, DocumentRef, Fields, WriteMode};
pub use error::Error;
pub use generation::{Generations, SubscriptionToken};
pub use live::{ListState, LiveList, Phase};
pub use mutation::FieldMutation;
pub use optimistic::{
    Direction, IntentId, MutationIntent, SavePhase, ToggleMachine, ToggleState,
};
pub use principal::Principal;
pub use query::{CollectionQuery, Feed, Filter, FilterTarget, Scope};
pub use snapshot::CollectionSnapshot;

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionPath = String;
pub type PrincipalId = String;
pub type Timestamp = u64;
