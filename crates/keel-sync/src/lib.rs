//! # Keel Sync
//!
//! Event-driven data synchronization for the Keel platform. When a domain
//! event marks an entity changed, this service collapses the trigger into a
//! pending set, and a periodic sweep propagates the entity (selected
//! fields, dependent records, and a content version) to every configured
//! downstream target (real-time channels, analytics, external systems).
//!
//! ## Overview
//!
//! - **Rules**: static [`SyncRule`] records map trigger event types to an
//!   entity type, the fields worth propagating, and dependent entity types
//! - **Set collapsing**: re-triggering an entity before the sweep runs
//!   yields exactly one sync pass, not duplicate work
//! - **Content versions**: sha256 over the canonicalized selected fields,
//!   so identical content always hashes identically
//! - **Bounded retry**: failed items retry up to 3 times with linearly
//!   increasing delay, then are dropped with a logged error
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keel_events::EventBus;
//! use keel_store::MemoryStore;
//! use keel_sync::{DataSync, RealtimeTarget, SyncConfig, SyncRule, SyncRuleSet};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let bus = EventBus::default();
//!     let rules = SyncRuleSet::new([SyncRule::new(
//!         "venture",
//!         ["venture.created", "venture.updated"],
//!     )
//!     .sync_fields(["name", "stage"])
//!     .dependencies(["team_member"])]);
//!
//!     let sync = DataSync::new(rules, SyncConfig::default(), MemoryStore::shared());
//!     sync.add_target(Arc::new(RealtimeTarget::new(bus.clone()))).await;
//!     sync.attach(&bus).await;
//!     sync.start().await;
//! }
//! ```

pub mod rules;
pub mod service;

// Re-export main types
pub use rules::{SyncRule, SyncRuleSet};
pub use service::{
    DataSync, RealtimeTarget, SyncConfig, SyncError, SyncResult, SyncTarget, SyncUpdate,
};
