//! # Keel Events
//!
//! Publish/subscribe event bus for the Keel startup-operations platform.
//! Producers announce domain facts ("venture created", "agreement signed",
//! "payment failed") and consumers (the sync service, workflow engine, and
//! notification dispatcher) react to them without coupling to the producer.
//!
//! ## Overview
//!
//! - **Event envelope**: id, dot-namespaced type, payload, timestamp,
//!   source/origin, priority, metadata
//! - **Typed domain events**: `VentureEvent`, `AccountEvent`,
//!   `AgreementEvent`, `BillingEvent` with `to_event()` conversion
//! - **Local delivery**: exact-type subscriptions invoked synchronously in
//!   registration order; one failing handler never blocks the rest
//! - **History**: bounded in-memory ring of recent events
//! - **Distributed fan-out**: optional transport (in-process loopback, or
//!   Redis with the `redis` feature) with bounded retry; exhausted retries
//!   degrade to a local `system.error` event
//!
//! ## Delivery contract
//!
//! Delivery is at-least-once. Within one process, subscribers to a type see
//! events in publish order; no ordering holds across types or across
//! processes. Inbound distributed events whose `origin` matches the local
//! bus instance are dropped, so a process never re-consumes its own
//! publishes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keel_events::{Event, EventBus, EventHandler, HandlerError, PublishOptions};
//! use std::sync::Arc;
//!
//! struct AuditLog;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for AuditLog {
//!     async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
//!         tracing::info!(event_type = %event.event_type, "audited");
//!         Ok(())
//!     }
//! }
//!
//! async fn example() {
//!     let bus = EventBus::default();
//!     bus.subscribe("venture.created", Arc::new(AuditLog)).await;
//!
//!     bus.publish(
//!         "venture.created",
//!         serde_json::json!({"venture_id": "v-1", "name": "Acme"}),
//!         PublishOptions::default().source("ventures"),
//!     )
//!     .await;
//! }
//! ```

pub mod bus;
pub mod transport;
pub mod types;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use bus::{
    BusConfig, BusStats, EventBus, EventBusError, EventBusResult, EventHandler, HandlerError,
    HandlerFailure, RetryPolicy,
};
pub use transport::{EventTransport, LoopbackHub, LoopbackTransport, TransportError};
pub use types::{
    event_types, AccountEvent, AgreementEvent, BillingEvent, Event, EventPriority, PublishOptions,
    VentureEvent,
};

#[cfg(feature = "redis")]
pub use redis::{RedisTransport, RedisTransportConfig};
