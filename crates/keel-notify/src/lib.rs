//! # Keel Notify
//!
//! Event-driven notification fan-out for the Keel platform. Domain events
//! are routed through a static catalog to notification types; templates
//! render against the event payload, and one delivery per recipient per
//! channel is queued as a job, so a slow email provider or push gateway
//! never blocks event processing.
//!
//! ## Overview
//!
//! - **Catalog**: notification types (template, channels, urgency) plus an
//!   event-type routing table, serde-loadable
//! - **Rendering**: `{field}` placeholders over the event payload; a
//!   missing field skips the notification with an observable error rather
//!   than sending half-filled text
//! - **Fan-out via jobs**: the flush loop turns buffered deliveries into
//!   queue jobs; [`DeliveryHandler`] executes them against registered
//!   [`ChannelSender`]s (store-backed in-app included, external channels
//!   injected)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keel_events::EventBus;
//! use keel_queue::{JobQueue, QueueConfig};
//! use keel_store::MemoryStore;
//! use keel_notify::{
//!     DeliveryHandler, InAppSender, NotificationCatalog, NotificationDispatcher, NotifyConfig,
//! };
//! use std::sync::Arc;
//!
//! async fn example(catalog: NotificationCatalog) {
//!     let bus = EventBus::default();
//!     let queue = JobQueue::new([QueueConfig::new("notifications").concurrency(4)]);
//!     let store = MemoryStore::shared();
//!
//!     let handler = DeliveryHandler::new().sender(Arc::new(InAppSender::new(store)));
//!     queue.register_handler("notifications", Arc::new(handler)).await.unwrap();
//!     queue.start();
//!
//!     let dispatcher = NotificationDispatcher::new(catalog, NotifyConfig::default(), queue);
//!     dispatcher.attach(&bus).await;
//!     dispatcher.start().await;
//! }
//! ```

pub mod channels;
pub mod dispatcher;
pub mod types;

// Re-export main types
pub use channels::{ChannelSender, DeliveryHandler, InAppSender};
pub use dispatcher::{NotificationDispatcher, NotifyConfig};
pub use types::{
    render_template, Channel, Delivery, NotificationCatalog, NotificationPriority,
    NotificationTemplate, NotificationType, NotifyError, NotifyResult,
};
