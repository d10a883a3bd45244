//! Event bus implementation
//!
//! This module provides the in-process publish/subscribe bus. Subscribers are
//! registered per exact event type and invoked synchronously, in registration
//! order, before `publish` returns. A bounded history ring keeps recent
//! events for inspection. When a distributed transport is attached (see
//! [`crate::transport`]), published events are additionally forwarded to
//! other processes with bounded retry.

use crate::transport::EventTransport;
use crate::types::{event_types, Event, PublishOptions};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to reach the distributed transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failed to serialize an event for the transport
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The bus (or its transport listener) has been shut down
    #[error("Bus closed")]
    Closed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Error returned by an event handler.
///
/// Handler errors never propagate to the publisher; they are logged and
/// reported on the bus's failure stream.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Event handler trait for reacting to published events.
///
/// Delivery is at-least-once: an event may be re-delivered after a crash or
/// a transport redelivery, so implementations must tolerate seeing the same
/// `Event::id` twice.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a delivered event.
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handler name used in logs and failure reports.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Record of a subscriber failure, observable via
/// [`EventBus::handler_failures`].
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Event that was being delivered
    pub event_id: Uuid,
    /// Type of that event
    pub event_type: String,
    /// Name of the failing handler
    pub handler: String,
    /// Error message
    pub error: String,
    /// When the failure occurred
    pub occurred_at: DateTime<Utc>,
}

/// Retry policy for distributed publishes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of send attempts
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub growth: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            growth: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.growth.powi(attempt.saturating_sub(1).min(16) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Identifier of this bus instance, stamped as `origin` on every event
    /// it publishes. Used to drop self-originated events arriving back over
    /// the transport.
    pub instance_id: String,

    /// Capacity of the in-memory history ring.
    pub history_capacity: usize,

    /// Retry policy for transport sends.
    pub transport_retry: RetryPolicy,

    /// Capacity of the handler-failure broadcast channel.
    pub failure_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("keel-{}", Uuid::now_v7()),
            history_capacity: 512,
            transport_retry: RetryPolicy::default(),
            failure_capacity: 256,
        }
    }
}

/// Event bus statistics.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    /// Events published locally
    pub published: u64,
    /// Handler invocations
    pub delivered: u64,
    /// Inbound transport events dropped as self-originated
    pub dropped_self: u64,
    /// Distributed publishes that exhausted their retries
    pub transport_errors: u64,
    /// Registered (type, handler) pairs
    pub active_subscriptions: usize,
}

struct Inner {
    config: BusConfig,
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    history: RwLock<VecDeque<Event>>,
    transport: RwLock<Option<Arc<dyn EventTransport>>>,
    listener: RwLock<Option<JoinHandle<()>>>,
    failures: broadcast::Sender<HandlerFailure>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped_self: AtomicU64,
    transport_errors: AtomicU64,
}

/// In-process publish/subscribe event bus.
///
/// Cheap to clone; clones share the same registry, history, and transport.
///
/// # Example
///
/// ```rust,no_run
/// use keel_events::{EventBus, PublishOptions};
///
/// async fn example() {
///     let bus = EventBus::default();
///     let event = bus
///         .publish(
///             "venture.created",
///             serde_json::json!({"venture_id": "v-1"}),
///             PublishOptions::default().source("ventures"),
///         )
///         .await;
///     assert_eq!(event.event_type, "venture.created");
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("instance_id", &self.inner.config.instance_id)
            .field("history_capacity", &self.inner.config.history_capacity)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    /// Create a new event bus.
    pub fn new(config: BusConfig) -> Self {
        let (failures, _) = broadcast::channel(config.failure_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                transport: RwLock::new(None),
                listener: RwLock::new(None),
                failures,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped_self: AtomicU64::new(0),
                transport_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Identifier of this bus instance.
    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Publish an event.
    ///
    /// Always succeeds locally: the event is assigned an id, timestamp, and
    /// origin, appended to history, and delivered synchronously to every
    /// subscriber registered for its exact type, in registration order. A
    /// failing subscriber is logged and reported on the failure stream; it
    /// never blocks the others or the publisher.
    ///
    /// With a transport attached, the event is additionally forwarded to the
    /// channel for its top-level namespace on a background task with bounded
    /// retry; exhausting the retry budget emits a local `system.error` event
    /// instead of surfacing an error to the caller. `system.*` events are
    /// never forwarded.
    pub async fn publish(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        opts: PublishOptions,
    ) -> Event {
        let mut event = Event::new(event_type, payload)
            .with_source(opts.source.unwrap_or_else(|| "local".to_string()))
            .with_priority(opts.priority);
        event.metadata = opts.metadata;
        event.origin = self.inner.config.instance_id.clone();

        self.record(event.clone()).await;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.dispatch(&event).await;

        if !event.event_type.starts_with("system.") {
            let transport = self.inner.transport.read().await.clone();
            if let Some(transport) = transport {
                self.forward(event.clone(), transport);
            }
        }

        event
    }

    /// Register a handler for an exact event type.
    ///
    /// Registering the same handler (by `Arc` identity) twice for the same
    /// type is a no-op, so a handler is invoked at most once per delivery.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        let mut subscribers = self.inner.subscribers.write().await;
        let entry = subscribers.entry(event_type.clone()).or_default();
        if entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            tracing::debug!(event_type = %event_type, handler = handler.name(), "Handler already subscribed");
            return;
        }
        entry.push(handler);
    }

    /// Deregister a handler from an event type.
    ///
    /// Removal is by `Arc` identity; unknown handlers are ignored.
    pub async fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) {
        let mut subscribers = self.inner.subscribers.write().await;
        if let Some(entry) = subscribers.get_mut(event_type) {
            entry.retain(|h| !Arc::ptr_eq(h, handler));
            if entry.is_empty() {
                subscribers.remove(event_type);
            }
        }
    }

    /// Read recent events, newest first.
    ///
    /// `filter` restricts the result to an exact event type.
    pub async fn history(&self, filter: Option<&str>, limit: usize) -> Vec<Event> {
        let history = self.inner.history.read().await;
        history
            .iter()
            .rev()
            .filter(|e| filter.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Stream of subscriber failures.
    pub fn handler_failures(&self) -> broadcast::Receiver<HandlerFailure> {
        self.inner.failures.subscribe()
    }

    /// Get event bus statistics.
    pub async fn stats(&self) -> BusStats {
        let subscribers = self.inner.subscribers.read().await;
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped_self: self.inner.dropped_self.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            active_subscriptions: subscribers.values().map(Vec::len).sum(),
        }
    }

    /// Attach a distributed transport and start its inbound listener.
    ///
    /// Outbound events are forwarded on publish from now on. Inbound frames
    /// are decoded, dropped when their `origin` matches this instance, and
    /// otherwise delivered exactly like a local publish.
    pub async fn attach_transport(
        &self,
        transport: Arc<dyn EventTransport>,
    ) -> EventBusResult<()> {
        let mut rx = transport
            .subscribe()
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        *self.inner.transport.write().await = Some(transport);

        let bus = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let event: Event = match serde_json::from_str(&frame) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to decode inbound event frame");
                        continue;
                    }
                };

                if event.origin == bus.inner.config.instance_id {
                    bus.inner.dropped_self.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                tracing::debug!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    origin = %event.origin,
                    "Inbound distributed event"
                );

                bus.record(event.clone()).await;
                bus.dispatch(&event).await;
            }
            tracing::warn!("Transport inbound stream ended");
        });

        let mut listener = self.inner.listener.write().await;
        if let Some(previous) = listener.replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Stop the transport listener, if one is running.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.listener.write().await.take() {
            handle.abort();
        }
        *self.inner.transport.write().await = None;
    }

    /// Append an event to the bounded history ring.
    async fn record(&self, event: Event) {
        let mut history = self.inner.history.write().await;
        history.push_back(event);
        while history.len() > self.inner.config.history_capacity {
            history.pop_front();
        }
    }

    /// Deliver an event to all subscribers of its exact type, in
    /// registration order, swallowing and reporting individual failures.
    async fn dispatch(&self, event: &Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers
                .get(&event.event_type)
                .map(|v| v.to_vec())
                .unwrap_or_default()
        };

        for handler in handlers {
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = handler.handle(event).await {
                tracing::warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    handler = handler.name(),
                    error = %e,
                    "Event handler failed"
                );
                let _ = self.inner.failures.send(HandlerFailure {
                    event_id: event.id,
                    event_type: event.event_type.clone(),
                    handler: handler.name().to_string(),
                    error: e.to_string(),
                    occurred_at: Utc::now(),
                });
            }
        }
    }

    /// Forward an event to the transport with bounded retry.
    fn forward(&self, mut event: Event, transport: Arc<dyn EventTransport>) {
        let bus = self.clone();
        tokio::spawn(async move {
            let policy = bus.inner.config.transport_retry.clone();
            let mut attempt = 0;

            loop {
                attempt += 1;

                let frame = match serde_json::to_string(&event) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::error!(
                            event_id = %event.id,
                            error = %e,
                            "Failed to serialize event for transport"
                        );
                        return;
                    }
                };

                match transport.send(event.namespace(), frame).await {
                    Ok(()) => {
                        tracing::debug!(
                            event_type = %event.event_type,
                            event_id = %event.id,
                            "Event forwarded to transport"
                        );
                        return;
                    }
                    Err(e) if attempt >= policy.max_attempts => {
                        bus.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            event_type = %event.event_type,
                            event_id = %event.id,
                            attempts = attempt,
                            error = %e,
                            "Distributed publish failed, retries exhausted"
                        );

                        let mut error_event = Event::new(
                            event_types::SYSTEM_ERROR,
                            serde_json::json!({
                                "message": format!("distributed publish failed: {e}"),
                                "event_id": event.id,
                                "event_type": event.event_type,
                                "attempts": attempt,
                            }),
                        )
                        .with_source("bus");
                        error_event.origin = bus.inner.config.instance_id.clone();

                        bus.record(error_event.clone()).await;
                        bus.dispatch(&error_event).await;
                        return;
                    }
                    Err(e) => {
                        event.retry_count += 1;
                        let delay = policy.delay_for(attempt);
                        tracing::warn!(
                            event_type = %event.event_type,
                            event_id = %event.id,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transport send failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.event_type));
            Ok(())
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            Err("boom".into())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            bus.subscribe(
                "venture.created",
                Arc::new(Recorder {
                    label,
                    log: log.clone(),
                }),
            )
            .await;
        }

        bus.publish(
            "venture.created",
            serde_json::json!({}),
            PublishOptions::default(),
        )
        .await;

        // Delivery is synchronous: the log is complete once publish returns.
        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "first:venture.created",
                "second:venture.created",
                "third:venture.created"
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_delivers_once() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn EventHandler> = Arc::new(Recorder {
            label: "once",
            log: log.clone(),
        });

        bus.subscribe("user.created", handler.clone()).await;
        bus.subscribe("user.created", handler.clone()).await;

        bus.publish(
            "user.created",
            serde_json::json!({}),
            PublishOptions::default(),
        )
        .await;

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failures = bus.handler_failures();

        bus.subscribe("agreement.signed", Arc::new(Failing)).await;
        bus.subscribe(
            "agreement.signed",
            Arc::new(Recorder {
                label: "after",
                log: log.clone(),
            }),
        )
        .await;

        bus.publish(
            "agreement.signed",
            serde_json::json!({}),
            PublishOptions::default(),
        )
        .await;

        assert_eq!(log.lock().unwrap().len(), 1);

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.handler, "failing");
        assert_eq!(failure.event_type, "agreement.signed");
        assert_eq!(failure.error, "boom");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn EventHandler> = Arc::new(Recorder {
            label: "gone",
            log: log.clone(),
        });

        bus.subscribe("venture.updated", handler.clone()).await;
        bus.unsubscribe("venture.updated", &handler).await;

        bus.publish(
            "venture.updated",
            serde_json::json!({}),
            PublishOptions::default(),
        )
        .await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.stats().await.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_exact_type_match_only() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            "venture.*",
            Arc::new(Recorder {
                label: "wildcard",
                log: log.clone(),
            }),
        )
        .await;

        bus.publish(
            "venture.created",
            serde_json::json!({}),
            PublishOptions::default(),
        )
        .await;

        // No wildcard matching: "venture.*" is just another literal type.
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_bounded_newest_first() {
        let bus = EventBus::new(BusConfig {
            history_capacity: 3,
            ..BusConfig::default()
        });

        for i in 0..5 {
            bus.publish(
                "tick",
                serde_json::json!({ "n": i }),
                PublishOptions::default(),
            )
            .await;
        }

        let events = bus.history(None, 10).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload["n"], 4);
        assert_eq!(events[2].payload["n"], 2);
    }

    #[tokio::test]
    async fn test_history_filter_and_limit() {
        let bus = EventBus::default();
        bus.publish("a.one", serde_json::json!({}), PublishOptions::default())
            .await;
        bus.publish("b.two", serde_json::json!({}), PublishOptions::default())
            .await;
        bus.publish("a.one", serde_json::json!({}), PublishOptions::default())
            .await;

        let events = bus.history(Some("a.one"), 10).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == "a.one"));

        let limited = bus.history(None, 1).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_type, "a.one");
    }

    #[tokio::test]
    async fn test_publish_stamps_origin_and_source() {
        let bus = EventBus::default();
        let event = bus
            .publish(
                "invoice.payment_failed",
                serde_json::json!({}),
                PublishOptions::default().source("billing"),
            )
            .await;

        assert_eq!(event.source, "billing");
        assert_eq!(event.origin, bus.instance_id());
    }

    #[test]
    fn test_retry_policy_growth() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            growth: 2.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // Capped by max_delay.
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }
}
