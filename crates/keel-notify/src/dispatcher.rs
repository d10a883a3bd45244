//! Notification dispatcher
//!
//! Routes bus events through the catalog: render the template against the
//! event payload, resolve recipients, and buffer one delivery per recipient
//! per channel. A flush loop drains the buffer into jobs on the
//! notifications queue, so a slow delivery channel can never block event
//! processing.

use crate::types::{render_template, Delivery, NotificationCatalog, NotifyError, NotifyResult};
use chrono::Utc;
use keel_events::{Event, EventBus, EventHandler, HandlerError};
use keel_queue::{JobOptions, JobQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Queue deliveries are submitted to
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum deliveries queued per flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_queue_name() -> String {
    "notifications".to_string()
}

fn default_flush_interval_ms() -> u64 {
    200
}

fn default_batch_size() -> usize {
    50
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

struct Inner {
    catalog: NotificationCatalog,
    config: NotifyConfig,
    queue: JobQueue,
    pending: Mutex<Vec<Delivery>>,
    flusher: RwLock<Option<JoinHandle<()>>>,
}

/// Event-driven notification dispatcher.
///
/// Cheap to clone; clones share the same buffer and flusher.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("types", &self.inner.catalog.types.len())
            .finish()
    }
}

/// Bus handler routing events into deliveries.
struct NotificationRouteHandler {
    dispatcher: NotificationDispatcher,
}

#[async_trait::async_trait]
impl EventHandler for NotificationRouteHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.dispatcher
            .on_event(event)
            .await
            .map_err(|e| HandlerError(e.to_string()))
    }

    fn name(&self) -> &str {
        "notification-dispatcher"
    }
}

impl NotificationDispatcher {
    /// Create the dispatcher.
    pub fn new(catalog: NotificationCatalog, config: NotifyConfig, queue: JobQueue) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                config,
                queue,
                pending: Mutex::new(Vec::new()),
                flusher: RwLock::new(None),
            }),
        }
    }

    /// Subscribe the dispatcher to every routed event type.
    pub async fn attach(&self, bus: &EventBus) {
        let handler: Arc<dyn EventHandler> = Arc::new(NotificationRouteHandler {
            dispatcher: self.clone(),
        });
        for event_type in self.inner.catalog.event_types() {
            bus.subscribe(event_type, handler.clone()).await;
        }
    }

    /// Start the flush loop. Idempotent.
    pub async fn start(&self) {
        let mut flusher = self.inner.flusher.write().await;
        if flusher.is_some() {
            return;
        }

        let dispatcher = self.clone();
        *flusher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                dispatcher.inner.config.flush_interval_ms.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                dispatcher.flush().await;
            }
        }));
    }

    /// Stop the flush loop.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.flusher.write().await.take() {
            handle.abort();
        }
    }

    /// Deliveries buffered and not yet queued.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Render an event into buffered deliveries.
    pub async fn on_event(&self, event: &Event) -> NotifyResult<()> {
        let type_ids = self.inner.catalog.for_event(&event.event_type);
        if type_ids.is_empty() {
            return Ok(());
        }

        let recipients = resolve_recipients(&event.payload)?;
        let mut rendered = Vec::new();

        for type_id in type_ids {
            let Some(ntype) = self.inner.catalog.by_id(type_id) else {
                tracing::warn!(
                    notification_type = %type_id,
                    event_type = %event.event_type,
                    "Route names a notification type missing from the catalog"
                );
                continue;
            };

            let title = render_template(&ntype.template.title, &event.payload)?;
            let body = render_template(&ntype.template.body, &event.payload)?;

            for recipient in &recipients {
                for channel in &ntype.channels {
                    rendered.push(Delivery {
                        id: Uuid::now_v7(),
                        notification_type: ntype.id.clone(),
                        channel: *channel,
                        recipient: recipient.clone(),
                        title: title.clone(),
                        body: body.clone(),
                        event_id: event.id,
                        created_at: Utc::now(),
                    });
                }
            }
        }

        tracing::debug!(
            event_type = %event.event_type,
            deliveries = rendered.len(),
            "Event routed to deliveries"
        );
        self.inner.pending.lock().await.extend(rendered);
        Ok(())
    }

    /// Queue up to one batch of buffered deliveries.
    ///
    /// Runs on the flush interval; also callable directly to force a flush.
    pub async fn flush(&self) {
        let batch: Vec<Delivery> = {
            let mut pending = self.inner.pending.lock().await;
            let take = pending.len().min(self.inner.config.batch_size);
            pending.drain(..take).collect()
        };

        for delivery in batch {
            let priority = self
                .inner
                .catalog
                .by_id(&delivery.notification_type)
                .map(|t| t.priority.job_priority())
                .unwrap_or(0);

            let payload = match serde_json::to_value(&delivery) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(delivery_id = %delivery.id, error = %e, "Failed to encode delivery");
                    continue;
                }
            };

            if let Err(e) = self
                .inner
                .queue
                .add_job(
                    &self.inner.config.queue_name,
                    payload,
                    JobOptions::default().priority(priority),
                )
                .await
            {
                tracing::error!(
                    delivery_id = %delivery.id,
                    queue = %self.inner.config.queue_name,
                    error = %e,
                    "Failed to queue delivery"
                );
            }
        }
    }
}

/// Recipients from an event payload: an explicit `recipients` array, or the
/// single `user_id` the event concerns.
fn resolve_recipients(payload: &serde_json::Value) -> NotifyResult<Vec<String>> {
    if let Some(entries) = payload.get("recipients").and_then(|v| v.as_array()) {
        let recipients: Vec<String> = entries
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect();
        if !recipients.is_empty() {
            return Ok(recipients);
        }
    }

    if let Some(user_id) = payload.get("user_id").and_then(|v| v.as_str()) {
        return Ok(vec![user_id.to_string()]);
    }

    Err(NotifyError::NoRecipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, NotificationPriority, NotificationTemplate, NotificationType};
    use keel_queue::QueueConfig;

    fn catalog() -> NotificationCatalog {
        NotificationCatalog::new([NotificationType {
            id: "welcome".to_string(),
            category: "onboarding".to_string(),
            priority: NotificationPriority::High,
            channels: vec![Channel::InApp, Channel::Email],
            template: NotificationTemplate {
                title: "Welcome to Keel".to_string(),
                body: "Hi {name}!".to_string(),
            },
        }])
        .route("user.created", "welcome")
    }

    fn dispatcher() -> (NotificationDispatcher, JobQueue) {
        let queue = JobQueue::new([QueueConfig::new("notifications")]);
        let dispatcher =
            NotificationDispatcher::new(catalog(), NotifyConfig::default(), queue.clone());
        (dispatcher, queue)
    }

    fn user_created(payload: serde_json::Value) -> Event {
        Event::new("user.created", payload)
    }

    #[tokio::test]
    async fn test_event_fans_out_per_recipient_per_channel() {
        let (dispatcher, _queue) = dispatcher();

        dispatcher
            .on_event(&user_created(serde_json::json!({
                "recipients": ["u-1", "u-2"],
                "name": "Dana"
            })))
            .await
            .unwrap();

        // 2 recipients × 2 channels.
        assert_eq!(dispatcher.pending_count().await, 4);
    }

    #[tokio::test]
    async fn test_single_user_fallback_and_rendering() {
        let (dispatcher, queue) = dispatcher();

        dispatcher
            .on_event(&user_created(
                serde_json::json!({"user_id": "u-9", "name": "Lee"}),
            ))
            .await
            .unwrap();
        dispatcher.flush().await;
        assert_eq!(dispatcher.pending_count().await, 0);

        // One waiting job per channel for the single recipient.
        let stats = queue.queue_stats("notifications").await.unwrap();
        assert_eq!(stats.waiting, 2);
    }

    #[tokio::test]
    async fn test_unrouted_event_ignored() {
        let (dispatcher, _queue) = dispatcher();
        dispatcher
            .on_event(&Event::new("venture.created", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_error() {
        let (dispatcher, _queue) = dispatcher();
        let err = dispatcher
            .on_event(&user_created(serde_json::json!({"name": "Dana"})))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::NoRecipients));
    }

    #[tokio::test]
    async fn test_missing_template_field_is_error() {
        let (dispatcher, _queue) = dispatcher();
        let err = dispatcher
            .on_event(&user_created(serde_json::json!({"user_id": "u-1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingField { .. }));
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_flush_respects_batch_size() {
        let queue = JobQueue::new([QueueConfig::new("notifications")]);
        let dispatcher = NotificationDispatcher::new(
            catalog(),
            NotifyConfig {
                batch_size: 3,
                ..NotifyConfig::default()
            },
            queue.clone(),
        );

        dispatcher
            .on_event(&user_created(serde_json::json!({
                "recipients": ["u-1", "u-2", "u-3"],
                "name": "Dana"
            })))
            .await
            .unwrap();
        assert_eq!(dispatcher.pending_count().await, 6);

        dispatcher.flush().await;
        assert_eq!(dispatcher.pending_count().await, 3);
        assert_eq!(queue.queue_stats("notifications").await.unwrap().waiting, 3);
    }
}
