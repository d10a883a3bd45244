//! Channel senders and the delivery job handler
//!
//! Each queued delivery is executed by [`DeliveryHandler`], which looks up
//! the [`ChannelSender`] for the delivery's channel. The in-app sender is
//! store-backed and ships with the crate; email, push, and SMS senders wrap
//! external providers and are injected by the consuming service.

use crate::types::{Channel, Delivery, NotifyError, NotifyResult};
use keel_queue::{Job, JobError, JobHandler};
use keel_store::RecordStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Sends deliveries on one channel.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel this sender covers.
    fn channel(&self) -> Channel;

    /// Send one delivery.
    async fn send(&self, delivery: &Delivery) -> NotifyResult<()>;
}

/// In-app sender persisting the notification as a record the UI reads back.
pub struct InAppSender {
    store: Arc<dyn RecordStore>,
}

impl InAppSender {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, delivery: &Delivery) -> NotifyResult<()> {
        let record = serde_json::json!({
            "recipient": delivery.recipient,
            "notification_type": delivery.notification_type,
            "title": delivery.title,
            "body": delivery.body,
            "event_id": delivery.event_id,
            "created_at": delivery.created_at,
            "read": false,
        });
        self.store
            .put("notification", &delivery.id.to_string(), record)
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))
    }
}

/// Job handler executing queued deliveries.
pub struct DeliveryHandler {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl Default for DeliveryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryHandler {
    /// Create a handler with no senders registered.
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// Register a sender for its channel.
    pub fn sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }
}

#[async_trait::async_trait]
impl JobHandler for DeliveryHandler {
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        let delivery: Delivery = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError(format!("malformed delivery payload: {e}")))?;

        let sender = self
            .senders
            .get(&delivery.channel)
            .ok_or_else(|| JobError(NotifyError::NoSender(delivery.channel.as_str().to_string()).to_string()))?;

        sender
            .send(&delivery)
            .await
            .map_err(|e| JobError(e.to_string()))?;

        tracing::debug!(
            delivery_id = %delivery.id,
            channel = delivery.channel.as_str(),
            recipient = %delivery.recipient,
            "Notification delivered"
        );
        Ok(())
    }
}
