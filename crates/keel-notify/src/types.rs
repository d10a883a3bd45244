//! Notification catalog types
//!
//! Static configuration: notification types (template + channels +
//! priority) and the routing table from event types to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Notification error types.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Routed to a notification type missing from the catalog
    #[error("Unknown notification type: {0}")]
    UnknownType(String),

    /// A template placeholder did not resolve in the event payload
    #[error("Template field not found: {field}")]
    MissingField { field: String },

    /// The event payload named no recipients
    #[error("No recipients in event payload")]
    NoRecipients,

    /// No sender registered for a delivery's channel
    #[error("No sender registered for channel {0}")]
    NoSender(String),

    /// A channel sender failed
    #[error("Channel send failed: {0}")]
    Send(String),
}

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
    Push,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Sms => "sms",
        }
    }
}

/// Notification urgency, mapped onto job priority when deliveries are
/// queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    /// Job priority for deliveries of this urgency.
    pub fn job_priority(&self) -> i64 {
        match self {
            NotificationPriority::Low => -10,
            NotificationPriority::Normal => 0,
            NotificationPriority::High => 10,
            NotificationPriority::Urgent => 20,
        }
    }
}

/// Message template with `{field}` placeholders over the event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    /// Title template
    pub title: String,
    /// Body template
    pub body: String,
}

/// One notification type in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationType {
    /// Type id (e.g., "welcome")
    pub id: String,

    /// Grouping category (e.g., "onboarding", "billing")
    pub category: String,

    /// Urgency
    #[serde(default)]
    pub priority: NotificationPriority,

    /// Channels every recipient is notified on
    pub channels: Vec<Channel>,

    /// Message template
    pub template: NotificationTemplate,
}

/// The static notification catalog: types plus the event routing table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationCatalog {
    /// All notification types
    pub types: Vec<NotificationType>,

    /// event type → notification type ids
    #[serde(default)]
    pub routes: HashMap<String, Vec<String>>,
}

impl NotificationCatalog {
    /// Build a catalog from its types.
    pub fn new(types: impl IntoIterator<Item = NotificationType>) -> Self {
        Self {
            types: types.into_iter().collect(),
            routes: HashMap::new(),
        }
    }

    /// Load from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Route an event type to a notification type.
    pub fn route(mut self, event_type: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.routes
            .entry(event_type.into())
            .or_default()
            .push(type_id.into());
        self
    }

    /// Notification type by id.
    pub fn by_id(&self, id: &str) -> Option<&NotificationType> {
        self.types.iter().find(|t| t.id == id)
    }

    /// Notification type ids routed from an event type.
    pub fn for_event(&self, event_type: &str) -> &[String] {
        self.routes
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All routed event types.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.routes.keys().cloned().collect();
        types.sort();
        types
    }
}

/// One rendered per-recipient, per-channel delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Delivery id
    pub id: Uuid,
    /// Notification type id
    pub notification_type: String,
    /// Channel to send on
    pub channel: Channel,
    /// Recipient identifier (user id)
    pub recipient: String,
    /// Rendered title
    pub title: String,
    /// Rendered body
    pub body: String,
    /// Id of the event that produced this delivery
    pub event_id: Uuid,
    /// When the delivery was rendered
    pub created_at: DateTime<Utc>,
}

/// Render a template string against an event payload.
///
/// `{field}` placeholders resolve by dotted path. A missing field is an
/// error rather than silently rendered text, so a mis-matched template
/// surfaces in the failure stream instead of reaching users half-filled.
pub fn render_template(template: &str, payload: &serde_json::Value) -> NotifyResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let field = after[..end].trim();
        let value = lookup(payload, field).ok_or_else(|| NotifyError::MissingField {
            field: field.to_string(),
        })?;
        match value {
            serde_json::Value::String(s) => output.push_str(s),
            other => output.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

fn lookup<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn welcome() -> NotificationType {
        NotificationType {
            id: "welcome".to_string(),
            category: "onboarding".to_string(),
            priority: NotificationPriority::Normal,
            channels: vec![Channel::InApp, Channel::Email],
            template: NotificationTemplate {
                title: "Welcome to Keel".to_string(),
                body: "Hi {name}, your venture {venture.name} is ready.".to_string(),
            },
        }
    }

    #[test]
    fn test_catalog_routing() {
        let catalog = NotificationCatalog::new([welcome()]).route("user.created", "welcome");

        assert_eq!(catalog.for_event("user.created"), ["welcome"]);
        assert!(catalog.for_event("user.deleted").is_empty());
        assert!(catalog.by_id("welcome").is_some());
        assert_eq!(catalog.event_types(), vec!["user.created"]);
    }

    #[test]
    fn test_render_template() {
        let payload = serde_json::json!({
            "name": "Dana",
            "venture": {"name": "Acme"},
            "seats": 5
        });

        let rendered =
            render_template("Hi {name}, {venture.name} has {seats} seats", &payload).unwrap();
        assert_eq!(rendered, "Hi Dana, Acme has 5 seats");
    }

    #[test]
    fn test_render_missing_field_is_error() {
        let payload = serde_json::json!({"name": "Dana"});
        let err = render_template("Hi {name}, welcome to {venture.name}", &payload).unwrap_err();
        assert!(matches!(err, NotifyError::MissingField { field } if field == "venture.name"));
    }

    #[test]
    fn test_priority_mapping() {
        assert!(NotificationPriority::Urgent.job_priority() > NotificationPriority::High.job_priority());
        assert!(NotificationPriority::High.job_priority() > NotificationPriority::Normal.job_priority());
        assert!(NotificationPriority::Normal.job_priority() > NotificationPriority::Low.job_priority());
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"{
            "types": [
                {
                    "id": "payment_failed",
                    "category": "billing",
                    "priority": "urgent",
                    "channels": ["email", "sms"],
                    "template": {
                        "title": "Payment failed",
                        "body": "Invoice {invoice_id} could not be charged."
                    }
                }
            ],
            "routes": {"invoice.payment_failed": ["payment_failed"]}
        }"#;

        let catalog = NotificationCatalog::from_json(json).unwrap();
        let ntype = catalog.by_id("payment_failed").unwrap();
        assert_eq!(ntype.priority, NotificationPriority::Urgent);
        assert_eq!(ntype.channels, vec![Channel::Email, Channel::Sms]);
        assert_eq!(catalog.for_event("invoice.payment_failed"), ["payment_failed"]);
    }
}
