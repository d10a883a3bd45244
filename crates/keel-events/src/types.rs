//! Event types for platform coordination
//!
//! This module defines the event envelope published on the bus and the
//! strongly-typed domain events emitted by Keel services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known event type strings.
///
/// Producers may publish arbitrary dot-namespaced types; these are the ones
/// the core itself emits or reacts to by default.
pub mod event_types {
    /// Emitted by the bus when a distributed publish exhausts its retries.
    pub const SYSTEM_ERROR: &str = "system.error";
    /// Emitted by the data sync service after an entity is propagated.
    pub const SYNC_UPDATED: &str = "sync.updated";
    /// Venture lifecycle.
    pub const VENTURE_CREATED: &str = "venture.created";
    pub const VENTURE_UPDATED: &str = "venture.updated";
    /// Account lifecycle.
    pub const USER_CREATED: &str = "user.created";
    pub const TEAM_MEMBER_ADDED: &str = "team.member_added";
    /// Agreement (e-signature) lifecycle.
    pub const AGREEMENT_SIGNED: &str = "agreement.signed";
    pub const AGREEMENT_COMPLETED: &str = "agreement.completed";
    /// Billing lifecycle.
    pub const SUBSCRIPTION_ACTIVATED: &str = "subscription.activated";
    pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
}

/// Delivery priority attached to an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Event envelope.
///
/// All events are wrapped in this envelope which provides metadata for
/// routing, tracing, and redelivery.
///
/// The `source` field is the logical producer ("billing", "ventures", …) and
/// is caller-supplied. The `origin` field is the instance id of the bus that
/// first published the event; it is assigned at publish time and used to
/// drop self-originated events arriving back over a distributed transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Dot-namespaced event type (e.g., "venture.created")
    pub event_type: String,

    /// Event payload
    pub payload: serde_json::Value,

    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,

    /// Logical producer of the event
    pub source: String,

    /// Instance id of the publishing bus
    pub origin: String,

    /// Delivery priority
    #[serde(default)]
    pub priority: EventPriority,

    /// Transport redelivery attempts; only ever increases
    #[serde(default)]
    pub retry_count: u32,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create a new event with defaults.
    ///
    /// `origin` is left empty; the bus fills it in at publish time.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
            source: String::new(),
            origin: String::new(),
            priority: EventPriority::Normal,
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Set the logical source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Top-level namespace of the event type.
    ///
    /// `venture.created` → `venture`. Distributed fan-out groups events into
    /// one channel per namespace.
    pub fn namespace(&self) -> &str {
        self.event_type
            .split('.')
            .next()
            .unwrap_or(&self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Options supplied to `EventBus::publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Logical producer name
    pub source: Option<String>,
    /// Delivery priority
    pub priority: EventPriority,
    /// Additional metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PublishOptions {
    /// Set the logical source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Venture Events
// ============================================================================

/// Venture lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VentureEvent {
    /// Venture was created
    Created {
        venture_id: Uuid,
        name: String,
        founder_id: Uuid,
    },
    /// Venture profile was updated
    Updated {
        venture_id: Uuid,
        changes: Vec<String>,
    },
    /// Venture advanced to a new stage
    StageAdvanced { venture_id: Uuid, stage: String },
    /// Venture was archived
    Archived { venture_id: Uuid },
}

impl VentureEvent {
    /// Convert to the generic envelope.
    pub fn to_event(&self) -> Event {
        let event_type = match self {
            VentureEvent::Created { .. } => event_types::VENTURE_CREATED,
            VentureEvent::Updated { .. } => event_types::VENTURE_UPDATED,
            VentureEvent::StageAdvanced { .. } => "venture.stage_advanced",
            VentureEvent::Archived { .. } => "venture.archived",
        };
        Event::new(event_type, serde_json::to_value(self).unwrap()).with_source("ventures")
    }
}

// ============================================================================
// Account Events
// ============================================================================

/// User and team membership events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEvent {
    /// User account was created
    UserCreated { user_id: Uuid, email: String },
    /// User profile was updated
    UserUpdated { user_id: Uuid, changes: Vec<String> },
    /// User was added to a venture team
    TeamMemberAdded {
        venture_id: Uuid,
        user_id: Uuid,
        role: String,
    },
    /// User was removed from a venture team
    TeamMemberRemoved { venture_id: Uuid, user_id: Uuid },
}

impl AccountEvent {
    /// Convert to the generic envelope.
    pub fn to_event(&self) -> Event {
        let event_type = match self {
            AccountEvent::UserCreated { .. } => event_types::USER_CREATED,
            AccountEvent::UserUpdated { .. } => "user.updated",
            AccountEvent::TeamMemberAdded { .. } => event_types::TEAM_MEMBER_ADDED,
            AccountEvent::TeamMemberRemoved { .. } => "team.member_removed",
        };
        Event::new(event_type, serde_json::to_value(self).unwrap()).with_source("accounts")
    }
}

// ============================================================================
// Agreement Events
// ============================================================================

/// Legal agreement (e-signature) events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgreementEvent {
    /// Agreement document was drafted
    Drafted {
        agreement_id: Uuid,
        venture_id: Uuid,
        template: String,
    },
    /// Signature was requested from a party
    SignatureRequested { agreement_id: Uuid, signer_id: Uuid },
    /// A party signed
    Signed { agreement_id: Uuid, signer_id: Uuid },
    /// A party declined to sign
    Declined {
        agreement_id: Uuid,
        signer_id: Uuid,
        reason: String,
    },
    /// All parties have signed
    Completed { agreement_id: Uuid },
}

impl AgreementEvent {
    /// Convert to the generic envelope.
    pub fn to_event(&self) -> Event {
        let event_type = match self {
            AgreementEvent::Drafted { .. } => "agreement.drafted",
            AgreementEvent::SignatureRequested { .. } => "agreement.signature_requested",
            AgreementEvent::Signed { .. } => event_types::AGREEMENT_SIGNED,
            AgreementEvent::Declined { .. } => "agreement.declined",
            AgreementEvent::Completed { .. } => event_types::AGREEMENT_COMPLETED,
        };
        Event::new(event_type, serde_json::to_value(self).unwrap()).with_source("agreements")
    }
}

// ============================================================================
// Billing Events
// ============================================================================

/// Subscription and invoice events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    /// Subscription became active
    SubscriptionActivated { venture_id: Uuid, plan: String },
    /// Subscription was canceled
    SubscriptionCanceled { venture_id: Uuid },
    /// Invoice payment succeeded
    PaymentSucceeded { invoice_id: Uuid, amount_cents: i64 },
    /// Invoice payment failed
    PaymentFailed { invoice_id: Uuid, error: String },
}

impl BillingEvent {
    /// Convert to the generic envelope.
    pub fn to_event(&self) -> Event {
        let event_type = match self {
            BillingEvent::SubscriptionActivated { .. } => event_types::SUBSCRIPTION_ACTIVATED,
            BillingEvent::SubscriptionCanceled { .. } => "subscription.canceled",
            BillingEvent::PaymentSucceeded { .. } => "invoice.payment_succeeded",
            BillingEvent::PaymentFailed { .. } => event_types::INVOICE_PAYMENT_FAILED,
        };
        Event::new(event_type, serde_json::to_value(self).unwrap())
            .with_source("billing")
            .with_priority(match self {
                BillingEvent::PaymentFailed { .. } => EventPriority::High,
                _ => EventPriority::Normal,
            })
    }
}
