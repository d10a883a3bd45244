//! Workflow templates
//!
//! Static configuration: a template names the event types that trigger it
//! and the ordered steps an execution walks through.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The closed set of step types the engine can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Enqueue a notification delivery
    Notification,
    /// Write a record through the store
    Record,
    /// Enqueue a payment operation
    Payment,
    /// Suspend this execution for a configured duration
    Delay,
    /// Branch to another step by a condition on execution state
    Conditional,
    /// Assert required paths resolve in execution state
    Validation,
    /// Enqueue a calendar operation
    Calendar,
}

impl StepKind {
    /// Kinds the engine handles itself rather than via a runner.
    pub fn is_control(&self) -> bool {
        matches!(self, StepKind::Delay | StepKind::Conditional)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Notification => "notification",
            StepKind::Record => "record",
            StepKind::Payment => "payment",
            StepKind::Delay => "delay",
            StepKind::Conditional => "conditional",
            StepKind::Validation => "validation",
            StepKind::Calendar => "calendar",
        }
    }
}

/// One step in a template.
///
/// `config` may reference execution state with `{{path.to.value}}`
/// placeholders; they are resolved when the step runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within the template
    pub id: String,

    /// Step type
    pub kind: StepKind,

    /// Step configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl StepDefinition {
    /// Create a step.
    pub fn new(id: impl Into<String>, kind: StepKind, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
        }
    }
}

/// A workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Template id
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Event types that start an execution
    pub triggers: Vec<String>,

    /// Ordered steps
    pub steps: Vec<StepDefinition>,
}

impl WorkflowTemplate {
    /// Create a template.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        triggers: impl IntoIterator<Item = impl Into<String>>,
        steps: impl IntoIterator<Item = StepDefinition>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            triggers: triggers.into_iter().map(Into::into).collect(),
            steps: steps.into_iter().collect(),
        }
    }

    /// Index of a step by id.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

/// The static set of templates known to an engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateRegistry {
    /// All configured templates
    pub templates: Vec<WorkflowTemplate>,
}

impl TemplateRegistry {
    /// Build a registry.
    pub fn new(templates: impl IntoIterator<Item = WorkflowTemplate>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
        }
    }

    /// Load from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Template by id.
    pub fn by_id(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Templates triggered by an event type.
    pub fn by_trigger(&self, event_type: &str) -> Vec<&WorkflowTemplate> {
        self.templates
            .iter()
            .filter(|t| t.triggers.iter().any(|trigger| trigger == event_type))
            .collect()
    }

    /// All distinct trigger event types.
    pub fn trigger_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .templates
            .iter()
            .flat_map(|t| t.triggers.iter().cloned())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// All step kinds used across the registry.
    pub fn used_kinds(&self) -> HashSet<StepKind> {
        self.templates
            .iter()
            .flat_map(|t| t.steps.iter().map(|s| s.kind))
            .collect()
    }
}
