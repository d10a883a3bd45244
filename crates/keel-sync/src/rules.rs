//! Sync rules
//!
//! Static configuration describing which entity types are propagated on
//! change: the fields that matter, the dependent entity types fetched
//! alongside, and the event types that trigger a sync.

use serde::{Deserialize, Serialize};

/// Sync rule for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRule {
    /// Entity type this rule covers (e.g., "venture")
    pub entity_type: String,

    /// Fields included in the propagated record and its content version.
    /// Empty means the whole record.
    #[serde(default)]
    pub sync_fields: Vec<String>,

    /// Dependent entity types fetched alongside the primary record
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Event types that trigger a sync of this entity
    pub triggers: Vec<String>,

    /// Payload field carrying the entity id; defaults to
    /// `{entity_type}_id`, falling back to `id`
    #[serde(default)]
    pub id_field: Option<String>,
}

impl SyncRule {
    /// Create a rule with defaults.
    pub fn new(
        entity_type: impl Into<String>,
        triggers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            sync_fields: Vec::new(),
            dependencies: Vec::new(),
            triggers: triggers.into_iter().map(Into::into).collect(),
            id_field: None,
        }
    }

    /// Restrict propagation to specific fields.
    pub fn sync_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sync_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Fetch dependent entity types alongside the primary record.
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Override the payload field carrying the entity id.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    /// The payload key the entity id is read from.
    pub fn id_key(&self) -> String {
        self.id_field
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.entity_type))
    }
}

/// The full static rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRuleSet {
    /// All configured rules
    pub rules: Vec<SyncRule>,
}

impl SyncRuleSet {
    /// Build a rule set.
    pub fn new(rules: impl IntoIterator<Item = SyncRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Load from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The rule triggered by an event type, if any.
    pub fn by_trigger(&self, event_type: &str) -> Option<&SyncRule> {
        self.rules
            .iter()
            .find(|rule| rule.triggers.iter().any(|t| t == event_type))
    }

    /// The rule for an entity type, if any.
    pub fn by_entity_type(&self, entity_type: &str) -> Option<&SyncRule> {
        self.rules.iter().find(|rule| rule.entity_type == entity_type)
    }

    /// All distinct trigger event types across the rule set.
    pub fn trigger_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .rules
            .iter()
            .flat_map(|rule| rule.triggers.iter().cloned())
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_defaults() {
        let rule = SyncRule::new("venture", ["venture.created", "venture.updated"]);
        assert_eq!(rule.id_key(), "venture_id");
        assert!(rule.sync_fields.is_empty());
    }

    #[test]
    fn test_rule_id_field_override() {
        let rule = SyncRule::new("user", ["user.created"]).id_field("account_id");
        assert_eq!(rule.id_key(), "account_id");
    }

    #[test]
    fn test_rule_set_lookup() {
        let rules = SyncRuleSet::new([
            SyncRule::new("venture", ["venture.created"]),
            SyncRule::new("user", ["user.created", "user.updated"]),
        ]);

        assert_eq!(
            rules.by_trigger("user.updated").unwrap().entity_type,
            "user"
        );
        assert!(rules.by_trigger("agreement.signed").is_none());
        assert!(rules.by_entity_type("venture").is_some());
        assert_eq!(rules.trigger_types().len(), 3);
    }

    #[test]
    fn test_rule_set_from_json() {
        let json = r#"{
            "rules": [
                {
                    "entity_type": "venture",
                    "sync_fields": ["name", "stage"],
                    "dependencies": ["team_member"],
                    "triggers": ["venture.created", "venture.updated"]
                }
            ]
        }"#;

        let rules = SyncRuleSet::from_json(json).unwrap();
        let rule = rules.by_trigger("venture.created").unwrap();
        assert_eq!(rule.sync_fields, vec!["name", "stage"]);
        assert_eq!(rule.dependencies, vec!["team_member"]);
        assert!(rule.id_field.is_none());
    }
}
