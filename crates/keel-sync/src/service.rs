//! Data sync service
//!
//! Bridges bus events to downstream propagation. Trigger events mark an
//! entity dirty in a per-entity-type pending set (re-triggering the same
//! entity before a sweep collapses into one entry), and a periodic sweep
//! drains the sets in batches: fetch the primary record and its dependents,
//! compute a content version, deliver to every configured target, record
//! the sync time. Failed items retry with linearly increasing delay up to a
//! cap, then are dropped with a logged error.

use crate::rules::{SyncRule, SyncRuleSet};
use chrono::{DateTime, Utc};
use keel_events::{event_types, Event, EventBus, EventHandler, HandlerError, PublishOptions};
use keel_store::{RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Data sync error types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Trigger payload carried no usable entity id
    #[error("Event {event_type} carries no entity id")]
    MissingEntityId { event_type: String },

    /// Record store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A downstream target rejected the update
    #[error("Target {target} failed: {message}")]
    Target { target: String, message: String },
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Data sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Sweep interval in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Maximum entities drained per entity type per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per entity before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds; grows linearly with the retry count
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    25
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// A propagated entity update handed to sync targets.
#[derive(Debug, Clone, Serialize)]
pub struct SyncUpdate {
    /// Entity type
    pub entity_type: String,
    /// Entity id
    pub entity_id: String,
    /// Content version: sha256 over the canonicalized selected fields
    pub version: String,
    /// The selected fields of the primary record
    pub record: serde_json::Value,
    /// Dependent records keyed by entity type
    pub dependencies: HashMap<String, Vec<serde_json::Value>>,
    /// When the sync ran
    pub synced_at: DateTime<Utc>,
}

/// Downstream system receiving entity updates.
#[async_trait::async_trait]
pub trait SyncTarget: Send + Sync {
    /// Target name used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one update.
    async fn deliver(&self, update: &SyncUpdate) -> SyncResult<()>;
}

/// Target republishing a `sync.updated` event on the bus for real-time
/// consumers (websocket gateways, dashboards).
pub struct RealtimeTarget {
    bus: EventBus,
}

impl RealtimeTarget {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait::async_trait]
impl SyncTarget for RealtimeTarget {
    fn name(&self) -> &str {
        "realtime"
    }

    async fn deliver(&self, update: &SyncUpdate) -> SyncResult<()> {
        self.bus
            .publish(
                event_types::SYNC_UPDATED,
                serde_json::json!({
                    "entity_type": update.entity_type,
                    "entity_id": update.entity_id,
                    "version": update.version,
                }),
                PublishOptions::default().source("sync"),
            )
            .await;
        Ok(())
    }
}

/// One dirty-entity marker in the pending set.
#[derive(Debug, Clone)]
struct PendingSync {
    entity_id: String,
    event_type: String,
    queued_at: DateTime<Utc>,
    retry_count: u32,
    not_before: DateTime<Utc>,
}

struct Inner {
    rules: SyncRuleSet,
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    targets: RwLock<Vec<Arc<dyn SyncTarget>>>,
    // entity_type → entity_id → marker
    pending: RwLock<HashMap<String, HashMap<String, PendingSync>>>,
    last_synced: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    sweeper: RwLock<Option<JoinHandle<()>>>,
}

/// Event-driven data synchronization service.
///
/// Cheap to clone; clones share the same pending sets and targets.
#[derive(Clone)]
pub struct DataSync {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSync")
            .field("rules", &self.inner.rules.rules.len())
            .finish()
    }
}

/// Bus handler marking entities dirty on trigger events.
struct SyncTriggerHandler {
    sync: DataSync,
}

#[async_trait::async_trait]
impl EventHandler for SyncTriggerHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.sync
            .mark_dirty(event)
            .await
            .map_err(|e| HandlerError(e.to_string()))
    }

    fn name(&self) -> &str {
        "data-sync"
    }
}

impl DataSync {
    /// Create the service.
    pub fn new(rules: SyncRuleSet, config: SyncConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                rules,
                config,
                store,
                targets: RwLock::new(Vec::new()),
                pending: RwLock::new(HashMap::new()),
                last_synced: RwLock::new(HashMap::new()),
                sweeper: RwLock::new(None),
            }),
        }
    }

    /// Add a downstream target. Call before `start`.
    pub async fn add_target(&self, target: Arc<dyn SyncTarget>) {
        self.inner.targets.write().await.push(target);
    }

    /// Subscribe the service to every trigger event type in its rule set.
    pub async fn attach(&self, bus: &EventBus) {
        let handler: Arc<dyn EventHandler> = Arc::new(SyncTriggerHandler { sync: self.clone() });
        for trigger in self.inner.rules.trigger_types() {
            bus.subscribe(trigger, handler.clone()).await;
        }
    }

    /// Start the periodic sweep loop. Idempotent.
    pub async fn start(&self) {
        let mut sweeper = self.inner.sweeper.write().await;
        if sweeper.is_some() {
            return;
        }

        let sync = self.clone();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                sync.inner.config.sweep_interval_ms.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sync.flush().await;
            }
        }));
    }

    /// Stop the sweep loop.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.sweeper.write().await.take() {
            handle.abort();
        }
    }

    /// Number of entities currently marked dirty.
    pub async fn pending_count(&self) -> usize {
        let pending = self.inner.pending.read().await;
        pending.values().map(HashMap::len).sum()
    }

    /// When an entity was last propagated, if ever.
    pub async fn last_synced(&self, entity_type: &str, entity_id: &str) -> Option<DateTime<Utc>> {
        let last = self.inner.last_synced.read().await;
        last.get(&(entity_type.to_string(), entity_id.to_string()))
            .copied()
    }

    /// Mark the entity referenced by a trigger event dirty.
    ///
    /// A second trigger for an entity already pending collapses into the
    /// existing marker; the sweep syncs the entity once either way.
    pub async fn mark_dirty(&self, event: &Event) -> SyncResult<()> {
        let Some(rule) = self.inner.rules.by_trigger(&event.event_type) else {
            return Ok(());
        };

        let entity_id = resolve_entity_id(rule, &event.payload).ok_or_else(|| {
            SyncError::MissingEntityId {
                event_type: event.event_type.clone(),
            }
        })?;

        let mut pending = self.inner.pending.write().await;
        let by_id = pending.entry(rule.entity_type.clone()).or_default();
        if by_id.contains_key(&entity_id) {
            tracing::debug!(
                entity_type = %rule.entity_type,
                entity_id = %entity_id,
                "Entity already pending, trigger collapsed"
            );
            return Ok(());
        }

        by_id.insert(
            entity_id.clone(),
            PendingSync {
                entity_id,
                event_type: event.event_type.clone(),
                queued_at: Utc::now(),
                retry_count: 0,
                not_before: Utc::now(),
            },
        );
        Ok(())
    }

    /// Drain every pending set once, in batches.
    ///
    /// Runs on the sweep interval; also callable directly to force a flush.
    pub async fn flush(&self) {
        let entity_types: Vec<String> = {
            let pending = self.inner.pending.read().await;
            pending.keys().cloned().collect()
        };

        for entity_type in entity_types {
            let batch = self.take_batch(&entity_type).await;
            for item in batch {
                self.sync_item(&entity_type, item).await;
            }
        }
    }

    /// Remove up to `batch_size` due markers for one entity type.
    async fn take_batch(&self, entity_type: &str) -> Vec<PendingSync> {
        let now = Utc::now();
        let mut pending = self.inner.pending.write().await;
        let Some(by_id) = pending.get_mut(entity_type) else {
            return Vec::new();
        };

        let due: Vec<String> = by_id
            .values()
            .filter(|item| item.not_before <= now)
            .take(self.inner.config.batch_size)
            .map(|item| item.entity_id.clone())
            .collect();

        due.iter().filter_map(|id| by_id.remove(id)).collect()
    }

    /// Sync one entity, handling retry bookkeeping on failure.
    async fn sync_item(&self, entity_type: &str, mut item: PendingSync) {
        let Some(rule) = self.inner.rules.by_entity_type(entity_type) else {
            return;
        };

        let outcome = self.propagate(rule, &item.entity_id).await;
        match outcome {
            Ok(Some(update)) => {
                tracing::debug!(
                    entity_type = %entity_type,
                    entity_id = %item.entity_id,
                    version = %update.version,
                    "Entity synced"
                );
            }
            Ok(None) => {
                // Entity vanished between trigger and sweep; not a transient
                // failure, so no retry.
                tracing::warn!(
                    entity_type = %entity_type,
                    entity_id = %item.entity_id,
                    event_type = %item.event_type,
                    "Entity missing at sync time, dropped"
                );
            }
            Err(e) => {
                item.retry_count += 1;
                if item.retry_count > self.inner.config.max_retries {
                    tracing::error!(
                        entity_type = %entity_type,
                        entity_id = %item.entity_id,
                        retries = item.retry_count - 1,
                        error = %e,
                        "Sync retries exhausted, entity dropped"
                    );
                    return;
                }

                let delay = Duration::from_millis(
                    self.inner.config.retry_delay_ms * item.retry_count as u64,
                );
                item.not_before = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                tracing::warn!(
                    entity_type = %entity_type,
                    entity_id = %item.entity_id,
                    retry = item.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Sync failed, will retry"
                );

                let mut pending = self.inner.pending.write().await;
                pending
                    .entry(entity_type.to_string())
                    .or_default()
                    .entry(item.entity_id.clone())
                    .or_insert(item);
            }
        }
    }

    /// Fetch, version, and deliver one entity. `Ok(None)` means the primary
    /// record no longer exists.
    async fn propagate(&self, rule: &SyncRule, entity_id: &str) -> SyncResult<Option<SyncUpdate>> {
        let Some(record) = self.inner.store.fetch(&rule.entity_type, entity_id).await? else {
            return Ok(None);
        };

        let selected = select_fields(&record, &rule.sync_fields);
        let version = content_version(&selected);

        let mut dependencies = HashMap::new();
        let reference_key = format!("{}_id", rule.entity_type);
        for dep_type in &rule.dependencies {
            let related: Vec<serde_json::Value> = self
                .inner
                .store
                .list(dep_type)
                .await?
                .into_iter()
                .filter(|r| r.get(&reference_key).and_then(|v| v.as_str()) == Some(entity_id))
                .collect();
            dependencies.insert(dep_type.clone(), related);
        }

        let update = SyncUpdate {
            entity_type: rule.entity_type.clone(),
            entity_id: entity_id.to_string(),
            version,
            record: selected,
            dependencies,
            synced_at: Utc::now(),
        };

        let targets = self.inner.targets.read().await.clone();
        for target in targets {
            target
                .deliver(&update)
                .await
                .map_err(|e| SyncError::Target {
                    target: target.name().to_string(),
                    message: e.to_string(),
                })?;
        }

        self.inner.last_synced.write().await.insert(
            (rule.entity_type.clone(), entity_id.to_string()),
            update.synced_at,
        );

        Ok(Some(update))
    }
}

/// Entity id from a trigger payload: the rule's id field, falling back to
/// a bare `id`.
fn resolve_entity_id(rule: &SyncRule, payload: &serde_json::Value) -> Option<String> {
    payload
        .get(rule.id_key())
        .or_else(|| payload.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Project the sync fields out of a record. Empty selection keeps the whole
/// record.
fn select_fields(record: &serde_json::Value, fields: &[String]) -> serde_json::Value {
    if fields.is_empty() {
        return record.clone();
    }

    let mut selected = serde_json::Map::new();
    for field in fields {
        if let Some(value) = record.get(field) {
            selected.insert(field.clone(), value.clone());
        }
    }
    serde_json::Value::Object(selected)
}

/// Content version: hex sha256 over the canonical (sorted-key) rendering.
fn content_version(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_string(value).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Deterministic JSON rendering with object keys sorted at every level.
fn canonical_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_string(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_string).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}
