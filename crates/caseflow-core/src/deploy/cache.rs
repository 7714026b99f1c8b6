// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The deployment cache: bounded in-memory maps of deployed definitions.
//!
//! One LRU-bounded map per definition kind for entries, one per kind for
//! parsed model documents. Reads are lock-free map lookups; the expensive
//! cold path (re-running the deployer chain) is serialized per definition id
//! so concurrent resolves of the same cold id trigger at most one
//! deployment run. Entries are `Arc`s, so an eviction never invalidates a
//! resolution already holding its copy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use caseflow_model::ModelDocument;

use crate::config::EngineConfig;
use crate::definitions::{CachedDefinition, CaseDefinition, DefinitionEntry, DefinitionKind};
use crate::error::{EngineError, Result};
use crate::store::{DefinitionRecord, DeploymentRecord, EngineStore};

use super::Deployer;

// ============================================================================
// Bounded LRU map
// ============================================================================

struct BoundedMap<T> {
    entries: DashMap<String, Arc<T>>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl<T> BoundedMap<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn get(&self, id: &str) -> Option<Arc<T>> {
        let value = self.entries.get(id).map(|entry| entry.value().clone())?;
        self.touch(id);
        Some(value)
    }

    fn insert(&self, id: String, value: Arc<T>) {
        self.entries.insert(id.clone(), value);
        self.touch(&id);
        self.evict_excess();
    }

    fn remove(&self, id: &str) {
        self.entries.remove(id);
        let mut order = self.order.lock().expect("lru order poisoned");
        order.retain(|key| key != id);
    }

    fn clear(&self) {
        self.entries.clear();
        let mut order = self.order.lock().expect("lru order poisoned");
        order.clear();
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn touch(&self, id: &str) {
        let mut order = self.order.lock().expect("lru order poisoned");
        order.retain(|key| key != id);
        order.push_back(id.to_string());
    }

    fn evict_excess(&self) {
        if self.capacity == 0 {
            return;
        }
        let mut order = self.order.lock().expect("lru order poisoned");
        while order.len() > self.capacity {
            if let Some(victim) = order.pop_front() {
                self.entries.remove(&victim);
                debug!(definition_id = %victim, "evicted least recently used cache entry");
            }
        }
    }
}

// ============================================================================
// Deployment cache
// ============================================================================

/// Shared cache of deployed definitions and their model documents.
pub struct DeploymentCache {
    store: Arc<dyn EngineStore>,
    deployers: Vec<Arc<dyn Deployer>>,
    case_definitions: BoundedMap<CaseDefinition>,
    process_definitions: BoundedMap<DefinitionEntry>,
    decision_definitions: BoundedMap<DefinitionEntry>,
    case_models: BoundedMap<ModelDocument>,
    process_models: BoundedMap<ModelDocument>,
    decision_models: BoundedMap<ModelDocument>,
    resolve_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl DeploymentCache {
    /// Create a cache with the built-in deployer chain.
    pub fn new(store: Arc<dyn EngineStore>, config: &EngineConfig) -> Self {
        Self::with_deployers(store, config, super::default_deployers())
    }

    /// Create a cache with a custom deployer chain.
    pub fn with_deployers(
        store: Arc<dyn EngineStore>,
        config: &EngineConfig,
        deployers: Vec<Arc<dyn Deployer>>,
    ) -> Self {
        Self {
            store,
            deployers,
            case_definitions: BoundedMap::new(config.definition_cache_capacity),
            process_definitions: BoundedMap::new(config.definition_cache_capacity),
            decision_definitions: BoundedMap::new(config.definition_cache_capacity),
            case_models: BoundedMap::new(config.model_cache_capacity),
            process_models: BoundedMap::new(config.model_cache_capacity),
            decision_models: BoundedMap::new(config.model_cache_capacity),
            resolve_locks: DashMap::new(),
        }
    }

    /// The durable store backing this cache.
    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    /// Run the deployer chain for a deployment.
    pub async fn deploy(&self, deployment: &DeploymentRecord) -> Result<()> {
        for deployer in &self.deployers {
            debug!(
                deployer = deployer.name(),
                deployment_id = %deployment.id,
                "running deployer"
            );
            deployer.deploy(self, deployment).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Case definitions
    // ------------------------------------------------------------------

    /// Find and resolve a deployed case definition by id.
    pub async fn find_case_definition_by_id(
        &self,
        definition_id: &str,
    ) -> Result<Arc<CaseDefinition>> {
        let record = self
            .find_record(DefinitionKind::Case, definition_id)
            .await?;
        self.resolve_case_definition(&record).await
    }

    /// Find and resolve the latest case definition for a key.
    pub async fn find_latest_case_definition_by_key(
        &self,
        key: &str,
    ) -> Result<Arc<CaseDefinition>> {
        let record = self
            .store
            .find_latest_definition_by_key(DefinitionKind::Case, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(DefinitionKind::Case, format!("key '{key}'"))
            })?;
        self.resolve_case_definition(&record).await
    }

    /// Find and resolve a case definition by key and version.
    pub async fn find_case_definition_by_key_and_version(
        &self,
        key: &str,
        version: i32,
    ) -> Result<Arc<CaseDefinition>> {
        let record = self
            .store
            .find_definition_by_key_and_version(DefinitionKind::Case, key, version)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Case,
                    format!("key '{key}' version {version}"),
                )
            })?;
        self.resolve_case_definition(&record).await
    }

    /// Find and resolve a case definition by deployment and key.
    pub async fn find_case_definition_by_deployment_and_key(
        &self,
        deployment_id: &str,
        key: &str,
    ) -> Result<Arc<CaseDefinition>> {
        let record = self
            .store
            .find_definition_by_deployment_and_key(DefinitionKind::Case, deployment_id, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Case,
                    format!("deployment '{deployment_id}' key '{key}'"),
                )
            })?;
        self.resolve_case_definition(&record).await
    }

    /// Resolve a case definition record against the cache.
    pub async fn resolve_case_definition(
        &self,
        record: &DefinitionRecord,
    ) -> Result<Arc<CaseDefinition>> {
        self.resolve_in(DefinitionKind::Case, &self.case_definitions, record)
            .await
    }

    // ------------------------------------------------------------------
    // Process definitions
    // ------------------------------------------------------------------

    /// Find and resolve a deployed process definition by id.
    pub async fn find_process_definition_by_id(
        &self,
        definition_id: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .find_record(DefinitionKind::Process, definition_id)
            .await?;
        self.resolve_process_definition(&record).await
    }

    /// Find and resolve the latest process definition for a key.
    pub async fn find_latest_process_definition_by_key(
        &self,
        key: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_latest_definition_by_key(DefinitionKind::Process, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Process,
                    format!("key '{key}'"),
                )
            })?;
        self.resolve_process_definition(&record).await
    }

    /// Find and resolve a process definition by key and version.
    pub async fn find_process_definition_by_key_and_version(
        &self,
        key: &str,
        version: i32,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_definition_by_key_and_version(DefinitionKind::Process, key, version)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Process,
                    format!("key '{key}' version {version}"),
                )
            })?;
        self.resolve_process_definition(&record).await
    }

    /// Find and resolve a process definition by deployment and key.
    pub async fn find_process_definition_by_deployment_and_key(
        &self,
        deployment_id: &str,
        key: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_definition_by_deployment_and_key(DefinitionKind::Process, deployment_id, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Process,
                    format!("deployment '{deployment_id}' key '{key}'"),
                )
            })?;
        self.resolve_process_definition(&record).await
    }

    /// Resolve a process definition record against the cache.
    pub async fn resolve_process_definition(
        &self,
        record: &DefinitionRecord,
    ) -> Result<Arc<DefinitionEntry>> {
        self.resolve_in(DefinitionKind::Process, &self.process_definitions, record)
            .await
    }

    // ------------------------------------------------------------------
    // Decision definitions
    // ------------------------------------------------------------------

    /// Find and resolve a deployed decision definition by id.
    pub async fn find_decision_definition_by_id(
        &self,
        definition_id: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .find_record(DefinitionKind::Decision, definition_id)
            .await?;
        self.resolve_decision_definition(&record).await
    }

    /// Find and resolve the latest decision definition for a key.
    pub async fn find_latest_decision_definition_by_key(
        &self,
        key: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_latest_definition_by_key(DefinitionKind::Decision, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Decision,
                    format!("key '{key}'"),
                )
            })?;
        self.resolve_decision_definition(&record).await
    }

    /// Find and resolve a decision definition by key and version.
    pub async fn find_decision_definition_by_key_and_version(
        &self,
        key: &str,
        version: i32,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_definition_by_key_and_version(DefinitionKind::Decision, key, version)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Decision,
                    format!("key '{key}' version {version}"),
                )
            })?;
        self.resolve_decision_definition(&record).await
    }

    /// Find and resolve a decision definition by deployment and key.
    pub async fn find_decision_definition_by_deployment_and_key(
        &self,
        deployment_id: &str,
        key: &str,
    ) -> Result<Arc<DefinitionEntry>> {
        let record = self
            .store
            .find_definition_by_deployment_and_key(DefinitionKind::Decision, deployment_id, key)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(
                    DefinitionKind::Decision,
                    format!("deployment '{deployment_id}' key '{key}'"),
                )
            })?;
        self.resolve_decision_definition(&record).await
    }

    /// Resolve a decision definition record against the cache.
    pub async fn resolve_decision_definition(
        &self,
        record: &DefinitionRecord,
    ) -> Result<Arc<DefinitionEntry>> {
        self.resolve_in(DefinitionKind::Decision, &self.decision_definitions, record)
            .await
    }

    // ------------------------------------------------------------------
    // Model documents
    // ------------------------------------------------------------------

    /// Return the parsed model document of a definition, loading and
    /// parsing it from deployment storage when absent.
    pub async fn find_model_document(
        &self,
        kind: DefinitionKind,
        definition_id: &str,
    ) -> Result<Arc<ModelDocument>> {
        let models = self.models_of(kind);
        if let Some(document) = models.get(definition_id) {
            return Ok(document);
        }

        // resolving may repopulate the document as a deployer side effect
        let record = self.find_record(kind, definition_id).await?;
        match kind {
            DefinitionKind::Case => {
                self.resolve_case_definition(&record).await?;
            }
            DefinitionKind::Process => {
                self.resolve_process_definition(&record).await?;
            }
            DefinitionKind::Decision => {
                self.resolve_decision_definition(&record).await?;
            }
        }
        if let Some(document) = models.get(definition_id) {
            return Ok(document);
        }

        // entry was warm but the document was evicted: load and parse
        let bytes = self
            .store
            .get_resource(&record.deployment_id, &record.resource_name)
            .await?
            .ok_or_else(|| EngineError::Resource {
                deployment_id: record.deployment_id.clone(),
                resource_name: record.resource_name.clone(),
            })?;
        let parse_error = |err: caseflow_model::ModelError| EngineError::ModelParse {
            definition_id: definition_id.to_string(),
            details: err.to_string(),
        };
        let document = Arc::new(match kind {
            DefinitionKind::Case => {
                ModelDocument::Case(caseflow_model::parse_case_model(&bytes).map_err(parse_error)?)
            }
            DefinitionKind::Process => ModelDocument::Process(
                caseflow_model::parse_process_model(&bytes).map_err(parse_error)?,
            ),
            DefinitionKind::Decision => ModelDocument::Decision(
                caseflow_model::parse_decision_model(&bytes).map_err(parse_error)?,
            ),
        });
        models.insert(definition_id.to_string(), document.clone());
        Ok(document)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert a compiled case definition (deployer pipeline use).
    pub fn add_case_definition(&self, definition: Arc<CaseDefinition>) {
        self.case_definitions
            .insert(definition.id().to_string(), definition);
    }

    /// Insert a process definition entry (deployer pipeline use).
    pub fn add_process_definition(&self, entry: Arc<DefinitionEntry>) {
        self.process_definitions.insert(entry.id.clone(), entry);
    }

    /// Insert a decision definition entry (deployer pipeline use).
    pub fn add_decision_definition(&self, entry: Arc<DefinitionEntry>) {
        self.decision_definitions.insert(entry.id.clone(), entry);
    }

    /// Insert a parsed model document (deployer pipeline use).
    pub fn add_model(&self, kind: DefinitionKind, definition_id: &str, document: Arc<ModelDocument>) {
        self.models_of(kind)
            .insert(definition_id.to_string(), document);
    }

    /// Whether a definition id is currently cached.
    pub fn contains_definition(&self, kind: DefinitionKind, definition_id: &str) -> bool {
        match kind {
            DefinitionKind::Case => self.case_definitions.contains(definition_id),
            DefinitionKind::Process => self.process_definitions.contains(definition_id),
            DefinitionKind::Decision => self.decision_definitions.contains(definition_id),
        }
    }

    /// Number of cached definitions of a kind.
    pub fn definition_count(&self, kind: DefinitionKind) -> usize {
        match kind {
            DefinitionKind::Case => self.case_definitions.len(),
            DefinitionKind::Process => self.process_definitions.len(),
            DefinitionKind::Decision => self.decision_definitions.len(),
        }
    }

    /// Whether a model document is currently cached.
    pub fn contains_model(&self, kind: DefinitionKind, definition_id: &str) -> bool {
        self.models_of(kind).contains(definition_id)
    }

    /// Drop a definition and its model document from the cache. Durable
    /// storage is untouched.
    pub fn remove_definition(&self, kind: DefinitionKind, definition_id: &str) {
        match kind {
            DefinitionKind::Case => self.case_definitions.remove(definition_id),
            DefinitionKind::Process => self.process_definitions.remove(definition_id),
            DefinitionKind::Decision => self.decision_definitions.remove(definition_id),
        }
        self.models_of(kind).remove(definition_id);
    }

    /// Drop every cached definition and model document belonging to a
    /// deployment, across all kinds.
    ///
    /// Failures for one kind are logged and do not stop the removal of the
    /// remaining kinds.
    pub async fn remove_deployment(&self, deployment_id: &str) {
        for kind in DefinitionKind::ALL {
            if let Err(err) = self.remove_deployment_kind(kind, deployment_id).await {
                warn!(
                    deployment_id,
                    %kind,
                    error = %err,
                    "failed to remove cached definitions, continuing with remaining kinds"
                );
            }
        }
    }

    async fn remove_deployment_kind(
        &self,
        kind: DefinitionKind,
        deployment_id: &str,
    ) -> Result<()> {
        let records = self
            .store
            .find_definitions_by_deployment(deployment_id)
            .await?;
        for record in records.into_iter().filter(|r| r.kind == kind) {
            self.remove_definition(kind, &record.id);
            debug!(definition_id = %record.id, %kind, "removed cached definition");
        }
        Ok(())
    }

    /// Clear the entire cache of one definition kind (configuration
    /// reload).
    pub fn discard(&self, kind: DefinitionKind) {
        match kind {
            DefinitionKind::Case => self.case_definitions.clear(),
            DefinitionKind::Process => self.process_definitions.clear(),
            DefinitionKind::Decision => self.decision_definitions.clear(),
        }
        self.models_of(kind).clear();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn models_of(&self, kind: DefinitionKind) -> &BoundedMap<ModelDocument> {
        match kind {
            DefinitionKind::Case => &self.case_models,
            DefinitionKind::Process => &self.process_models,
            DefinitionKind::Decision => &self.decision_models,
        }
    }

    async fn find_record(
        &self,
        kind: DefinitionKind,
        definition_id: &str,
    ) -> Result<DefinitionRecord> {
        self.store
            .find_definition_by_id(kind, definition_id)
            .await?
            .ok_or_else(|| {
                EngineError::definition_not_found(kind, format!("id '{definition_id}'"))
            })
    }

    /// Resolve a record against one kind cache.
    ///
    /// Warm hits reconcile the modifiable fields of the passed-in record
    /// into the cached instance and return it unchanged otherwise. The cold
    /// path re-runs the whole deployer chain for the owning deployment
    /// under a per-id lock; if the chain does not produce the target id,
    /// that is a deployer contract violation and fatal for this resolve.
    async fn resolve_in<T: CachedDefinition>(
        &self,
        kind: DefinitionKind,
        map: &BoundedMap<T>,
        record: &DefinitionRecord,
    ) -> Result<Arc<T>> {
        if let Some(cached) = map.get(&record.id) {
            cached.reconcile(record);
            return Ok(cached);
        }

        let lock = self
            .resolve_locks
            .entry(record.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // another resolve may have warmed the entry while we waited
        if let Some(cached) = map.get(&record.id) {
            cached.reconcile(record);
            return Ok(cached);
        }

        debug!(
            definition_id = %record.id,
            deployment_id = %record.deployment_id,
            %kind,
            "definition not cached, re-running deployment"
        );
        let deployment = self
            .store
            .find_deployment_by_id(&record.deployment_id)
            .await?
            .ok_or_else(|| EngineError::DeploymentNotFound {
                deployment_id: record.deployment_id.clone(),
            })?;
        self.deploy(&deployment).await?;

        map.get(&record.id)
            .ok_or_else(|| EngineError::CacheConsistency {
                definition_id: record.id.clone(),
                deployment_id: record.deployment_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_map_evicts_least_recently_used() {
        let map: BoundedMap<String> = BoundedMap::new(2);
        map.insert("a".to_string(), Arc::new("A".to_string()));
        map.insert("b".to_string(), Arc::new("B".to_string()));

        // touch "a" so "b" becomes the eviction victim
        assert!(map.get("a").is_some());
        map.insert("c".to_string(), Arc::new("C".to_string()));

        assert!(map.contains("a"));
        assert!(!map.contains("b"));
        assert!(map.contains("c"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_bounded_map_zero_capacity_is_unbounded() {
        let map: BoundedMap<u32> = BoundedMap::new(0);
        for i in 0..100 {
            map.insert(format!("k{i}"), Arc::new(i));
        }
        assert_eq!(map.len(), 100);
    }

    #[test]
    fn test_bounded_map_remove_and_clear() {
        let map: BoundedMap<u32> = BoundedMap::new(10);
        map.insert("a".to_string(), Arc::new(1));
        map.insert("b".to_string(), Arc::new(2));

        map.remove("a");
        assert!(!map.contains("a"));
        assert_eq!(map.len(), 1);

        map.clear();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_bounded_map_evicted_entry_survives_through_arc() {
        let map: BoundedMap<String> = BoundedMap::new(1);
        map.insert("a".to_string(), Arc::new("A".to_string()));
        let held = map.get("a").unwrap();

        map.insert("b".to_string(), Arc::new("B".to_string()));
        assert!(!map.contains("a"));
        // the in-flight holder keeps working with its copy
        assert_eq!(held.as_str(), "A");
    }
}
