// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable case engine facade.
//!
//! [`CaseEngine`] wires the deployment cache, the durable store and the
//! operation runner together and exposes the external entry points: deploy,
//! case lifecycle commands, queries and the job seam for async
//! continuation. Each entry point is one unit of work: it locks the
//! runtime, runs the operation loop to quiescence (or to an async
//! boundary) and returns. Errors propagate to the caller unretried.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use caseflow_core::engine::CaseEngine;
//! use caseflow_core::deploy::DeploymentSpec;
//! use caseflow_core::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = CaseEngine::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .build()?;
//!
//!     engine.deploy(DeploymentSpec::new("cases").add_resource(
//!         "loan.case.json",
//!         br#"{"key":"loan","plan_model":{"id":"plan","items":[
//!             {"id":"review","type":"humanTask"}]}}"#.to_vec(),
//!     )).await?;
//!
//!     let case = engine.create_case_instance_by_key("loan", HashMap::new()).await?;
//!     engine.complete(&case.id, "review").await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::definitions::CaseDefinition;
use crate::deploy::{self, Deployer, DeploymentSpec};
use crate::deploy::cache::DeploymentCache;
use crate::error::{EngineError, Result};
use crate::execution::{CaseExecution, CaseExecutionState, RuntimeState};
use crate::operations::AtomicOperation;
use crate::runner::{Job, OperationContext};
use crate::store::{DeploymentRecord, EngineStore};

/// Builder for creating a [`CaseEngine`].
#[derive(Default)]
pub struct CaseEngineBuilder {
    store: Option<Arc<dyn EngineStore>>,
    config: Option<EngineConfig>,
    deployers: Option<Vec<Arc<dyn Deployer>>>,
}

impl std::fmt::Debug for CaseEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseEngineBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .field("deployers", &self.deployers.as_ref().map(Vec::len))
            .finish()
    }
}

impl CaseEngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the durable store (required).
    pub fn store(mut self, store: Arc<dyn EngineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the engine configuration.
    ///
    /// Default: [`EngineConfig::default`]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the deployer chain.
    ///
    /// Default: [`crate::deploy::default_deployers`]
    pub fn deployers(mut self, deployers: Vec<Arc<dyn Deployer>>) -> Self {
        self.deployers = Some(deployers);
        self
    }

    /// Build the engine.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> AnyResult<CaseEngine> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let config = self.config.unwrap_or_default();
        let deployers = self
            .deployers
            .unwrap_or_else(crate::deploy::default_deployers);
        let cache = Arc::new(DeploymentCache::with_deployers(
            store.clone(),
            &config,
            deployers,
        ));

        Ok(CaseEngine {
            store,
            cache,
            runtime: Mutex::new(RuntimeState::new()),
            config,
        })
    }
}

/// A view of one case execution, safe to hand out of the engine.
#[derive(Debug, Clone)]
pub struct CaseExecutionView {
    /// Execution id.
    pub id: String,
    /// Owning case instance id.
    pub case_instance_id: String,
    /// Activity id, if an activity is attached.
    pub activity_id: Option<String>,
    /// Activity display name.
    pub activity_name: Option<String>,
    /// Current state.
    pub state: CaseExecutionState,
    /// Parent execution id.
    pub parent_id: Option<String>,
    /// Sub case instance spawned by this execution, if any.
    pub sub_case_instance_id: Option<String>,
    /// Local variables.
    pub variables: HashMap<String, Value>,
}

impl From<&CaseExecution> for CaseExecutionView {
    fn from(execution: &CaseExecution) -> Self {
        let activity = execution.activity().ok();
        Self {
            id: execution.id().to_string(),
            case_instance_id: execution.case_instance_id().to_string(),
            activity_id: activity.as_ref().map(|a| a.id.clone()),
            activity_name: activity.as_ref().and_then(|a| a.name.clone()),
            state: execution.state(),
            parent_id: execution.parent_id().map(str::to_string),
            sub_case_instance_id: execution.sub_case_instance_id().map(str::to_string),
            variables: execution.variables().clone(),
        }
    }
}

/// The embeddable case execution engine.
pub struct CaseEngine {
    store: Arc<dyn EngineStore>,
    cache: Arc<DeploymentCache>,
    runtime: Mutex<RuntimeState>,
    config: EngineConfig,
}

impl std::fmt::Debug for CaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseEngine")
            .field("store", &"...")
            .field("cache", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl CaseEngine {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> CaseEngineBuilder {
        CaseEngineBuilder::new()
    }

    /// The deployment cache.
    pub fn cache(&self) -> &Arc<DeploymentCache> {
        &self.cache
    }

    /// The durable store.
    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Repository operations
    // ------------------------------------------------------------------

    /// Perform a deployment: store it, version its definitions and run the
    /// deployer chain.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn deploy(&self, spec: DeploymentSpec) -> Result<DeploymentRecord> {
        deploy::perform_deployment(&self.cache, spec).await
    }

    /// Delete a deployment from durable storage and drop everything it
    /// contributed to the cache.
    #[instrument(skip(self))]
    pub async fn delete_deployment(&self, deployment_id: &str) -> Result<()> {
        self.store
            .find_deployment_by_id(deployment_id)
            .await?
            .ok_or_else(|| EngineError::DeploymentNotFound {
                deployment_id: deployment_id.to_string(),
            })?;

        // cache removal queries the store for the deployment's definitions,
        // so it must run before the rows disappear
        self.cache.remove_deployment(deployment_id).await;
        self.store.delete_deployment(deployment_id).await?;

        info!(deployment_id, "deployment deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Case lifecycle
    // ------------------------------------------------------------------

    /// Create a case instance from the latest definition of a key.
    #[instrument(skip(self, variables))]
    pub async fn create_case_instance_by_key(
        &self,
        key: &str,
        variables: HashMap<String, Value>,
    ) -> Result<CaseExecutionView> {
        let definition = self.cache.find_latest_case_definition_by_key(key).await?;
        self.create_case_instance(definition, variables).await
    }

    /// Create a case instance from a specific definition id.
    #[instrument(skip(self, variables))]
    pub async fn create_case_instance_by_id(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<CaseExecutionView> {
        let definition = self.cache.find_case_definition_by_id(definition_id).await?;
        self.create_case_instance(definition, variables).await
    }

    /// Create a case instance from an already resolved definition.
    pub async fn create_case_instance(
        &self,
        definition: Arc<CaseDefinition>,
        variables: HashMap<String, Value>,
    ) -> Result<CaseExecutionView> {
        let mut runtime = self.runtime.lock().await;
        let case_id = runtime.new_case_instance(definition.clone(), None);
        for (name, value) in variables {
            runtime.get_mut(&case_id)?.set_variable(name, value);
        }

        debug!(
            case_instance_id = %case_id,
            definition_id = %definition.id(),
            "creating case instance"
        );
        let mut ctx = OperationContext::new(&mut runtime, self.cache.clone());
        ctx.run(AtomicOperation::CaseInstanceCreate, &case_id).await?;

        Ok(CaseExecutionView::from(runtime.get(&case_id)?))
    }

    /// Manually start an enabled execution.
    #[instrument(skip(self))]
    pub async fn manual_start(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionManualStart)
            .await
    }

    /// Disable an enabled execution.
    #[instrument(skip(self))]
    pub async fn disable(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionDisable)
            .await
    }

    /// Re-enable a disabled execution.
    #[instrument(skip(self))]
    pub async fn reenable(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionReenable)
            .await
    }

    /// Complete an active execution (e.g. a finished human task).
    #[instrument(skip(self))]
    pub async fn complete(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionComplete)
            .await
    }

    /// Complete an active execution under the relaxed (required children
    /// only) completion rule.
    #[instrument(skip(self))]
    pub async fn manual_complete(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(
            case_instance_id,
            activity_id,
            AtomicOperation::CaseExecutionManualComplete,
        )
        .await
    }

    /// Make a milestone occur.
    #[instrument(skip(self))]
    pub async fn occur(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionOccur)
            .await
    }

    /// Terminate an execution (and, for composites, its whole subtree).
    #[instrument(skip(self))]
    pub async fn terminate(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(
            case_instance_id,
            activity_id,
            AtomicOperation::CaseExecutionTerminatingOnTermination,
        )
        .await
    }

    /// Suspend an execution (and, for composites, its whole subtree).
    #[instrument(skip(self))]
    pub async fn suspend(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(
            case_instance_id,
            activity_id,
            AtomicOperation::CaseExecutionSuspendingOnSuspension,
        )
        .await
    }

    /// Resume a suspended execution.
    #[instrument(skip(self))]
    pub async fn resume(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionResume)
            .await
    }

    /// Re-activate a failed execution.
    #[instrument(skip(self))]
    pub async fn reactivate(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionReactivate)
            .await
    }

    /// Mark an active execution as failed.
    #[instrument(skip(self))]
    pub async fn fault(&self, case_instance_id: &str, activity_id: &str) -> Result<()> {
        self.perform(case_instance_id, activity_id, AtomicOperation::CaseExecutionFault)
            .await
    }

    /// Close a settled case instance, cascading deletion of its tree.
    #[instrument(skip(self))]
    pub async fn close(&self, case_instance_id: &str) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        runtime.get(case_instance_id)?;
        let mut ctx = OperationContext::new(&mut runtime, self.cache.clone());
        ctx.run(AtomicOperation::CaseInstanceClose, case_instance_id)
            .await
    }

    /// Set a variable on an execution.
    pub async fn set_variable(
        &self,
        case_instance_id: &str,
        activity_id: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let execution_id = find_execution(&runtime, case_instance_id, activity_id)?;
        runtime
            .get_mut(&execution_id)?
            .set_variable(name.to_string(), value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The case instance root execution, if it still exists.
    pub async fn case_instance(&self, case_instance_id: &str) -> Option<CaseExecutionView> {
        let runtime = self.runtime.lock().await;
        runtime.try_get(case_instance_id).map(CaseExecutionView::from)
    }

    /// The execution of an activity within a case instance, if any.
    pub async fn case_execution(
        &self,
        case_instance_id: &str,
        activity_id: &str,
    ) -> Option<CaseExecutionView> {
        let runtime = self.runtime.lock().await;
        runtime
            .find_by_activity(case_instance_id, activity_id)
            .map(CaseExecutionView::from)
    }

    /// All executions of a case instance.
    pub async fn case_executions(&self, case_instance_id: &str) -> Vec<CaseExecutionView> {
        let runtime = self.runtime.lock().await;
        runtime
            .executions_of_case(case_instance_id)
            .into_iter()
            .map(CaseExecutionView::from)
            .collect()
    }

    /// Read a variable visible to an activity's execution.
    pub async fn variable(
        &self,
        case_instance_id: &str,
        activity_id: &str,
        name: &str,
    ) -> Option<Value> {
        let runtime = self.runtime.lock().await;
        let execution_id = runtime
            .find_by_activity(case_instance_id, activity_id)?
            .id()
            .to_string();
        runtime.variable(&execution_id, name).cloned()
    }

    // ------------------------------------------------------------------
    // Jobs (async boundary seam)
    // ------------------------------------------------------------------

    /// Jobs waiting for an external executor.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        let runtime = self.runtime.lock().await;
        runtime.jobs.clone()
    }

    /// Execute one pending job, resuming its suspended operation.
    #[instrument(skip(self))]
    pub async fn execute_job(&self, job_id: &str) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let position = runtime
            .jobs
            .iter()
            .position(|job| job.id == job_id)
            .ok_or_else(|| EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let job = runtime.jobs.remove(position);

        debug!(
            job_id,
            execution_id = %job.case_execution_id,
            "executing job"
        );
        let mut ctx = OperationContext::new(&mut runtime, self.cache.clone());
        ctx.run_job(job).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn perform(
        &self,
        case_instance_id: &str,
        activity_id: &str,
        operation: AtomicOperation,
    ) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let execution_id = find_execution(&runtime, case_instance_id, activity_id)?;
        let mut ctx = OperationContext::new(&mut runtime, self.cache.clone());
        ctx.run(operation, &execution_id).await
    }
}

fn find_execution(
    runtime: &RuntimeState,
    case_instance_id: &str,
    activity_id: &str,
) -> Result<String> {
    runtime
        .find_by_activity(case_instance_id, activity_id)
        .map(|execution| execution.id().to_string())
        .ok_or_else(|| EngineError::ExecutionNotFound {
            lookup: format!("case instance '{case_instance_id}' activity '{activity_id}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_builder_default() {
        let builder = CaseEngineBuilder::default();
        assert!(builder.store.is_none());
        assert!(builder.config.is_none());
    }

    #[test]
    fn test_builder_build_missing_store() {
        let result = CaseEngineBuilder::new().build();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("store is required"));
    }

    #[test]
    fn test_builder_build_success() {
        let engine = CaseEngineBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(engine.config().definition_cache_capacity, 1000);
    }

    #[test]
    fn test_builder_custom_config() {
        let engine = CaseEngineBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .config(EngineConfig {
                definition_cache_capacity: 4,
                model_cache_capacity: 2,
            })
            .build()
            .unwrap();
        assert_eq!(engine.config().definition_cache_capacity, 4);
        assert_eq!(engine.config().model_cache_capacity, 2);
    }

    #[test]
    fn test_builder_debug_hides_store() {
        let builder = CaseEngineBuilder::new().store(Arc::new(MemoryStore::new()));
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("CaseEngineBuilder"));
        assert!(debug_str.contains("..."));
    }
}
