// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment intake and the deployer chain.
//!
//! A deployment is a named set of resources. Intake stores the deployment,
//! assigns definition ids and versions for every recognized resource, and
//! then runs the deployer chain. The same chain re-runs on a cold cache
//! resolve, which is what makes the cache self-repairing after restarts and
//! evictions: deployers must populate the cache with every definition (and
//! model document) of the deployment they are handed.

pub mod cache;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use caseflow_model::ModelDocument;

use crate::definitions::{CaseDefinition, DefinitionEntry, DefinitionKind};
use crate::error::{EngineError, Result};
use crate::store::{DefinitionRecord, DeploymentRecord};

use self::cache::DeploymentCache;

// ============================================================================
// Deployment intake
// ============================================================================

/// One raw resource of a deployment.
#[derive(Debug, Clone)]
pub struct DeploymentResource {
    /// Resource name; the suffix selects the definition kind
    /// (`.case.json`, `.proc.json`, `.dmn.json`).
    pub name: String,
    /// Raw resource bytes.
    pub bytes: Vec<u8>,
}

/// A deployment to be performed.
#[derive(Debug, Clone, Default)]
pub struct DeploymentSpec {
    /// Human-readable deployment name.
    pub name: String,
    /// Resources contained in the deployment.
    pub resources: Vec<DeploymentResource>,
}

impl DeploymentSpec {
    /// Start a deployment spec with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
        }
    }

    /// Add a resource.
    pub fn add_resource(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.push(DeploymentResource {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }
}

/// Store a deployment, assign definition ids and versions, and run the
/// deployer chain.
pub(crate) async fn perform_deployment(
    cache: &DeploymentCache,
    spec: DeploymentSpec,
) -> Result<DeploymentRecord> {
    let store = cache.store();
    let deployment_id = Uuid::new_v4().to_string();

    // 1. Store the deployment record itself
    let record = DeploymentRecord {
        id: deployment_id.clone(),
        name: spec.name.clone(),
        deployed_at: Utc::now(),
        resource_names: spec.resources.iter().map(|r| r.name.clone()).collect(),
    };
    store.insert_deployment(&record).await?;

    // 2. Store resources and create one definition record per recognized one
    for resource in &spec.resources {
        store
            .insert_resource(&deployment_id, &resource.name, &resource.bytes)
            .await?;

        let Some(kind) = DefinitionKind::from_resource_name(&resource.name) else {
            debug!(resource = %resource.name, "resource carries no definition");
            continue;
        };

        let key = definition_key(kind, resource)?;
        let version = store
            .find_latest_definition_by_key(kind, &key)
            .await?
            .map(|d| d.version + 1)
            .unwrap_or(1);
        let definition = DefinitionRecord {
            id: format!("{key}:{version}:{}", &deployment_id[..8]),
            key,
            version,
            kind,
            deployment_id: deployment_id.clone(),
            resource_name: resource.name.clone(),
            suspended: false,
        };
        store.insert_definition(&definition).await?;
    }

    // 3. Run the deployer chain to populate the cache
    cache.deploy(&record).await?;

    info!(
        deployment_id = %deployment_id,
        name = %spec.name,
        resources = spec.resources.len(),
        "deployment completed"
    );
    Ok(record)
}

/// Parse just far enough to learn the definition key of a resource.
fn definition_key(kind: DefinitionKind, resource: &DeploymentResource) -> Result<String> {
    let parse_error = |err: caseflow_model::ModelError| EngineError::ModelParse {
        definition_id: format!("resource '{}'", resource.name),
        details: err.to_string(),
    };
    match kind {
        DefinitionKind::Case => Ok(caseflow_model::parse_case_model(&resource.bytes)
            .map_err(parse_error)?
            .key),
        DefinitionKind::Process => Ok(caseflow_model::parse_process_model(&resource.bytes)
            .map_err(parse_error)?
            .key),
        DefinitionKind::Decision => Ok(caseflow_model::parse_decision_model(&resource.bytes)
            .map_err(parse_error)?
            .key),
    }
}

// ============================================================================
// Deployer chain
// ============================================================================

/// One member of the ordered deployer chain.
///
/// Contract: after `deploy` returns, every definition of the handled kind
/// belonging to the deployment is present in the cache, together with its
/// model document. A violation surfaces later as a cache consistency error.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deployer name for diagnostics.
    fn name(&self) -> &'static str;

    /// Populate the cache from the deployment.
    async fn deploy(&self, cache: &DeploymentCache, deployment: &DeploymentRecord) -> Result<()>;
}

/// The built-in deployer chain.
pub fn default_deployers() -> Vec<Arc<dyn Deployer>> {
    vec![
        Arc::new(CaseDefinitionDeployer),
        Arc::new(ProcessDefinitionDeployer),
        Arc::new(DecisionDefinitionDeployer),
    ]
}

async fn load_resource(
    cache: &DeploymentCache,
    deployment_id: &str,
    resource_name: &str,
) -> Result<Vec<u8>> {
    cache
        .store()
        .get_resource(deployment_id, resource_name)
        .await?
        .ok_or_else(|| EngineError::Resource {
            deployment_id: deployment_id.to_string(),
            resource_name: resource_name.to_string(),
        })
}

/// Compiles and caches case definitions.
pub struct CaseDefinitionDeployer;

#[async_trait]
impl Deployer for CaseDefinitionDeployer {
    fn name(&self) -> &'static str {
        "case-definition"
    }

    async fn deploy(&self, cache: &DeploymentCache, deployment: &DeploymentRecord) -> Result<()> {
        let records = cache
            .store()
            .find_definitions_by_deployment(&deployment.id)
            .await?;

        for record in records
            .into_iter()
            .filter(|r| r.kind == DefinitionKind::Case)
        {
            if cache.contains_definition(DefinitionKind::Case, &record.id) {
                continue;
            }
            let bytes = load_resource(cache, &deployment.id, &record.resource_name).await?;
            let model = caseflow_model::parse_case_model(&bytes).map_err(|err| {
                EngineError::ModelParse {
                    definition_id: record.id.clone(),
                    details: err.to_string(),
                }
            })?;

            debug!(
                definition_id = %record.id,
                key = %record.key,
                version = record.version,
                "deploying case definition"
            );
            let definition = Arc::new(CaseDefinition::from_model(&record, &model));
            cache.add_case_definition(definition);
            cache.add_model(
                DefinitionKind::Case,
                &record.id,
                Arc::new(ModelDocument::Case(model)),
            );
        }
        Ok(())
    }
}

/// Caches process definition entries and documents.
pub struct ProcessDefinitionDeployer;

#[async_trait]
impl Deployer for ProcessDefinitionDeployer {
    fn name(&self) -> &'static str {
        "process-definition"
    }

    async fn deploy(&self, cache: &DeploymentCache, deployment: &DeploymentRecord) -> Result<()> {
        let records = cache
            .store()
            .find_definitions_by_deployment(&deployment.id)
            .await?;

        for record in records
            .into_iter()
            .filter(|r| r.kind == DefinitionKind::Process)
        {
            if cache.contains_definition(DefinitionKind::Process, &record.id) {
                continue;
            }
            let bytes = load_resource(cache, &deployment.id, &record.resource_name).await?;
            let model = caseflow_model::parse_process_model(&bytes).map_err(|err| {
                EngineError::ModelParse {
                    definition_id: record.id.clone(),
                    details: err.to_string(),
                }
            })?;

            debug!(definition_id = %record.id, "deploying process definition");
            cache.add_process_definition(Arc::new(DefinitionEntry::from_record(&record)));
            cache.add_model(
                DefinitionKind::Process,
                &record.id,
                Arc::new(ModelDocument::Process(model)),
            );
        }
        Ok(())
    }
}

/// Caches decision definition entries and documents.
pub struct DecisionDefinitionDeployer;

#[async_trait]
impl Deployer for DecisionDefinitionDeployer {
    fn name(&self) -> &'static str {
        "decision-definition"
    }

    async fn deploy(&self, cache: &DeploymentCache, deployment: &DeploymentRecord) -> Result<()> {
        let records = cache
            .store()
            .find_definitions_by_deployment(&deployment.id)
            .await?;

        for record in records
            .into_iter()
            .filter(|r| r.kind == DefinitionKind::Decision)
        {
            if cache.contains_definition(DefinitionKind::Decision, &record.id) {
                continue;
            }
            let bytes = load_resource(cache, &deployment.id, &record.resource_name).await?;
            let model = caseflow_model::parse_decision_model(&bytes).map_err(|err| {
                EngineError::ModelParse {
                    definition_id: record.id.clone(),
                    details: err.to_string(),
                }
            })?;

            debug!(definition_id = %record.id, "deploying decision definition");
            cache.add_decision_definition(Arc::new(DefinitionEntry::from_record(&record)));
            cache.add_model(
                DefinitionKind::Decision,
                &record.id,
                Arc::new(ModelDocument::Decision(model)),
            );
        }
        Ok(())
    }
}
