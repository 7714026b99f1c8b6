// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable-store interface and backends for caseflow-core.
//!
//! The engine treats durable storage as a collaborator behind the
//! [`EngineStore`] trait: synchronous-looking query functions returning
//! records or `None`, which the cache interprets as "not found". The crate
//! ships an in-memory backend for tests and embedding; SQL backends live
//! with the persistence layer, outside this crate.

pub mod memory;

pub use self::memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::definitions::DefinitionKind;
use crate::error::Result;

/// Deployment record from the durable store.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    /// Unique deployment id.
    pub id: String,
    /// Human-readable deployment name.
    pub name: String,
    /// When the deployment was created.
    pub deployed_at: DateTime<Utc>,
    /// Names of the resources contained in the deployment.
    pub resource_names: Vec<String>,
}

/// Definition record from the durable store.
///
/// Identity fields (`id`, `key`, `version`, `kind`, `deployment_id`,
/// `resource_name`) are immutable once written; `suspended` is the
/// modifiable subset reconciled into cached entries on resolve.
#[derive(Debug, Clone)]
pub struct DefinitionRecord {
    /// Unique definition id (`{key}:{version}:{suffix}`).
    pub id: String,
    /// Definition key, stable across versions.
    pub key: String,
    /// Version within the key, starting at 1.
    pub version: i32,
    /// Definition kind.
    pub kind: DefinitionKind,
    /// Owning deployment.
    pub deployment_id: String,
    /// Name of the backing model resource within the deployment.
    pub resource_name: String,
    /// Whether the definition is currently suspended.
    pub suspended: bool,
}

/// Durable-store operations required by the engine core.
///
/// All lookup methods return `Ok(None)` when nothing matches; storage
/// failures surface as [`crate::error::EngineError::Store`].
#[async_trait]
pub trait EngineStore: Send + Sync {
    /// Insert a deployment record.
    async fn insert_deployment(&self, deployment: &DeploymentRecord) -> Result<()>;

    /// Insert a raw resource belonging to a deployment.
    async fn insert_resource(
        &self,
        deployment_id: &str,
        resource_name: &str,
        bytes: &[u8],
    ) -> Result<()>;

    /// Insert a definition record.
    async fn insert_definition(&self, definition: &DefinitionRecord) -> Result<()>;

    /// Look up a deployment by id.
    async fn find_deployment_by_id(&self, id: &str) -> Result<Option<DeploymentRecord>>;

    /// Look up a definition by kind and id.
    async fn find_definition_by_id(
        &self,
        kind: DefinitionKind,
        id: &str,
    ) -> Result<Option<DefinitionRecord>>;

    /// Look up the latest version of a definition by key.
    async fn find_latest_definition_by_key(
        &self,
        kind: DefinitionKind,
        key: &str,
    ) -> Result<Option<DefinitionRecord>>;

    /// Look up a definition by key and version.
    async fn find_definition_by_key_and_version(
        &self,
        kind: DefinitionKind,
        key: &str,
        version: i32,
    ) -> Result<Option<DefinitionRecord>>;

    /// Look up a definition by deployment and key.
    async fn find_definition_by_deployment_and_key(
        &self,
        kind: DefinitionKind,
        deployment_id: &str,
        key: &str,
    ) -> Result<Option<DefinitionRecord>>;

    /// All definitions (of every kind) belonging to a deployment.
    async fn find_definitions_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DefinitionRecord>>;

    /// Load the raw bytes of a deployment resource.
    async fn get_resource(
        &self,
        deployment_id: &str,
        resource_name: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Delete a deployment together with its definitions and resources.
    async fn delete_deployment(&self, deployment_id: &str) -> Result<()>;
}
