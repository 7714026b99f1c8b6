// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store backend.
//!
//! Used by tests and lightweight embeddings; data lives only as long as the
//! process does.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::definitions::DefinitionKind;
use crate::error::Result;

use super::{DefinitionRecord, DeploymentRecord, EngineStore};

#[derive(Default)]
struct Inner {
    deployments: HashMap<String, DeploymentRecord>,
    definitions: HashMap<String, DefinitionRecord>,
    resources: HashMap<(String, String), Vec<u8>>,
}

/// In-memory [`EngineStore`] backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn insert_deployment(&self, deployment: &DeploymentRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .deployments
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn insert_resource(
        &self,
        deployment_id: &str,
        resource_name: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.resources.insert(
            (deployment_id.to_string(), resource_name.to_string()),
            bytes.to_vec(),
        );
        Ok(())
    }

    async fn insert_definition(&self, definition: &DefinitionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn find_deployment_by_id(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.deployments.get(id).cloned())
    }

    async fn find_definition_by_id(
        &self,
        kind: DefinitionKind,
        id: &str,
    ) -> Result<Option<DefinitionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .definitions
            .get(id)
            .filter(|d| d.kind == kind)
            .cloned())
    }

    async fn find_latest_definition_by_key(
        &self,
        kind: DefinitionKind,
        key: &str,
    ) -> Result<Option<DefinitionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .definitions
            .values()
            .filter(|d| d.kind == kind && d.key == key)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn find_definition_by_key_and_version(
        &self,
        kind: DefinitionKind,
        key: &str,
        version: i32,
    ) -> Result<Option<DefinitionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .definitions
            .values()
            .find(|d| d.kind == kind && d.key == key && d.version == version)
            .cloned())
    }

    async fn find_definition_by_deployment_and_key(
        &self,
        kind: DefinitionKind,
        deployment_id: &str,
        key: &str,
    ) -> Result<Option<DefinitionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .definitions
            .values()
            .find(|d| d.kind == kind && d.deployment_id == deployment_id && d.key == key)
            .cloned())
    }

    async fn find_definitions_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DefinitionRecord>> {
        let inner = self.inner.read().await;
        let mut definitions: Vec<DefinitionRecord> = inner
            .definitions
            .values()
            .filter(|d| d.deployment_id == deployment_id)
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    async fn get_resource(
        &self,
        deployment_id: &str,
        resource_name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .resources
            .get(&(deployment_id.to_string(), resource_name.to_string()))
            .cloned())
    }

    async fn delete_deployment(&self, deployment_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.deployments.remove(deployment_id);
        inner.definitions.retain(|_, d| d.deployment_id != deployment_id);
        inner.resources.retain(|(dep, _), _| dep != deployment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn definition(id: &str, key: &str, version: i32, deployment_id: &str) -> DefinitionRecord {
        DefinitionRecord {
            id: id.to_string(),
            key: key.to_string(),
            version,
            kind: DefinitionKind::Case,
            deployment_id: deployment_id.to_string(),
            resource_name: format!("{key}.case.json"),
            suspended: false,
        }
    }

    #[tokio::test]
    async fn test_latest_definition_by_key() {
        let store = MemoryStore::new();
        store
            .insert_definition(&definition("a:1:x", "a", 1, "dep-1"))
            .await
            .unwrap();
        store
            .insert_definition(&definition("a:2:y", "a", 2, "dep-2"))
            .await
            .unwrap();

        let latest = store
            .find_latest_definition_by_key(DefinitionKind::Case, "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "a:2:y");

        let v1 = store
            .find_definition_by_key_and_version(DefinitionKind::Case, "a", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v1.id, "a:1:x");

        assert!(
            store
                .find_definition_by_id(DefinitionKind::Process, "a:1:x")
                .await
                .unwrap()
                .is_none(),
            "kind filter must apply"
        );
    }

    #[tokio::test]
    async fn test_delete_deployment_removes_everything() {
        let store = MemoryStore::new();
        store
            .insert_deployment(&DeploymentRecord {
                id: "dep-1".to_string(),
                name: "first".to_string(),
                deployed_at: Utc::now(),
                resource_names: vec!["a.case.json".to_string()],
            })
            .await
            .unwrap();
        store
            .insert_definition(&definition("a:1:x", "a", 1, "dep-1"))
            .await
            .unwrap();
        store
            .insert_resource("dep-1", "a.case.json", b"{}")
            .await
            .unwrap();

        store.delete_deployment("dep-1").await.unwrap();

        assert!(store.find_deployment_by_id("dep-1").await.unwrap().is_none());
        assert!(store
            .find_definitions_by_deployment("dep-1")
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .get_resource("dep-1", "a.case.json")
            .await
            .unwrap()
            .is_none());
    }
}
