// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for caseflow-core integration tests.
//!
//! Provides a TestContext wiring a CaseEngine over the in-memory store,
//! with a probe deployer that counts deployer-chain runs.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use caseflow_core::config::EngineConfig;
use caseflow_core::deploy::cache::DeploymentCache;
use caseflow_core::deploy::{Deployer, DeploymentSpec, default_deployers};
use caseflow_core::engine::CaseEngine;
use caseflow_core::error::Result;
use caseflow_core::store::{DeploymentRecord, MemoryStore};

/// Counts how often the deployer chain runs without deploying anything
/// itself.
pub struct ChainProbe {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Deployer for ChainProbe {
    fn name(&self) -> &'static str {
        "chain-probe"
    }

    async fn deploy(&self, _cache: &DeploymentCache, _deployment: &DeploymentRecord) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test context managing an engine over an in-memory store.
pub struct TestContext {
    pub engine: CaseEngine,
    pub store: Arc<MemoryStore>,
    chain_runs: Arc<AtomicUsize>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain_runs = Arc::new(AtomicUsize::new(0));

        let mut deployers: Vec<Arc<dyn Deployer>> = vec![Arc::new(ChainProbe {
            runs: chain_runs.clone(),
        })];
        deployers.extend(default_deployers());

        let engine = CaseEngine::builder()
            .store(store.clone())
            .config(config)
            .deployers(deployers)
            .build()
            .expect("engine builds");

        Self {
            engine,
            store,
            chain_runs,
        }
    }

    /// How often the deployer chain has run so far.
    pub fn chain_runs(&self) -> usize {
        self.chain_runs.load(Ordering::SeqCst)
    }

    /// Deploy a single case model resource.
    pub async fn deploy_case(&self, resource_name: &str, model_json: &str) -> DeploymentRecord {
        self.engine
            .deploy(
                DeploymentSpec::new("test-deployment")
                    .add_resource(resource_name, model_json.as_bytes().to_vec()),
            )
            .await
            .expect("deployment succeeds")
    }
}

/// Build a case model document with the given plan items.
pub fn case_json(key: &str, items: &str) -> String {
    format!(
        r#"{{"key": "{key}", "plan_model": {{"id": "casePlanModel", "items": [{items}]}}}}"#
    )
}

/// Build a case model document with an auto-completing plan model.
pub fn auto_complete_case_json(key: &str, items: &str) -> String {
    format!(
        r#"{{"key": "{key}", "plan_model": {{"id": "casePlanModel", "auto_complete": true, "items": [{items}]}}}}"#
    )
}
