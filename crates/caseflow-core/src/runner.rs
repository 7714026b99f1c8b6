// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation runner: drives one unit of work to quiescence.
//!
//! Operations are enqueued, never executed re-entrantly: while the runner is
//! draining, a `perform` triggered from inside a behavior only appends to
//! the queue and returns. The drain loop pops strictly in FIFO order, so
//! all operations of a unit of work execute sequentially in the order they
//! were enqueued.
//!
//! When the next operation answers `is_async`, it is not executed; a [`Job`]
//! is recorded as the durable resume point and the loop moves on. Once the
//! queue is empty the tree is quiescent and control returns to the caller.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::definitions::{Activity, CaseDefinition};
use crate::deploy::cache::DeploymentCache;
use crate::error::Result;
use crate::execution::{CaseExecution, RuntimeState};
use crate::operations::{self, AtomicOperation};

/// Resume point for an operation suspended at the async boundary.
///
/// The job carries no continuation state beyond the target execution and the
/// suspended operation; the persisted execution itself is the resume point.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job id.
    pub id: String,
    /// The execution the suspended operation targets.
    pub case_execution_id: String,
    /// The suspended operation.
    pub operation: AtomicOperation,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

pub(crate) struct QueuedOperation {
    pub(crate) operation: AtomicOperation,
    pub(crate) execution_id: String,
    pub(crate) via_job: bool,
}

/// Execution context of one unit of work.
///
/// Wraps the execution arena and the operation queue; behaviors receive a
/// mutable reference and interact with the tree exclusively through it.
pub struct OperationContext<'a> {
    pub(crate) runtime: &'a mut RuntimeState,
    pub(crate) cache: Arc<DeploymentCache>,
    queue: VecDeque<QueuedOperation>,
    draining: bool,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(runtime: &'a mut RuntimeState, cache: Arc<DeploymentCache>) -> Self {
        Self {
            runtime,
            cache,
            queue: VecDeque::new(),
            draining: false,
        }
    }

    /// Enqueue an operation for an execution.
    ///
    /// The operation runs after all currently queued operations, within the
    /// same unit of work.
    pub fn enqueue(&mut self, operation: AtomicOperation, execution_id: &str) {
        self.queue.push_back(QueuedOperation {
            operation,
            execution_id: execution_id.to_string(),
            via_job: false,
        });
    }

    /// Look up an execution.
    pub fn execution(&self, execution_id: &str) -> Result<&CaseExecution> {
        self.runtime.get(execution_id)
    }

    /// Look up an execution mutably.
    pub fn execution_mut(&mut self, execution_id: &str) -> Result<&mut CaseExecution> {
        self.runtime.get_mut(execution_id)
    }

    /// Child execution ids of an execution, in creation order.
    pub fn children(&self, execution_id: &str) -> Result<Vec<String>> {
        Ok(self.runtime.get(execution_id)?.children.clone())
    }

    /// Create a child execution in state `NEW` under an active parent.
    pub fn create_child_execution(
        &mut self,
        parent_id: &str,
        activity: &Arc<Activity>,
    ) -> Result<String> {
        self.runtime.new_child_execution(parent_id, activity)
    }

    /// Create a sub case instance root spawned by `super_execution_id`.
    ///
    /// Links both directions: the new root keeps a back-reference to its
    /// super execution, the super execution records the sub case instance.
    pub fn create_sub_case_instance(
        &mut self,
        super_execution_id: &str,
        definition: Arc<CaseDefinition>,
    ) -> Result<String> {
        self.runtime.get(super_execution_id)?;
        let sub_id = self
            .runtime
            .new_case_instance(definition, Some(super_execution_id.to_string()));
        self.runtime.get_mut(super_execution_id)?.sub_case_instance_id = Some(sub_id.clone());
        Ok(sub_id)
    }

    /// Read a variable visible to an execution (walking up the tree).
    pub fn variable(&self, execution_id: &str, name: &str) -> Option<Value> {
        self.runtime.variable(execution_id, name).cloned()
    }

    /// All variables visible to an execution, inner scopes overriding
    /// outer ones.
    pub fn visible_variables(
        &self,
        execution_id: &str,
    ) -> Result<std::collections::HashMap<String, Value>> {
        self.runtime.get(execution_id)?;
        Ok(self.runtime.visible_variables(execution_id))
    }

    /// The deployment cache of the engine.
    pub fn cache(&self) -> &Arc<DeploymentCache> {
        &self.cache
    }

    /// Entry point: enqueue and drain until quiescent or suspended.
    pub(crate) async fn run(
        &mut self,
        operation: AtomicOperation,
        execution_id: &str,
    ) -> Result<()> {
        self.enqueue(operation, execution_id);
        self.drain().await
    }

    /// Resume a suspended operation from its job, bypassing the async check.
    pub(crate) async fn run_job(&mut self, job: Job) -> Result<()> {
        self.queue.push_back(QueuedOperation {
            operation: job.operation,
            execution_id: job.case_execution_id,
            via_job: true,
        });
        self.drain().await
    }

    async fn drain(&mut self) -> Result<()> {
        if self.draining {
            // re-entrant perform: the outer drain loop picks it up
            return Ok(());
        }
        self.draining = true;
        let result = self.drain_loop().await;
        self.draining = false;
        result
    }

    async fn drain_loop(&mut self) -> Result<()> {
        while let Some(next) = self.queue.pop_front() {
            let Some(execution) = self.runtime.try_get(&next.execution_id) else {
                // target vanished earlier in this unit of work
                debug!(
                    execution_id = %next.execution_id,
                    operation = next.operation.event_name(),
                    "skipping operation for removed execution"
                );
                continue;
            };

            if !next.via_job && next.operation.is_async(execution)? {
                let job = Job {
                    id: Uuid::new_v4().to_string(),
                    case_execution_id: next.execution_id.clone(),
                    operation: next.operation,
                    created_at: Utc::now(),
                };
                debug!(
                    job_id = %job.id,
                    execution_id = %next.execution_id,
                    "operation suspended at async boundary"
                );
                self.runtime.jobs.push(job);
                continue;
            }

            operations::execute(self, next.operation, &next.execution_id).await?;
        }
        Ok(())
    }
}
