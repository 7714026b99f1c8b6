// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case execution tree: states, nodes and the execution arena.
//!
//! Executions form a tree per case instance. Nodes live in a flat arena
//! keyed by execution id; parent, child and super-execution links are plain
//! id strings, never owning pointers, so traversal needs no cycle handling.
//! The state field is only ever written by atomic operations.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use uuid::Uuid;

use crate::definitions::{Activity, CaseDefinition};
use crate::error::{EngineError, Result};
use crate::runner::Job;

// ============================================================================
// States
// ============================================================================

/// State of a case execution.
///
/// The `*Ing*` variants are transitional: a composite stays in them while
/// its termination or suspension sweep is propagating through its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseExecutionState {
    /// Just instantiated, lifecycle not started.
    New,
    /// Created and waiting to be started or enabled.
    Available,
    /// Waiting for a manual start or disable.
    Enabled,
    /// Disabled by a user decision.
    Disabled,
    /// Actively executing (or waiting as an active wait state).
    Active,
    /// Suspended; previous state is retained for parent resume.
    Suspended,
    /// Completed successfully.
    Completed,
    /// Terminated.
    Terminated,
    /// Failed; may be re-activated.
    Failed,
    /// Closed; root executions only, triggers cascade deletion.
    Closed,
    /// Termination sweep in progress, initiated on this execution.
    TerminatingOnTermination,
    /// Termination sweep in progress, caused by the parent's termination.
    TerminatingOnParentTermination,
    /// Termination sweep in progress, caused by an exit.
    TerminatingOnExit,
    /// Suspension sweep in progress, initiated on this execution.
    SuspendingOnSuspension,
    /// Suspension sweep in progress, caused by the parent's suspension.
    SuspendingOnParentSuspension,
}

impl CaseExecutionState {
    /// Whether this is one of the terminating transitional states.
    pub fn is_terminating(self) -> bool {
        matches!(
            self,
            CaseExecutionState::TerminatingOnTermination
                | CaseExecutionState::TerminatingOnParentTermination
                | CaseExecutionState::TerminatingOnExit
        )
    }

    /// Whether this is one of the suspending transitional states.
    pub fn is_suspending(self) -> bool {
        matches!(
            self,
            CaseExecutionState::SuspendingOnSuspension
                | CaseExecutionState::SuspendingOnParentSuspension
        )
    }

    /// Whether this state counts as settled for stage completion rules.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            CaseExecutionState::Disabled
                | CaseExecutionState::Completed
                | CaseExecutionState::Terminated
                | CaseExecutionState::Failed
        )
    }
}

impl std::fmt::Display for CaseExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaseExecutionState::New => "new",
            CaseExecutionState::Available => "available",
            CaseExecutionState::Enabled => "enabled",
            CaseExecutionState::Disabled => "disabled",
            CaseExecutionState::Active => "active",
            CaseExecutionState::Suspended => "suspended",
            CaseExecutionState::Completed => "completed",
            CaseExecutionState::Terminated => "terminated",
            CaseExecutionState::Failed => "failed",
            CaseExecutionState::Closed => "closed",
            CaseExecutionState::TerminatingOnTermination => "terminatingOnTermination",
            CaseExecutionState::TerminatingOnParentTermination => {
                "terminatingOnParentTermination"
            }
            CaseExecutionState::TerminatingOnExit => "terminatingOnExit",
            CaseExecutionState::SuspendingOnSuspension => "suspendingOnSuspension",
            CaseExecutionState::SuspendingOnParentSuspension => "suspendingOnParentSuspension",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Execution nodes
// ============================================================================

/// One node of a case execution tree.
pub struct CaseExecution {
    pub(crate) id: String,
    pub(crate) case_instance_id: String,
    pub(crate) definition: Arc<CaseDefinition>,
    pub(crate) activity: Option<Weak<Activity>>,
    pub(crate) parent_id: Option<String>,
    pub(crate) children: Vec<String>,
    pub(crate) super_execution_id: Option<String>,
    pub(crate) sub_case_instance_id: Option<String>,
    pub(crate) current_state: CaseExecutionState,
    pub(crate) previous_state: CaseExecutionState,
    pub(crate) variables: HashMap<String, Value>,
}

impl CaseExecution {
    /// Unique execution id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the case instance (root execution) this node belongs to.
    pub fn case_instance_id(&self) -> &str {
        &self.case_instance_id
    }

    /// The deployed definition this execution was instantiated from.
    pub fn definition(&self) -> &Arc<CaseDefinition> {
        &self.definition
    }

    /// The definition-tree activity this execution instantiates.
    ///
    /// Fails with a structural error naming this execution when the
    /// activity reference is absent or dead.
    pub fn activity(&self) -> Result<Arc<Activity>> {
        self.activity
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| EngineError::MissingActivity {
                execution_id: self.id.clone(),
            })
    }

    /// Activity id, if an activity is attached.
    pub fn activity_id(&self) -> Option<String> {
        self.activity
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|a| a.id.clone())
    }

    /// Id of the parent execution; `None` on the case instance root.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Ids of the child executions, in creation order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Back-reference to the execution in another tree that spawned this
    /// case instance, if any.
    pub fn super_execution_id(&self) -> Option<&str> {
        self.super_execution_id.as_deref()
    }

    /// Id of the sub case instance spawned by this execution, if any.
    pub fn sub_case_instance_id(&self) -> Option<&str> {
        self.sub_case_instance_id.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> CaseExecutionState {
        self.current_state
    }

    /// State before the current one.
    ///
    /// While a sweep is in progress the pre-sweep state is retained here so
    /// that a parent resume can restore it.
    pub fn previous_state(&self) -> CaseExecutionState {
        self.previous_state
    }

    /// Whether this execution is a case instance root.
    pub fn is_case_instance(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether the current state is `ACTIVE`.
    pub fn is_active(&self) -> bool {
        self.current_state == CaseExecutionState::Active
    }

    /// Whether a termination sweep is in progress on this execution.
    pub fn is_terminating(&self) -> bool {
        self.current_state.is_terminating()
    }

    /// Whether a suspension sweep is in progress on this execution.
    pub fn is_suspending(&self) -> bool {
        self.current_state.is_suspending()
    }

    /// Local variables of this execution.
    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Set a local variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Read a local variable.
    pub fn variable_local(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Move to a new state, retaining the previous one.
    ///
    /// The previous state is not overwritten while this execution is
    /// terminating or suspending, otherwise the pre-sweep state would be
    /// lost before a parent resume could restore it.
    pub(crate) fn set_current_state(&mut self, state: CaseExecutionState) {
        if !self.current_state.is_terminating() && !self.current_state.is_suspending() {
            self.previous_state = self.current_state;
        }
        self.current_state = state;
    }
}

impl std::fmt::Debug for CaseExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseExecution")
            .field("id", &self.id)
            .field("activity_id", &self.activity_id())
            .field("state", &self.current_state)
            .field("parent_id", &self.parent_id)
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// Arena
// ============================================================================

/// Flat arena of all live case executions plus the pending job queue.
#[derive(Default)]
pub(crate) struct RuntimeState {
    pub(crate) executions: HashMap<String, CaseExecution>,
    pub(crate) jobs: Vec<Job>,
}

impl RuntimeState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: &str) -> Result<&CaseExecution> {
        self.executions
            .get(id)
            .ok_or_else(|| EngineError::ExecutionNotFound {
                lookup: format!("id '{id}'"),
            })
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut CaseExecution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound {
                lookup: format!("id '{id}'"),
            })
    }

    pub(crate) fn try_get(&self, id: &str) -> Option<&CaseExecution> {
        self.executions.get(id)
    }

    /// Create a case instance root execution in state `NEW`.
    pub(crate) fn new_case_instance(
        &mut self,
        definition: Arc<CaseDefinition>,
        super_execution_id: Option<String>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let plan_model = definition.plan_model().clone();
        let execution = CaseExecution {
            id: id.clone(),
            case_instance_id: id.clone(),
            activity: Some(Arc::downgrade(&plan_model)),
            definition,
            parent_id: None,
            children: Vec::new(),
            super_execution_id,
            sub_case_instance_id: None,
            current_state: CaseExecutionState::New,
            previous_state: CaseExecutionState::New,
            variables: HashMap::new(),
        };
        self.executions.insert(id.clone(), execution);
        id
    }

    /// Create a child execution in state `NEW` under an `ACTIVE` parent.
    pub(crate) fn new_child_execution(
        &mut self,
        parent_id: &str,
        activity: &Arc<Activity>,
    ) -> Result<String> {
        let parent = self.get(parent_id)?;
        if !parent.is_active() {
            return Err(EngineError::InvalidTransition {
                execution_id: parent_id.to_string(),
                state: parent.current_state.to_string(),
                transition: "create".to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let execution = CaseExecution {
            id: id.clone(),
            case_instance_id: parent.case_instance_id.clone(),
            definition: parent.definition.clone(),
            activity: Some(Arc::downgrade(activity)),
            parent_id: Some(parent_id.to_string()),
            children: Vec::new(),
            super_execution_id: None,
            sub_case_instance_id: None,
            current_state: CaseExecutionState::New,
            previous_state: CaseExecutionState::New,
            variables: HashMap::new(),
        };
        self.executions.insert(id.clone(), execution);
        self.get_mut(parent_id)?.children.push(id.clone());
        Ok(id)
    }

    /// Detach an execution from its parent and drop it from the arena.
    pub(crate) fn remove(&mut self, id: &str) {
        if let Some(execution) = self.executions.remove(id)
            && let Some(parent_id) = execution.parent_id
            && let Some(parent) = self.executions.get_mut(&parent_id)
        {
            parent.children.retain(|child| child.as_str() != id);
        }
    }

    /// Remove an execution together with all its descendants.
    pub(crate) fn remove_subtree(&mut self, id: &str) {
        let parent_id = self
            .executions
            .get(id)
            .and_then(|e| e.parent_id.clone());

        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(execution) = self.executions.remove(&current) {
                stack.extend(execution.children);
            }
        }

        if let Some(parent_id) = parent_id
            && let Some(parent) = self.executions.get_mut(&parent_id)
        {
            parent.children.retain(|child| child.as_str() != id);
        }
    }

    /// Find the execution of a given activity within a case instance.
    pub(crate) fn find_by_activity(
        &self,
        case_instance_id: &str,
        activity_id: &str,
    ) -> Option<&CaseExecution> {
        self.executions.values().find(|e| {
            e.case_instance_id == case_instance_id
                && e.activity_id().as_deref() == Some(activity_id)
        })
    }

    /// All executions of a case instance.
    pub(crate) fn executions_of_case(&self, case_instance_id: &str) -> Vec<&CaseExecution> {
        let mut executions: Vec<&CaseExecution> = self
            .executions
            .values()
            .filter(|e| e.case_instance_id == case_instance_id)
            .collect();
        executions.sort_by(|a, b| a.id.cmp(&b.id));
        executions
    }

    /// All variables visible to an execution: the merged parent chain,
    /// inner scopes overriding outer ones.
    pub(crate) fn visible_variables(&self, execution_id: &str) -> HashMap<String, Value> {
        let mut chain = Vec::new();
        let mut current = self.try_get(execution_id);
        while let Some(execution) = current {
            chain.push(execution);
            current = execution.parent_id.as_deref().and_then(|p| self.try_get(p));
        }

        let mut merged = HashMap::new();
        for execution in chain.into_iter().rev() {
            for (name, value) in &execution.variables {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    /// Read a variable, walking up the parent chain.
    pub(crate) fn variable(&self, execution_id: &str, name: &str) -> Option<&Value> {
        let mut current = self.try_get(execution_id);
        while let Some(execution) = current {
            if let Some(value) = execution.variables.get(name) {
                return Some(value);
            }
            current = execution.parent_id.as_deref().and_then(|p| self.try_get(p));
        }
        None
    }
}
