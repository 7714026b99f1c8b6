// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity behaviors.
//!
//! A behavior is the per-activity-type policy object invoked by atomic
//! operations at fixed lifecycle points. Capability flags (`is_composite`,
//! `transfers_variables`) are read once at definition-load time and stored
//! on the [`Activity`](crate::definitions::Activity); operations consult the
//! flags, never the concrete type.
//!
//! The default hook implementations encode the plan-item lifecycle shared by
//! tasks: enable-or-start on creation, sibling re-instantiation on
//! repetition, immediate commit of termination/suspension sweeps. Composite
//! behaviors override the sweep hooks to propagate through their children
//! first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::definitions::ActivityType;
use crate::error::{EngineError, Result};
use crate::operations::{AtomicOperation as Op, ExecutionSnapshot};
use crate::runner::OperationContext;

/// Lifecycle policy of one activity type.
///
/// All hooks receive the execution id rather than the node itself; the
/// context is the only channel to the execution tree, which keeps behavior
/// invocations trivially re-entrant (they may enqueue further operations but
/// never execute them inline).
#[async_trait]
pub trait ActivityBehavior: Send + Sync {
    /// Whether this behavior manages child executions.
    fn is_composite(&self) -> bool {
        false
    }

    /// Whether this behavior transfers variables to and from a spawned
    /// instance.
    fn transfers_variables(&self) -> bool {
        false
    }

    /// The execution finished its create transition.
    ///
    /// Default: manually activated items wait `ENABLED`, everything else
    /// starts immediately.
    fn created(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        let activity = ctx.execution(execution_id)?.activity()?;
        if activity.manual_activation {
            ctx.enqueue(Op::CaseExecutionEnable, execution_id);
        } else {
            ctx.enqueue(Op::CaseExecutionStart, execution_id);
        }
        Ok(())
    }

    /// Execute the activity once it is `ACTIVE`. The only async hook: case
    /// tasks resolve definitions through the deployment cache here.
    async fn perform_start(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()>;

    /// Guard for the enable transition.
    fn on_enable(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// Guard for the disable transition.
    fn on_disable(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// Guard for the re-enable transition.
    fn on_reenable(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// Guard for the re-activate transition.
    fn on_reactivation(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Guard for the complete transition.
    fn on_completion(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// Guard for the manual-complete transition.
    fn on_manual_completion(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Guard for the occur transition. Only milestones occur.
    fn on_occur(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        Err(EngineError::InvalidTransition {
            execution_id: execution_id.to_string(),
            state: ctx.execution(execution_id)?.state().to_string(),
            transition: "occur".to_string(),
        })
    }

    /// A self-initiated termination sweep reached this execution.
    ///
    /// Default: nothing to propagate, commit immediately.
    fn on_termination(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        ctx.enqueue(Op::CaseExecutionTerminate, execution_id);
        Ok(())
    }

    /// A parent-caused termination sweep reached this execution.
    fn on_parent_termination(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        ctx.enqueue(Op::CaseExecutionParentTerminate, execution_id);
        Ok(())
    }

    /// An exit sweep reached this execution.
    fn on_exit(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        ctx.enqueue(Op::CaseExecutionExit, execution_id);
        Ok(())
    }

    /// A self-initiated suspension sweep reached this execution.
    fn on_suspension(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        ctx.enqueue(Op::CaseExecutionSuspend, execution_id);
        Ok(())
    }

    /// A parent-caused suspension sweep reached this execution.
    fn on_parent_suspension(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        ctx.enqueue(Op::CaseExecutionParentSuspend, execution_id);
        Ok(())
    }

    /// The execution left `SUSPENDED`.
    fn resumed(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// The case instance root is about to close.
    fn on_close(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    /// Repetition: re-instantiate a sibling of the finished execution while
    /// the parent is still active.
    fn repeat(&self, ctx: &mut OperationContext<'_>, snapshot: &ExecutionSnapshot) -> Result<()> {
        let Some(parent_id) = snapshot.parent_id.clone() else {
            return Ok(());
        };
        if !ctx.execution(&parent_id)?.is_active() {
            return Ok(());
        }
        let sibling = ctx.create_child_execution(&parent_id, &snapshot.activity)?;
        debug!(
            parent_id = %parent_id,
            activity_id = %snapshot.activity.id,
            sibling = %sibling,
            "repetition re-instantiated plan item"
        );
        ctx.enqueue(Op::CaseExecutionCreate, &sibling);
        Ok(())
    }

    /// The fixed parent notification: a child performed `event`.
    ///
    /// Default dispatch routes settle events to the specific handlers below.
    fn handle_child_transition(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        child: &ExecutionSnapshot,
        event: &str,
    ) -> Result<()> {
        match event {
            "complete" | "manualComplete" | "occur" => {
                self.handle_child_completion(ctx, execution_id, child)
            }
            // fault is deliberately absent: a FAILED child waits for
            // re-activation and must not trip the completion check
            "terminate" | "exit" | "parentTerminate" => {
                self.handle_child_termination(ctx, execution_id, child)
            }
            "suspend" | "parentSuspend" => self.handle_child_suspension(ctx, execution_id, child),
            "disable" => self.handle_child_disabled(ctx, execution_id, child),
            _ => Ok(()),
        }
    }

    /// A child completed (or occurred).
    fn handle_child_completion(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        Ok(())
    }

    /// A child terminated or exited.
    fn handle_child_termination(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        Ok(())
    }

    /// A child suspended.
    fn handle_child_suspension(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        Ok(())
    }

    /// A child was disabled.
    fn handle_child_disabled(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        Ok(())
    }

    /// Copy variables between a spawning execution and a spawned instance.
    fn transfer_variables(
        &self,
        _ctx: &mut OperationContext<'_>,
        _source_execution_id: &str,
        _target_execution_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Resolve the behavior singleton for an activity type.
pub fn behavior_for(activity_type: ActivityType) -> Arc<dyn ActivityBehavior> {
    match activity_type {
        ActivityType::CasePlanModel => Arc::new(CasePlanModelBehavior),
        ActivityType::Stage => Arc::new(StageBehavior),
        ActivityType::HumanTask => Arc::new(HumanTaskBehavior),
        ActivityType::Milestone => Arc::new(MilestoneBehavior),
        ActivityType::CaseTask => Arc::new(CaseTaskBehavior),
    }
}

// ============================================================================
// Composite machinery shared by stages and the case plan model
// ============================================================================

use crate::execution::CaseExecutionState as St;

/// Instantiate one child execution per child activity, then trigger each
/// child's create lifecycle while the composite is still active.
fn instantiate_children(ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
    let activity = ctx.execution(execution_id)?.activity()?;

    let mut created = Vec::with_capacity(activity.children.len());
    for child_activity in &activity.children {
        created.push(ctx.create_child_execution(execution_id, child_activity)?);
    }

    for child_id in created {
        if !ctx.execution(execution_id)?.is_active() {
            break;
        }
        ctx.enqueue(Op::CaseExecutionCreate, &child_id);
    }
    Ok(())
}

/// Is the composite currently allowed to complete?
///
/// `strict` demands every child settled; the relaxed rule (auto-complete,
/// manual completion) only demands it of required children. Children in
/// `ACTIVE`, `NEW` or a transitional state always block.
fn is_completable(
    ctx: &OperationContext<'_>,
    execution_id: &str,
    strict: bool,
) -> Result<bool> {
    for child_id in ctx.execution(execution_id)?.children() {
        let child = ctx.execution(child_id)?;
        let state = child.state();
        if matches!(state, St::Active | St::New) || state.is_terminating() || state.is_suspending()
        {
            return Ok(false);
        }
        if state.is_settled() {
            continue;
        }
        if strict || child.activity()?.required {
            return Ok(false);
        }
    }
    Ok(true)
}

fn require_completable(
    ctx: &mut OperationContext<'_>,
    execution_id: &str,
    strict: bool,
) -> Result<()> {
    if is_completable(ctx, execution_id, strict)? {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            execution_id: execution_id.to_string(),
            state: ctx.execution(execution_id)?.state().to_string(),
            transition: "complete".to_string(),
        })
    }
}

/// Complete the composite once its completion rule is satisfied.
fn check_auto_completion(ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
    let execution = ctx.execution(execution_id)?;
    if !execution.is_active() {
        return Ok(());
    }
    let strict = !execution.activity()?.auto_complete;
    if is_completable(ctx, execution_id, strict)? {
        ctx.enqueue(Op::CaseExecutionComplete, execution_id);
    }
    Ok(())
}

/// Propagate a termination sweep to all children, or commit right away when
/// there is nothing left to sweep.
fn propagate_termination(
    ctx: &mut OperationContext<'_>,
    execution_id: &str,
    closing: Op,
) -> Result<()> {
    let children = ctx.children(execution_id)?;
    if children.is_empty() {
        ctx.enqueue(closing, execution_id);
        return Ok(());
    }

    for child_id in children {
        let child = ctx.execution(&child_id)?;
        let state = child.state();
        if state.is_terminating() || state.is_suspending() {
            // already on its way out; its closing operation reports back
            continue;
        }
        let child_type = child.activity()?.activity_type;
        if child_type == ActivityType::Milestone
            && matches!(state, St::Available | St::Suspended)
        {
            ctx.enqueue(Op::CaseExecutionTerminatingOnParentTermination, &child_id);
        } else {
            ctx.enqueue(Op::CaseExecutionTerminatingOnExit, &child_id);
        }
    }
    Ok(())
}

/// Propagate a suspension sweep to all children, or commit right away when
/// every child is already settled into a non-suspendable state.
fn propagate_suspension(
    ctx: &mut OperationContext<'_>,
    execution_id: &str,
    closing: Op,
) -> Result<()> {
    let mut pending = false;
    for child_id in ctx.children(execution_id)? {
        let state = ctx.execution(&child_id)?.state();
        match state {
            St::Available | St::Enabled | St::Disabled | St::Active => {
                ctx.enqueue(Op::CaseExecutionSuspendingOnParentSuspension, &child_id);
                pending = true;
            }
            s if s.is_suspending() || s.is_terminating() => {
                pending = true;
            }
            _ => {}
        }
    }
    if !pending {
        ctx.enqueue(closing, execution_id);
    }
    Ok(())
}

/// Resume all suspended children after the composite left `SUSPENDED`.
fn resume_children(ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
    for child_id in ctx.children(execution_id)? {
        if ctx.execution(&child_id)?.state() == St::Suspended {
            ctx.enqueue(Op::CaseExecutionParentResume, &child_id);
        }
    }
    Ok(())
}

// ============================================================================
// Behavior variants
// ============================================================================

/// Composite behavior for stages.
pub struct StageBehavior;

#[async_trait]
impl ActivityBehavior for StageBehavior {
    fn is_composite(&self) -> bool {
        true
    }

    async fn perform_start(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        instantiate_children(ctx, execution_id)
    }

    fn on_completion(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        let strict = !ctx.execution(execution_id)?.activity()?.auto_complete;
        require_completable(ctx, execution_id, strict)
    }

    fn on_manual_completion(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        require_completable(ctx, execution_id, false)
    }

    fn on_termination(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_termination(ctx, execution_id, Op::CaseExecutionTerminate)
    }

    fn on_parent_termination(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        propagate_termination(ctx, execution_id, Op::CaseExecutionParentTerminate)
    }

    fn on_exit(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_termination(ctx, execution_id, Op::CaseExecutionExit)
    }

    fn on_suspension(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_suspension(ctx, execution_id, Op::CaseExecutionSuspend)
    }

    fn on_parent_suspension(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        propagate_suspension(ctx, execution_id, Op::CaseExecutionParentSuspend)
    }

    fn resumed(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        resume_children(ctx, execution_id)
    }

    fn handle_child_completion(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }

    fn handle_child_termination(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }

    fn handle_child_disabled(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }
}

/// Stage semantics at the case root, plus close handling.
pub struct CasePlanModelBehavior;

#[async_trait]
impl ActivityBehavior for CasePlanModelBehavior {
    fn is_composite(&self) -> bool {
        true
    }

    async fn perform_start(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        instantiate_children(ctx, execution_id)
    }

    fn on_completion(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        let strict = !ctx.execution(execution_id)?.activity()?.auto_complete;
        require_completable(ctx, execution_id, strict)
    }

    fn on_manual_completion(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        require_completable(ctx, execution_id, false)
    }

    fn on_termination(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_termination(ctx, execution_id, Op::CaseExecutionTerminate)
    }

    fn on_exit(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_termination(ctx, execution_id, Op::CaseExecutionExit)
    }

    fn on_suspension(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        propagate_suspension(ctx, execution_id, Op::CaseExecutionSuspend)
    }

    fn resumed(&self, ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
        resume_children(ctx, execution_id)
    }

    fn handle_child_completion(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }

    fn handle_child_termination(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }

    fn handle_child_disabled(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
        _child: &ExecutionSnapshot,
    ) -> Result<()> {
        check_auto_completion(ctx, execution_id)
    }
}

/// Wait-state behavior for human tasks; completion arrives from outside.
pub struct HumanTaskBehavior;

#[async_trait]
impl ActivityBehavior for HumanTaskBehavior {
    async fn perform_start(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        let activity = ctx.execution(execution_id)?.activity()?;
        debug!(
            execution_id,
            activity_id = %activity.id,
            "human task entered wait state"
        );
        Ok(())
    }
}

/// Milestones wait `AVAILABLE` until they occur.
pub struct MilestoneBehavior;

#[async_trait]
impl ActivityBehavior for MilestoneBehavior {
    fn created(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        // milestones stay AVAILABLE until they occur
        Ok(())
    }

    async fn perform_start(
        &self,
        _ctx: &mut OperationContext<'_>,
        _execution_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn on_occur(&self, _ctx: &mut OperationContext<'_>, _execution_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Launches a sub case instance and completes when the sub case completes.
pub struct CaseTaskBehavior;

#[async_trait]
impl ActivityBehavior for CaseTaskBehavior {
    fn transfers_variables(&self) -> bool {
        true
    }

    async fn perform_start(
        &self,
        ctx: &mut OperationContext<'_>,
        execution_id: &str,
    ) -> Result<()> {
        let activity = ctx.execution(execution_id)?.activity()?;
        let case_ref = activity.case_ref.clone().ok_or_else(|| {
            EngineError::CaseDefinitionNotFound {
                lookup: format!("case task '{}' without case_ref", activity.id),
            }
        })?;

        let cache = ctx.cache().clone();
        let definition = cache.find_latest_case_definition_by_key(&case_ref).await?;

        let sub_case_id = ctx.create_sub_case_instance(execution_id, definition)?;
        self.transfer_variables(ctx, execution_id, &sub_case_id)?;

        debug!(
            execution_id,
            sub_case_id = %sub_case_id,
            case_ref = %case_ref,
            "case task spawned sub case instance"
        );
        ctx.enqueue(Op::CaseInstanceCreate, &sub_case_id);
        Ok(())
    }

    /// Variables visible at the source flow into the target's case
    /// instance root, where they survive the completion of intermediate
    /// executions.
    fn transfer_variables(
        &self,
        ctx: &mut OperationContext<'_>,
        source_execution_id: &str,
        target_execution_id: &str,
    ) -> Result<()> {
        let variables = ctx.visible_variables(source_execution_id)?;
        let target_root = ctx
            .execution(target_execution_id)?
            .case_instance_id()
            .to_string();
        let root = ctx.execution_mut(&target_root)?;
        for (name, value) in variables {
            root.set_variable(name, value);
        }
        Ok(())
    }
}
