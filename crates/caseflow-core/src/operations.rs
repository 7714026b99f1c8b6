// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atomic operations: the closed catalog of state transitions.
//!
//! Every transition follows the same four-phase template:
//!
//! 1. `event_notifications_started`: behavior guard + state set (plus, for
//!    the complete family, removal of the execution and cleanup of still
//!    waiting children — before any notification fires)
//! 2. `repetition`: repeatable activities re-instantiate a sibling
//! 3. `pre` → `perform` → `post` transition notifications; `perform` is the
//!    fixed notify-parent-by-event-name step
//! 4. a handful of operations override the template entirely: create
//!    operations hand straight over to the behavior, the transitional sweep
//!    operations delegate to the composite sweep hooks, and
//!    `ActivityExecute`/`DeleteCascade` are not transitions at all
//!
//! Operations never run re-entrantly; everything an operation triggers is
//! enqueued on the [`crate::runner::OperationContext`] and executed strictly
//! in order.

use std::sync::Arc;

use tracing::debug;

use crate::definitions::{Activity, ActivityType, CaseDefinition};
use crate::error::{EngineError, Result};
use crate::execution::CaseExecutionState;
use crate::runner::OperationContext;

// ============================================================================
// Catalog
// ============================================================================

/// The closed catalog of atomic operations.
///
/// Only [`AtomicOperation::ActivityExecute`] may report itself asynchronous;
/// every other operation always completes synchronously within its unit of
/// work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOperation {
    /// Create a case instance root: `NEW → ACTIVE`.
    CaseInstanceCreate,
    /// Create a child execution: `NEW → AVAILABLE`.
    CaseExecutionCreate,
    /// `AVAILABLE → ENABLED` for manually activated items.
    CaseExecutionEnable,
    /// `ENABLED → DISABLED` by user decision.
    CaseExecutionDisable,
    /// `DISABLED → ENABLED`.
    CaseExecutionReenable,
    /// `ENABLED → ACTIVE` by user decision.
    CaseExecutionManualStart,
    /// `AVAILABLE → ACTIVE`.
    CaseExecutionStart,
    /// `FAILED → ACTIVE` (roots also from other settled states).
    CaseExecutionReactivate,
    /// `ACTIVE → FAILED`.
    CaseExecutionFault,
    /// `ACTIVE → COMPLETED`, removing the execution.
    CaseExecutionComplete,
    /// `ACTIVE → COMPLETED` by user decision (relaxed completion rule).
    CaseExecutionManualComplete,
    /// `AVAILABLE → COMPLETED` for milestones.
    CaseExecutionOccur,
    /// Begin a self-initiated termination sweep.
    CaseExecutionTerminatingOnTermination,
    /// Begin a termination sweep caused by the parent's termination.
    CaseExecutionTerminatingOnParentTermination,
    /// Begin a termination sweep caused by an exit.
    CaseExecutionTerminatingOnExit,
    /// Commit a self-initiated termination: `→ TERMINATED`.
    CaseExecutionTerminate,
    /// Commit a parent-caused termination: `→ TERMINATED`, no upward
    /// notification.
    CaseExecutionParentTerminate,
    /// Commit an exit: `→ TERMINATED`.
    CaseExecutionExit,
    /// Simplified terminal path for children of a completing parent:
    /// `→ TERMINATED`, removed, no notification at all.
    CaseExecutionParentComplete,
    /// Begin a self-initiated suspension sweep.
    CaseExecutionSuspendingOnSuspension,
    /// Begin a suspension sweep caused by the parent's suspension.
    CaseExecutionSuspendingOnParentSuspension,
    /// Commit a self-initiated suspension: `→ SUSPENDED`.
    CaseExecutionSuspend,
    /// Commit a parent-caused suspension: `→ SUSPENDED`, no upward
    /// notification.
    CaseExecutionParentSuspend,
    /// `SUSPENDED → ACTIVE` (milestones back to `AVAILABLE`).
    CaseExecutionResume,
    /// `SUSPENDED →` previous state, when the parent resumes.
    CaseExecutionParentResume,
    /// `→ CLOSED` on the case instance root; cascades deletion afterwards.
    CaseInstanceClose,
    /// Remove an execution subtree from the arena.
    CaseExecutionDeleteCascade,
    /// Execute the activity behavior; the only operation that may suspend
    /// at the async boundary.
    ActivityExecute,
}

impl AtomicOperation {
    /// The transition event name, used for parent notification dispatch and
    /// error context.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::CaseInstanceCreate => "create",
            Self::CaseExecutionCreate => "create",
            Self::CaseExecutionEnable => "enable",
            Self::CaseExecutionDisable => "disable",
            Self::CaseExecutionReenable => "reenable",
            Self::CaseExecutionManualStart => "manualStart",
            Self::CaseExecutionStart => "start",
            Self::CaseExecutionReactivate => "reactivate",
            Self::CaseExecutionFault => "fault",
            Self::CaseExecutionComplete => "complete",
            Self::CaseExecutionManualComplete => "manualComplete",
            Self::CaseExecutionOccur => "occur",
            Self::CaseExecutionTerminatingOnTermination => "terminate",
            Self::CaseExecutionTerminatingOnParentTermination => "parentTerminate",
            Self::CaseExecutionTerminatingOnExit => "exit",
            Self::CaseExecutionTerminate => "terminate",
            Self::CaseExecutionParentTerminate => "parentTerminate",
            Self::CaseExecutionExit => "exit",
            Self::CaseExecutionParentComplete => "parentComplete",
            Self::CaseExecutionSuspendingOnSuspension => "suspend",
            Self::CaseExecutionSuspendingOnParentSuspension => "parentSuspend",
            Self::CaseExecutionSuspend => "suspend",
            Self::CaseExecutionParentSuspend => "parentSuspend",
            Self::CaseExecutionResume => "resume",
            Self::CaseExecutionParentResume => "parentResume",
            Self::CaseInstanceClose => "close",
            Self::CaseExecutionDeleteCascade => "deleteCascade",
            Self::ActivityExecute => "executeActivity",
        }
    }

    /// Whether executing this operation on the given execution crosses the
    /// async boundary.
    pub(crate) fn is_async(self, execution: &crate::execution::CaseExecution) -> Result<bool> {
        if self != Self::ActivityExecute {
            return Ok(false);
        }
        Ok(execution.activity()?.asynchronous)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Immutable facts about an execution, captured before a transition runs.
///
/// Notifications and repetition receive the snapshot because the execution
/// itself may already have been removed from the arena (complete and
/// terminate remove the node inside phase one).
#[derive(Clone)]
pub struct ExecutionSnapshot {
    /// The execution id.
    pub execution_id: String,
    /// The activity the execution instantiates.
    pub activity: Arc<Activity>,
    /// Parent execution id, `None` on case instance roots.
    pub parent_id: Option<String>,
    /// Owning case instance id.
    pub case_instance_id: String,
    /// The deployed definition.
    pub definition: Arc<CaseDefinition>,
    /// Super execution spawning this case instance, if any.
    pub super_execution_id: Option<String>,
}

fn snapshot_of(ctx: &OperationContext<'_>, execution_id: &str) -> Result<ExecutionSnapshot> {
    let execution = ctx.execution(execution_id)?;
    let activity = execution.activity()?;
    Ok(ExecutionSnapshot {
        execution_id: execution_id.to_string(),
        activity,
        parent_id: execution.parent_id().map(str::to_string),
        case_instance_id: execution.case_instance_id().to_string(),
        definition: execution.definition().clone(),
        super_execution_id: execution.super_execution_id().map(str::to_string),
    })
}

// ============================================================================
// Entry point
// ============================================================================

/// Execute one atomic operation against its target execution.
pub(crate) async fn execute(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    execution_id: &str,
) -> Result<()> {
    debug!(
        execution_id,
        operation = operation.event_name(),
        "executing atomic operation"
    );
    match operation {
        AtomicOperation::ActivityExecute => execute_activity_behavior(ctx, execution_id).await,
        AtomicOperation::CaseExecutionDeleteCascade => {
            ctx.runtime.remove_subtree(execution_id);
            Ok(())
        }
        _ => run_transition(ctx, operation, execution_id),
    }
}

fn run_transition(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    execution_id: &str,
) -> Result<()> {
    let snapshot = snapshot_of(ctx, execution_id)?;

    // a parent that left ACTIVE stops triggering its created children
    if operation == AtomicOperation::CaseExecutionCreate
        && let Some(parent_id) = &snapshot.parent_id
        && !ctx.execution(parent_id)?.is_active()
    {
        debug!(execution_id, "parent no longer active, child lifecycle not triggered");
        return Ok(());
    }

    event_notifications_started(ctx, operation, &snapshot)?;
    event_notifications_completed(ctx, operation, &snapshot)
}

// ============================================================================
// Phase 1: behavior side effect + state set
// ============================================================================

use AtomicOperation as Op;
use CaseExecutionState as St;

fn event_notifications_started(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let id = snapshot.execution_id.as_str();
    let behavior = snapshot.activity.behavior(id)?;

    match operation {
        Op::CaseInstanceCreate => {
            require_state(ctx, id, operation, &[St::New])?;
            set_state(ctx, id, St::Active)
        }
        Op::CaseExecutionCreate => {
            require_state(ctx, id, operation, &[St::New])?;
            set_state(ctx, id, St::Available)
        }
        Op::CaseExecutionEnable => {
            require_controllable(snapshot, operation)?;
            require_state(ctx, id, operation, &[St::Available])?;
            behavior.on_enable(ctx, id)?;
            set_state(ctx, id, St::Enabled)
        }
        Op::CaseExecutionDisable => {
            require_controllable(snapshot, operation)?;
            require_state(ctx, id, operation, &[St::Enabled])?;
            behavior.on_disable(ctx, id)?;
            set_state(ctx, id, St::Disabled)
        }
        Op::CaseExecutionReenable => {
            require_controllable(snapshot, operation)?;
            require_state(ctx, id, operation, &[St::Disabled])?;
            behavior.on_reenable(ctx, id)?;
            set_state(ctx, id, St::Enabled)
        }
        Op::CaseExecutionManualStart => {
            require_controllable(snapshot, operation)?;
            require_state(ctx, id, operation, &[St::Enabled])?;
            set_state(ctx, id, St::Active)
        }
        Op::CaseExecutionStart => {
            require_state(ctx, id, operation, &[St::Available])?;
            set_state(ctx, id, St::Active)
        }
        Op::CaseExecutionReactivate => {
            if snapshot.parent_id.is_none() {
                require_state(
                    ctx,
                    id,
                    operation,
                    &[St::Completed, St::Suspended, St::Terminated, St::Failed],
                )?;
            } else {
                require_state(ctx, id, operation, &[St::Failed])?;
            }
            behavior.on_reactivation(ctx, id)?;
            set_state(ctx, id, St::Active)
        }
        Op::CaseExecutionFault => {
            require_state(ctx, id, operation, &[St::Active])?;
            set_state(ctx, id, St::Failed)
        }
        Op::CaseExecutionComplete => {
            behavior.on_completion(ctx, id)?;
            require_state(ctx, id, operation, &[St::Active])?;
            set_state(ctx, id, St::Completed)?;
            complete_cleanup(ctx, snapshot)
        }
        Op::CaseExecutionManualComplete => {
            require_controllable(snapshot, operation)?;
            behavior.on_manual_completion(ctx, id)?;
            require_state(ctx, id, operation, &[St::Active])?;
            set_state(ctx, id, St::Completed)?;
            complete_cleanup(ctx, snapshot)
        }
        Op::CaseExecutionOccur => {
            behavior.on_occur(ctx, id)?;
            require_state(ctx, id, operation, &[St::Available])?;
            set_state(ctx, id, St::Completed)?;
            complete_cleanup(ctx, snapshot)
        }
        Op::CaseExecutionParentComplete => perform_parent_complete(ctx, id),
        Op::CaseExecutionTerminatingOnTermination => {
            let allowed: &[St] = if snapshot.activity.activity_type == ActivityType::Milestone {
                &[St::Available]
            } else {
                &[St::Active]
            };
            require_state(ctx, id, operation, allowed)?;
            set_state(ctx, id, St::TerminatingOnTermination)
        }
        Op::CaseExecutionTerminatingOnParentTermination => {
            require_state(ctx, id, operation, &[St::Available, St::Suspended])?;
            set_state(ctx, id, St::TerminatingOnParentTermination)
        }
        Op::CaseExecutionTerminatingOnExit => {
            require_state(
                ctx,
                id,
                operation,
                &[
                    St::New,
                    St::Available,
                    St::Enabled,
                    St::Disabled,
                    St::Active,
                    St::Suspended,
                    St::Failed,
                ],
            )?;
            set_state(ctx, id, St::TerminatingOnExit)
        }
        Op::CaseExecutionTerminate => {
            require_state(ctx, id, operation, &[St::TerminatingOnTermination])?;
            set_state(ctx, id, St::Terminated)?;
            remove_unless_root(ctx, snapshot)
        }
        Op::CaseExecutionParentTerminate => {
            require_state(ctx, id, operation, &[St::TerminatingOnParentTermination])?;
            set_state(ctx, id, St::Terminated)?;
            remove_unless_root(ctx, snapshot)
        }
        Op::CaseExecutionExit => {
            require_state(ctx, id, operation, &[St::TerminatingOnExit])?;
            set_state(ctx, id, St::Terminated)?;
            remove_unless_root(ctx, snapshot)
        }
        Op::CaseExecutionSuspendingOnSuspension => {
            let allowed: &[St] = if snapshot.activity.activity_type == ActivityType::Milestone {
                &[St::Available]
            } else {
                &[St::Active]
            };
            require_state(ctx, id, operation, allowed)?;
            set_state(ctx, id, St::SuspendingOnSuspension)
        }
        Op::CaseExecutionSuspendingOnParentSuspension => {
            require_state(
                ctx,
                id,
                operation,
                &[St::Available, St::Enabled, St::Disabled, St::Active],
            )?;
            set_state(ctx, id, St::SuspendingOnParentSuspension)
        }
        Op::CaseExecutionSuspend => {
            require_state(ctx, id, operation, &[St::SuspendingOnSuspension])?;
            set_state(ctx, id, St::Suspended)
        }
        Op::CaseExecutionParentSuspend => {
            require_state(ctx, id, operation, &[St::SuspendingOnParentSuspension])?;
            set_state(ctx, id, St::Suspended)
        }
        Op::CaseExecutionResume => {
            require_state(ctx, id, operation, &[St::Suspended])?;
            let target = if snapshot.activity.activity_type == ActivityType::Milestone {
                St::Available
            } else {
                St::Active
            };
            set_state(ctx, id, target)
        }
        Op::CaseExecutionParentResume => {
            require_state(ctx, id, operation, &[St::Suspended])?;
            let previous = ctx.execution(id)?.previous_state();
            set_state(ctx, id, previous)
        }
        Op::CaseInstanceClose => {
            if snapshot.parent_id.is_some() {
                return Err(invalid_transition(ctx, id, operation));
            }
            require_state(
                ctx,
                id,
                operation,
                &[St::Completed, St::Suspended, St::Terminated, St::Failed],
            )?;
            wrap_callback(behavior.on_close(ctx, id), id, "close")?;
            set_state(ctx, id, St::Closed)
        }
        Op::CaseExecutionDeleteCascade | Op::ActivityExecute => unreachable!(
            "operation '{}' does not follow the transition template",
            operation.event_name()
        ),
    }
}

// ============================================================================
// Phase 2-4: repetition + notifications (default), or per-op overrides
// ============================================================================

fn event_notifications_completed(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let id = snapshot.execution_id.as_str();
    let behavior = snapshot.activity.behavior(id)?;

    match operation {
        // create operations skip straight to executing the behavior
        Op::CaseInstanceCreate => {
            ctx.enqueue(Op::ActivityExecute, id);
            Ok(())
        }
        // transitional sweep operations delegate to the behavior hooks
        Op::CaseExecutionTerminatingOnTermination => {
            wrap_callback(behavior.on_termination(ctx, id), id, "terminate")
        }
        Op::CaseExecutionTerminatingOnParentTermination => {
            wrap_callback(behavior.on_parent_termination(ctx, id), id, "parentTerminate")
        }
        Op::CaseExecutionTerminatingOnExit => {
            wrap_callback(behavior.on_exit(ctx, id), id, "exit")
        }
        Op::CaseExecutionSuspendingOnSuspension => behavior.on_suspension(ctx, id),
        Op::CaseExecutionSuspendingOnParentSuspension => behavior.on_parent_suspension(ctx, id),
        // the simplified terminal path performs no notification at all
        Op::CaseExecutionParentComplete => Ok(()),
        _ => {
            repetition(ctx, operation, snapshot)?;
            pre_transition_notification(ctx, operation, snapshot)?;
            perform_transition_notification(ctx, operation, snapshot)?;
            post_transition_notification(ctx, operation, snapshot)
        }
    }
}

/// Phase 2: repeatable activities re-instantiate a sibling.
fn repetition(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let repeats_on = matches!(
        operation,
        Op::CaseExecutionComplete
            | Op::CaseExecutionManualComplete
            | Op::CaseExecutionOccur
            | Op::CaseExecutionTerminate
            | Op::CaseExecutionExit
    );
    if !repeats_on || !snapshot.activity.repetition {
        return Ok(());
    }
    let behavior = snapshot.activity.behavior(&snapshot.execution_id)?;
    behavior.repeat(ctx, snapshot)
}

/// Phase 3a: transition-specific notifications running before the generic
/// parent notification.
fn pre_transition_notification(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    match operation {
        // disable informs the parent ahead of the generic dispatch so a
        // completing stage sees the settled child first
        Op::CaseExecutionDisable => notify_parent(ctx, snapshot, "disable"),
        _ => Ok(()),
    }
}

/// Phase 3b: the fixed notify-parent-of-transition step.
///
/// Parent-variant operations skip the upward notification: the sweeping
/// parent is already transitioning and only needs the bookkeeping performed
/// in the post phase. Self-initiated terminate/exit also stay silent while
/// the parent is mid-sweep.
fn perform_transition_notification(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    match operation {
        Op::CaseExecutionParentTerminate
        | Op::CaseExecutionParentSuspend
        | Op::CaseExecutionParentResume
        | Op::CaseExecutionDisable
        | Op::CaseInstanceClose => Ok(()),
        Op::CaseExecutionComplete | Op::CaseExecutionManualComplete => {
            if snapshot.parent_id.is_some() {
                notify_parent(ctx, snapshot, operation.event_name())
            } else {
                notify_super_execution(ctx, snapshot)
            }
        }
        Op::CaseExecutionTerminate | Op::CaseExecutionExit => {
            let Some(parent_id) = snapshot.parent_id.clone() else {
                return Ok(());
            };
            if ctx.execution(&parent_id)?.is_terminating() {
                Ok(())
            } else {
                notify_parent(ctx, snapshot, operation.event_name())
            }
        }
        Op::CaseExecutionSuspend => {
            let Some(parent_id) = snapshot.parent_id.clone() else {
                return Ok(());
            };
            if ctx.execution(&parent_id)?.is_suspending() {
                Ok(())
            } else {
                notify_parent(ctx, snapshot, "suspend")
            }
        }
        _ => notify_parent(ctx, snapshot, operation.event_name()),
    }
}

/// Phase 3c: transition-specific notifications running after the generic
/// parent notification.
fn post_transition_notification(
    ctx: &mut OperationContext<'_>,
    operation: AtomicOperation,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let id = snapshot.execution_id.as_str();

    match operation {
        Op::CaseExecutionCreate => {
            let behavior = snapshot.activity.behavior(id)?;
            behavior.created(ctx, id)
        }
        Op::CaseExecutionStart | Op::CaseExecutionManualStart | Op::CaseExecutionReactivate => {
            ctx.enqueue(Op::ActivityExecute, id);
            Ok(())
        }
        Op::CaseExecutionComplete | Op::CaseExecutionManualComplete => {
            if snapshot.parent_id.is_none() {
                // a completed case instance closes itself; listeners still
                // observe the COMPLETED state before the close transition
                ctx.enqueue(Op::CaseInstanceClose, id);
            }
            Ok(())
        }
        Op::CaseExecutionTerminate | Op::CaseExecutionParentTerminate | Op::CaseExecutionExit => {
            check_terminating_parent(ctx, snapshot)?;
            // a terminated child may have been the last thing blocking a
            // suspension sweep on the parent
            check_suspending_parent(ctx, snapshot)
        }
        Op::CaseExecutionParentSuspend => check_suspending_parent(ctx, snapshot),
        Op::CaseExecutionResume | Op::CaseExecutionParentResume => {
            let behavior = snapshot.activity.behavior(id)?;
            behavior.resumed(ctx, id)
        }
        Op::CaseInstanceClose => {
            // cascade deletion only after listeners saw the CLOSED state
            ctx.enqueue(Op::CaseExecutionDeleteCascade, id);
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Activity behavior execution (async boundary)
// ============================================================================

async fn execute_activity_behavior(
    ctx: &mut OperationContext<'_>,
    execution_id: &str,
) -> Result<()> {
    let execution = ctx.execution(execution_id)?;
    if !execution.is_active() {
        // the execution was terminated or suspended before the (possibly
        // deferred) behavior execution came around
        debug!(execution_id, state = %execution.state(), "skipping behavior execution");
        return Ok(());
    }
    let activity = execution.activity()?;
    let behavior = activity.behavior(execution_id)?;
    behavior.perform_start(ctx, execution_id).await
}

// ============================================================================
// Helpers
// ============================================================================

fn require_state(
    ctx: &OperationContext<'_>,
    execution_id: &str,
    operation: AtomicOperation,
    allowed: &[CaseExecutionState],
) -> Result<()> {
    let execution = ctx.execution(execution_id)?;
    if allowed.contains(&execution.state()) {
        Ok(())
    } else {
        Err(invalid_transition(ctx, execution_id, operation))
    }
}

fn invalid_transition(
    ctx: &OperationContext<'_>,
    execution_id: &str,
    operation: AtomicOperation,
) -> EngineError {
    let state = ctx
        .execution(execution_id)
        .map(|e| e.state().to_string())
        .unwrap_or_else(|_| "removed".to_string());
    EngineError::InvalidTransition {
        execution_id: execution_id.to_string(),
        state,
        transition: operation.event_name().to_string(),
    }
}

fn require_controllable(snapshot: &ExecutionSnapshot, operation: AtomicOperation) -> Result<()> {
    if snapshot.activity.activity_type.is_controllable() {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            execution_id: snapshot.execution_id.clone(),
            state: snapshot.activity.activity_type.to_string(),
            transition: operation.event_name().to_string(),
        })
    }
}

fn set_state(
    ctx: &mut OperationContext<'_>,
    execution_id: &str,
    state: CaseExecutionState,
) -> Result<()> {
    ctx.execution_mut(execution_id)?.set_current_state(state);
    Ok(())
}

fn wrap_callback(result: Result<()>, execution_id: &str, event: &str) -> Result<()> {
    result.map_err(|err| match err {
        already @ EngineError::BehaviorCallback { .. } => already,
        other => EngineError::BehaviorCallback {
            execution_id: execution_id.to_string(),
            event: event.to_string(),
            details: other.to_string(),
        },
    })
}

/// Remove still waiting children through the simplified parent-complete
/// path, then detach the completed execution itself (roots stay).
///
/// Runs inside phase one: the state is already `COMPLETED`, no notification
/// has fired yet.
fn complete_cleanup(ctx: &mut OperationContext<'_>, snapshot: &ExecutionSnapshot) -> Result<()> {
    for child_id in ctx.children(&snapshot.execution_id)? {
        let state = ctx.execution(&child_id)?.state();
        match state {
            St::Available | St::Enabled | St::Suspended => {
                perform_parent_complete(ctx, &child_id)?;
            }
            _ => ctx.runtime.remove_subtree(&child_id),
        }
    }
    if snapshot.parent_id.is_some() {
        ctx.runtime.remove(&snapshot.execution_id);
    }
    Ok(())
}

fn perform_parent_complete(ctx: &mut OperationContext<'_>, execution_id: &str) -> Result<()> {
    require_state(
        ctx,
        execution_id,
        Op::CaseExecutionParentComplete,
        &[St::Available, St::Enabled, St::Disabled, St::Suspended, St::Failed],
    )?;
    set_state(ctx, execution_id, St::Terminated)?;
    ctx.runtime.remove_subtree(execution_id);
    Ok(())
}

fn remove_unless_root(
    ctx: &mut OperationContext<'_>,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    if snapshot.parent_id.is_some() {
        ctx.runtime.remove_subtree(&snapshot.execution_id);
    }
    Ok(())
}

fn notify_parent(
    ctx: &mut OperationContext<'_>,
    snapshot: &ExecutionSnapshot,
    event: &str,
) -> Result<()> {
    let Some(parent_id) = snapshot.parent_id.clone() else {
        return Ok(());
    };
    let parent_activity = ctx.execution(&parent_id)?.activity()?;
    if !parent_activity.composite {
        return Ok(());
    }
    let behavior = parent_activity.behavior(&parent_id)?;
    behavior.handle_child_transition(ctx, &parent_id, snapshot, event)
}

/// A completed case instance notifies the super execution that spawned it:
/// variables transfer back and the spawning case task completes.
fn notify_super_execution(
    ctx: &mut OperationContext<'_>,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let Some(super_id) = snapshot.super_execution_id.clone() else {
        return Ok(());
    };
    let Some(super_execution) = ctx.runtime.try_get(&super_id) else {
        debug!(
            case_instance_id = %snapshot.case_instance_id,
            super_execution_id = %super_id,
            "super execution no longer present, completion not propagated"
        );
        return Ok(());
    };
    let super_activity = super_execution.activity()?;
    if super_activity.transfers_variables {
        let behavior = super_activity.behavior(&super_id)?;
        behavior.transfer_variables(ctx, &snapshot.execution_id, &super_id)?;
    }
    ctx.enqueue(Op::CaseExecutionComplete, &super_id);
    Ok(())
}

/// Sweep bookkeeping: once the last child of a terminating composite is
/// gone, the composite commits its own termination.
fn check_terminating_parent(
    ctx: &mut OperationContext<'_>,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let Some(parent_id) = snapshot.parent_id.clone() else {
        return Ok(());
    };
    let parent = ctx.execution(&parent_id)?;
    if !parent.is_terminating() || !parent.children().is_empty() {
        return Ok(());
    }
    let closing = match parent.state() {
        St::TerminatingOnTermination => Op::CaseExecutionTerminate,
        St::TerminatingOnParentTermination => Op::CaseExecutionParentTerminate,
        St::TerminatingOnExit => Op::CaseExecutionExit,
        _ => return Ok(()),
    };
    ctx.enqueue(closing, &parent_id);
    Ok(())
}

/// Sweep bookkeeping: once every child of a suspending composite is
/// suspended (or failed), the composite commits its own suspension.
fn check_suspending_parent(
    ctx: &mut OperationContext<'_>,
    snapshot: &ExecutionSnapshot,
) -> Result<()> {
    let Some(parent_id) = snapshot.parent_id.clone() else {
        return Ok(());
    };
    let parent = ctx.execution(&parent_id)?;
    if !parent.is_suspending() {
        return Ok(());
    }
    for child_id in parent.children() {
        let child_state = ctx.execution(child_id)?.state();
        if !matches!(child_state, St::Suspended | St::Failed | St::New) {
            return Ok(());
        }
    }
    let closing = match parent.state() {
        St::SuspendingOnSuspension => Op::CaseExecutionSuspend,
        St::SuspendingOnParentSuspension => Op::CaseExecutionParentSuspend,
        _ => return Ok(()),
    };
    ctx.enqueue(closing, &parent_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::deploy::cache::DeploymentCache;
    use crate::execution::RuntimeState;
    use crate::store::{DefinitionRecord, MemoryStore};

    #[test]
    fn test_event_names() {
        assert_eq!(AtomicOperation::CaseInstanceCreate.event_name(), "create");
        assert_eq!(
            AtomicOperation::CaseExecutionManualStart.event_name(),
            "manualStart"
        );
        assert_eq!(
            AtomicOperation::CaseExecutionTerminatingOnExit.event_name(),
            "exit"
        );
        assert_eq!(AtomicOperation::CaseInstanceClose.event_name(), "close");
    }

    fn definition() -> Arc<CaseDefinition> {
        let model = caseflow_model::parse_case_model(
            br#"{
                "key": "t",
                "plan_model": {"id": "planModel", "items": [
                    {"id": "task", "type": "humanTask"}
                ]}
            }"#,
        )
        .unwrap();
        let record = DefinitionRecord {
            id: "t:1:x".to_string(),
            key: "t".to_string(),
            version: 1,
            kind: crate::definitions::DefinitionKind::Case,
            deployment_id: "dep".to_string(),
            resource_name: "t.case.json".to_string(),
            suspended: false,
        };
        Arc::new(CaseDefinition::from_model(&record, &model))
    }

    fn test_cache() -> Arc<DeploymentCache> {
        Arc::new(DeploymentCache::new(
            Arc::new(MemoryStore::new()),
            &EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_create_without_activity_is_structural_failure() {
        let mut runtime = RuntimeState::new();
        let root = runtime.new_case_instance(definition(), None);
        runtime.get_mut(&root).unwrap().activity = None;

        let err = {
            let mut ctx = OperationContext::new(&mut runtime, test_cache());
            execute(&mut ctx, AtomicOperation::CaseInstanceCreate, &root)
                .await
                .unwrap_err()
        };

        assert_eq!(err.error_code(), "MISSING_ACTIVITY");
        assert!(err.to_string().contains(&root));
        // no state mutation took place
        assert_eq!(
            runtime.get(&root).unwrap().state(),
            CaseExecutionState::New
        );
    }

    #[tokio::test]
    async fn test_create_runs_case_to_wait_state() {
        let mut runtime = RuntimeState::new();
        let root = runtime.new_case_instance(definition(), None);

        {
            let mut ctx = OperationContext::new(&mut runtime, test_cache());
            ctx.run(AtomicOperation::CaseInstanceCreate, &root)
                .await
                .unwrap();
        }

        assert_eq!(
            runtime.get(&root).unwrap().state(),
            CaseExecutionState::Active
        );
        let task = runtime.find_by_activity(&root, "task").unwrap();
        assert_eq!(task.state(), CaseExecutionState::Active);
    }

    #[tokio::test]
    async fn test_enable_rejected_for_active_execution() {
        let mut runtime = RuntimeState::new();
        let root = runtime.new_case_instance(definition(), None);

        let err = {
            let mut ctx = OperationContext::new(&mut runtime, test_cache());
            ctx.run(AtomicOperation::CaseInstanceCreate, &root)
                .await
                .unwrap();
            let task_id = ctx.runtime.find_by_activity(&root, "task").unwrap().id().to_string();
            ctx.run(AtomicOperation::CaseExecutionEnable, &task_id)
                .await
                .unwrap_err()
        };

        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("enable"));
    }
}
