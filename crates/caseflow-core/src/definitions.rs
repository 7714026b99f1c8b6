// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployed definition types.
//!
//! A [`DefinitionEntry`] is the cached, deployed form of a definition record.
//! Case definitions additionally carry a compiled activity tree whose nodes
//! ([`Activity`]) own their behavior objects and capability flags; executions
//! reference activities through weak handles, the definition keeps them
//! alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use caseflow_model::{CaseModel, PlanItem, PlanItemType};

use crate::behavior::{self, ActivityBehavior};
use crate::store::DefinitionRecord;

/// Kind of a deployable definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    /// Case definition.
    Case,
    /// Process definition.
    Process,
    /// Decision definition.
    Decision,
}

impl DefinitionKind {
    /// All definition kinds.
    pub const ALL: [DefinitionKind; 3] = [
        DefinitionKind::Case,
        DefinitionKind::Process,
        DefinitionKind::Decision,
    ];

    /// Determine the kind of a deployment resource by its name.
    pub fn from_resource_name(resource_name: &str) -> Option<DefinitionKind> {
        if resource_name.ends_with(".case.json") {
            Some(DefinitionKind::Case)
        } else if resource_name.ends_with(".proc.json") {
            Some(DefinitionKind::Process)
        } else if resource_name.ends_with(".dmn.json") {
            Some(DefinitionKind::Decision)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DefinitionKind::Case => "case",
            DefinitionKind::Process => "process",
            DefinitionKind::Decision => "decision",
        };
        f.write_str(name)
    }
}

/// A deployed definition entry, cached by the deployment cache.
///
/// Identity fields are immutable once cached; only the suspension flag may
/// be updated in place (reconciled from fresh store reads).
#[derive(Debug)]
pub struct DefinitionEntry {
    /// Unique definition id.
    pub id: String,
    /// Definition key, stable across versions.
    pub key: String,
    /// Version within the key.
    pub version: i32,
    /// Definition kind.
    pub kind: DefinitionKind,
    /// Owning deployment.
    pub deployment_id: String,
    /// Name of the backing model resource.
    pub resource_name: String,
    suspended: AtomicBool,
}

impl DefinitionEntry {
    /// Build an entry from a store record.
    pub fn from_record(record: &DefinitionRecord) -> Self {
        Self {
            id: record.id.clone(),
            key: record.key.clone(),
            version: record.version,
            kind: record.kind,
            deployment_id: record.deployment_id.clone(),
            resource_name: record.resource_name.clone(),
            suspended: AtomicBool::new(record.suspended),
        }
    }

    /// Whether the definition is currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Copy the modifiable fields of a fresh store read into this entry.
    pub fn reconcile(&self, fresh: &DefinitionRecord) {
        self.suspended.store(fresh.suspended, Ordering::Release);
    }
}

/// Cache-facing view shared by all deployed definition types.
pub trait CachedDefinition: Send + Sync + 'static {
    /// Unique definition id.
    fn definition_id(&self) -> &str;

    /// Owning deployment id.
    fn owning_deployment_id(&self) -> &str;

    /// Copy modifiable fields from a fresh store read.
    fn reconcile(&self, fresh: &DefinitionRecord);
}

impl CachedDefinition for DefinitionEntry {
    fn definition_id(&self) -> &str {
        &self.id
    }

    fn owning_deployment_id(&self) -> &str {
        &self.deployment_id
    }

    fn reconcile(&self, fresh: &DefinitionRecord) {
        DefinitionEntry::reconcile(self, fresh);
    }
}

/// Type of a compiled activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    /// The root plan fragment of a case.
    CasePlanModel,
    /// Composite grouping of plan items.
    Stage,
    /// Wait state completed by a human.
    HumanTask,
    /// Achievable marker that occurs.
    Milestone,
    /// Launches a sub case instance.
    CaseTask,
}

impl ActivityType {
    /// Whether instances of this type can be enabled, disabled and started
    /// manually.
    pub fn is_controllable(self) -> bool {
        matches!(
            self,
            ActivityType::Stage | ActivityType::HumanTask | ActivityType::CaseTask
        )
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActivityType::CasePlanModel => "casePlanModel",
            ActivityType::Stage => "stage",
            ActivityType::HumanTask => "humanTask",
            ActivityType::Milestone => "milestone",
            ActivityType::CaseTask => "caseTask",
        };
        f.write_str(name)
    }
}

/// A node of the compiled definition tree.
///
/// Behavior and capability flags are resolved once here, at definition-load
/// time; operations consult the flags instead of inspecting the behavior
/// object.
pub struct Activity {
    /// Activity id, unique within the definition.
    pub id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Activity type.
    pub activity_type: ActivityType,
    /// Whether this activity contains child plan items.
    pub composite: bool,
    /// Whether this activity transfers variables to and from a spawned
    /// instance.
    pub transfers_variables: bool,
    /// Manual-activation flag: instance waits `ENABLED` for a manual start.
    pub manual_activation: bool,
    /// Required flag: participates in auto-complete rules of the parent.
    pub required: bool,
    /// Repetition flag: completing/terminating an instance re-instantiates
    /// a sibling while the parent is active.
    pub repetition: bool,
    /// Async flag: the execute-activity-behavior step suspends into a job.
    pub asynchronous: bool,
    /// Auto-complete rule (stages): complete as soon as required children
    /// are settled.
    pub auto_complete: bool,
    /// Key of the case definition launched by a case task.
    pub case_ref: Option<String>,
    /// Child activities (composites only).
    pub children: Vec<Arc<Activity>>,
    behavior: Option<Arc<dyn ActivityBehavior>>,
}

impl Activity {
    /// The behavior attached to this activity.
    ///
    /// Fails with a structural error naming `execution_id` when the
    /// definition is corrupted and carries no behavior.
    pub fn behavior(
        &self,
        execution_id: &str,
    ) -> crate::error::Result<Arc<dyn ActivityBehavior>> {
        self.behavior
            .clone()
            .ok_or_else(|| crate::error::EngineError::MissingBehavior {
                execution_id: execution_id.to_string(),
                activity_id: self.id.clone(),
            })
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("activity_type", &self.activity_type)
            .field("composite", &self.composite)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A deployed, compiled case definition.
#[derive(Debug)]
pub struct CaseDefinition {
    entry: DefinitionEntry,
    name: Option<String>,
    plan_model: Arc<Activity>,
    activities: HashMap<String, Arc<Activity>>,
}

impl CaseDefinition {
    /// Compile a case definition from its store record and parsed model.
    pub fn from_model(record: &DefinitionRecord, model: &CaseModel) -> Self {
        let mut activities = HashMap::new();

        let children = model
            .plan_model
            .items
            .iter()
            .map(|item| compile_plan_item(item, &mut activities))
            .collect();

        let plan_model = Arc::new(Activity {
            id: model.plan_model.id.clone(),
            name: model.plan_model.name.clone(),
            activity_type: ActivityType::CasePlanModel,
            composite: true,
            transfers_variables: false,
            manual_activation: false,
            required: false,
            repetition: false,
            asynchronous: false,
            auto_complete: model.plan_model.auto_complete,
            case_ref: None,
            children,
            behavior: Some(behavior::behavior_for(ActivityType::CasePlanModel)),
        });
        activities.insert(plan_model.id.clone(), plan_model.clone());

        Self {
            entry: DefinitionEntry::from_record(record),
            name: model.name.clone(),
            plan_model,
            activities,
        }
    }

    /// The cached definition entry.
    pub fn entry(&self) -> &DefinitionEntry {
        &self.entry
    }

    /// Unique definition id.
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    /// Definition key.
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Definition version.
    pub fn version(&self) -> i32 {
        self.entry.version
    }

    /// Display name, if the model declared one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The root plan model activity.
    pub fn plan_model(&self) -> &Arc<Activity> {
        &self.plan_model
    }

    /// Look up any activity of the definition by id.
    pub fn activity_by_id(&self, id: &str) -> Option<&Arc<Activity>> {
        self.activities.get(id)
    }
}

impl CachedDefinition for CaseDefinition {
    fn definition_id(&self) -> &str {
        &self.entry.id
    }

    fn owning_deployment_id(&self) -> &str {
        &self.entry.deployment_id
    }

    fn reconcile(&self, fresh: &DefinitionRecord) {
        self.entry.reconcile(fresh);
    }
}

fn compile_plan_item(
    item: &PlanItem,
    activities: &mut HashMap<String, Arc<Activity>>,
) -> Arc<Activity> {
    let activity_type = match item.item_type {
        PlanItemType::Stage => ActivityType::Stage,
        PlanItemType::HumanTask => ActivityType::HumanTask,
        PlanItemType::Milestone => ActivityType::Milestone,
        PlanItemType::CaseTask => ActivityType::CaseTask,
    };

    let children = item
        .items
        .iter()
        .map(|child| compile_plan_item(child, activities))
        .collect();

    let behavior = behavior::behavior_for(activity_type);
    let activity = Arc::new(Activity {
        id: item.id.clone(),
        name: item.name.clone(),
        activity_type,
        composite: behavior.is_composite(),
        transfers_variables: behavior.transfers_variables(),
        manual_activation: item.manual_activation,
        required: item.required,
        repetition: item.repetition,
        asynchronous: item.asynchronous,
        auto_complete: item.auto_complete,
        case_ref: item.case_ref.clone(),
        children,
        behavior: Some(behavior),
    });
    activities.insert(activity.id.clone(), activity.clone());
    activity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: DefinitionKind) -> DefinitionRecord {
        DefinitionRecord {
            id: "loan:1:abc".to_string(),
            key: "loan".to_string(),
            version: 1,
            kind,
            deployment_id: "dep-1".to_string(),
            resource_name: "loan.case.json".to_string(),
            suspended: false,
        }
    }

    #[test]
    fn test_kind_from_resource_name() {
        assert_eq!(
            DefinitionKind::from_resource_name("loan.case.json"),
            Some(DefinitionKind::Case)
        );
        assert_eq!(
            DefinitionKind::from_resource_name("invoice.proc.json"),
            Some(DefinitionKind::Process)
        );
        assert_eq!(
            DefinitionKind::from_resource_name("risk.dmn.json"),
            Some(DefinitionKind::Decision)
        );
        assert_eq!(DefinitionKind::from_resource_name("README.md"), None);
    }

    #[test]
    fn test_entry_reconcile_updates_suspension_only() {
        let entry = DefinitionEntry::from_record(&record(DefinitionKind::Case));
        assert!(!entry.is_suspended());

        let mut fresh = record(DefinitionKind::Case);
        fresh.suspended = true;
        entry.reconcile(&fresh);
        assert!(entry.is_suspended());
        assert_eq!(entry.id, "loan:1:abc");
    }

    #[test]
    fn test_compile_indexes_all_activities() {
        let model = caseflow_model::parse_case_model(
            br#"{
                "key": "loan",
                "plan_model": {
                    "id": "casePlanModel",
                    "items": [
                        {"id": "review", "type": "stage", "items": [
                            {"id": "check", "type": "humanTask", "manual_activation": true}
                        ]},
                        {"id": "approved", "type": "milestone"}
                    ]
                }
            }"#,
        )
        .unwrap();

        let definition = CaseDefinition::from_model(&record(DefinitionKind::Case), &model);

        assert_eq!(definition.key(), "loan");
        assert_eq!(definition.plan_model().children.len(), 2);
        assert!(definition.plan_model().composite);

        let stage = definition.activity_by_id("review").unwrap();
        assert!(stage.composite);
        assert_eq!(stage.children.len(), 1);

        let task = definition.activity_by_id("check").unwrap();
        assert!(!task.composite);
        assert!(task.manual_activation);
        assert!(task.behavior("exec-1").is_ok());

        let milestone = definition.activity_by_id("approved").unwrap();
        assert_eq!(milestone.activity_type, ActivityType::Milestone);
    }
}
