// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case model documents: the case plan model and its plan item tree.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// A parsed case model document.
///
/// The `key` identifies the case definition across versions; the engine
/// assigns version numbers and definition ids at deployment time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseModel {
    /// Definition key, stable across versions.
    pub key: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// The root plan fragment of the case.
    pub plan_model: CasePlanModel,
}

/// The root plan fragment; behaves like a stage with close semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasePlanModel {
    /// Activity id of the plan model inside the case.
    pub id: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// When true the plan model completes as soon as all required
    /// children are settled; otherwise all children must be settled.
    #[serde(default)]
    pub auto_complete: bool,
    /// Top-level plan items.
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

/// Kind of a plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanItemType {
    /// Composite grouping of further plan items.
    #[serde(rename = "stage")]
    Stage,
    /// Wait state completed by a human.
    #[serde(rename = "humanTask")]
    HumanTask,
    /// Achievable marker; occurs instead of executing.
    #[serde(rename = "milestone")]
    Milestone,
    /// Launches a sub case instance and waits for its completion.
    #[serde(rename = "caseTask")]
    CaseTask,
}

/// One plan item inside a stage or the plan model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    /// Activity id, unique within the case model.
    pub id: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Plan item kind.
    #[serde(rename = "type")]
    pub item_type: PlanItemType,
    /// When true the item becomes `ENABLED` on creation and waits for a
    /// manual start (or disable) instead of starting immediately.
    #[serde(default)]
    pub manual_activation: bool,
    /// Required items participate in auto-complete rules of their stage.
    #[serde(default)]
    pub required: bool,
    /// Repeatable items re-instantiate a sibling when an instance
    /// completes or terminates while the parent is still active.
    #[serde(default)]
    pub repetition: bool,
    /// Marks the execute-activity-behavior step as an async boundary.
    #[serde(default, rename = "async")]
    pub asynchronous: bool,
    /// Key of the case definition launched by a case task.
    #[serde(default)]
    pub case_ref: Option<String>,
    /// Child plan items (stages only).
    #[serde(default)]
    pub items: Vec<PlanItem>,
    /// Auto-complete rule for stages.
    #[serde(default)]
    pub auto_complete: bool,
}

impl CaseModel {
    /// Validate structural rules that serde cannot express.
    ///
    /// - activity ids must be unique within the document (plan model
    ///   included)
    /// - case tasks must carry a `case_ref`
    /// - only stages may contain child items
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.key.trim().is_empty() {
            return Err(ModelError::Invalid("case key must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        seen.insert(self.plan_model.id.as_str());

        let mut stack: Vec<&PlanItem> = self.plan_model.items.iter().collect();
        while let Some(item) = stack.pop() {
            if !seen.insert(item.id.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "duplicate plan item id '{}'",
                    item.id
                )));
            }

            if item.item_type == PlanItemType::CaseTask && item.case_ref.is_none() {
                return Err(ModelError::Invalid(format!(
                    "case task '{}' has no case_ref",
                    item.id
                )));
            }

            if item.item_type != PlanItemType::Stage && !item.items.is_empty() {
                return Err(ModelError::Invalid(format!(
                    "plan item '{}' of type {:?} must not contain child items",
                    item.id, item.item_type
                )));
            }

            stack.extend(item.items.iter());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, item_type: PlanItemType) -> PlanItem {
        PlanItem {
            id: id.to_string(),
            name: None,
            item_type,
            manual_activation: false,
            required: false,
            repetition: false,
            asynchronous: false,
            case_ref: None,
            items: Vec::new(),
            auto_complete: false,
        }
    }

    fn model(items: Vec<PlanItem>) -> CaseModel {
        CaseModel {
            key: "test".to_string(),
            name: None,
            plan_model: CasePlanModel {
                id: "casePlanModel".to_string(),
                name: None,
                auto_complete: false,
                items,
            },
        }
    }

    #[test]
    fn test_validate_accepts_nested_stages() {
        let mut stage = item("stage1", PlanItemType::Stage);
        stage.items.push(item("task1", PlanItemType::HumanTask));
        let m = model(vec![stage, item("milestone1", PlanItemType::Milestone)]);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let m = model(vec![
            item("task1", PlanItemType::HumanTask),
            item("task1", PlanItemType::HumanTask),
        ]);
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("task1"));
    }

    #[test]
    fn test_validate_rejects_case_task_without_ref() {
        let m = model(vec![item("sub", PlanItemType::CaseTask)]);
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("case_ref"));
    }

    #[test]
    fn test_validate_rejects_children_on_task() {
        let mut task = item("task1", PlanItemType::HumanTask);
        task.items.push(item("inner", PlanItemType::Milestone));
        let m = model(vec![task]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let mut m = model(Vec::new());
        m.key = "  ".to_string();
        assert!(m.validate().is_err());
    }
}
