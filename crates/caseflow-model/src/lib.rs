// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model document types for caseflow definitions.
//!
//! This crate defines the serde-typed JSON documents that back deployed
//! definitions:
//! - [`CaseModel`]: a case plan model with its tree of plan items
//! - [`ProcessModel`] / [`DecisionModel`]: process and decision documents
//! - [`ModelDocument`]: the kind-tagged wrapper cached by the engine
//!
//! The engine never parses XML; model resources are JSON documents and this
//! crate is their single source of truth. Parsing failures are reported as
//! [`ModelError`] and carry enough context for the engine to attribute them
//! to the owning definition.

use serde::{Deserialize, Serialize};

pub mod case;
pub mod document;

pub use case::{CaseModel, CasePlanModel, PlanItem, PlanItemType};
pub use document::{DecisionModel, ModelDocument, ProcessModel};

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing or validating a model document.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The raw resource bytes are not a well-formed document of the
    /// expected shape.
    #[error("malformed model document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document parsed but violates a structural rule.
    #[error("invalid model document: {0}")]
    Invalid(String),
}

// ============================================================================
// Parsing functions
// ============================================================================

/// Parse and validate a case model from raw resource bytes.
pub fn parse_case_model(bytes: &[u8]) -> Result<CaseModel, ModelError> {
    let model: CaseModel = serde_json::from_slice(bytes)?;
    model.validate()?;
    Ok(model)
}

/// Parse a process model from raw resource bytes.
pub fn parse_process_model(bytes: &[u8]) -> Result<ProcessModel, ModelError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Parse a decision model from raw resource bytes.
pub fn parse_decision_model(bytes: &[u8]) -> Result<DecisionModel, ModelError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Metadata about a plan item type, used for diagnostics and tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItemTypeInfo {
    /// The serialized type tag (e.g. `humanTask`).
    #[serde(rename = "type")]
    pub item_type: String,
    /// Whether instances of this type contain child plan items.
    pub composite: bool,
    /// Short human-readable description.
    pub description: String,
}

/// Metadata for all plan item types supported by the case model.
pub fn plan_item_types() -> Vec<PlanItemTypeInfo> {
    vec![
        PlanItemTypeInfo {
            item_type: "stage".to_string(),
            composite: true,
            description: "Grouping of plan items with shared completion rules".to_string(),
        },
        PlanItemTypeInfo {
            item_type: "humanTask".to_string(),
            composite: false,
            description: "Wait state completed by a human".to_string(),
        },
        PlanItemTypeInfo {
            item_type: "milestone".to_string(),
            composite: false,
            description: "Achievable marker that occurs rather than executes".to_string(),
        },
        PlanItemTypeInfo {
            item_type: "caseTask".to_string(),
            composite: false,
            description: "Launches a sub case instance and waits for it".to_string(),
        },
    ]
}
