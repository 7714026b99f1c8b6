// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kind-tagged model documents cached next to deployed definitions.

use serde::{Deserialize, Serialize};

use crate::case::CaseModel;

/// A parsed process model document.
///
/// Process execution is handled by a separate engine; caseflow only deploys
/// and caches the document so that process definitions resolve like case
/// definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Definition key, stable across versions.
    pub key: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Remaining document body, kept verbatim.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// A parsed decision model document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionModel {
    /// Definition key, stable across versions.
    pub key: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Remaining document body, kept verbatim.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// A model document of any definition kind.
#[derive(Debug, Clone)]
pub enum ModelDocument {
    /// Case model.
    Case(CaseModel),
    /// Process model.
    Process(ProcessModel),
    /// Decision model.
    Decision(DecisionModel),
}

impl ModelDocument {
    /// Definition key of the wrapped document.
    pub fn key(&self) -> &str {
        match self {
            ModelDocument::Case(m) => &m.key,
            ModelDocument::Process(m) => &m.key,
            ModelDocument::Decision(m) => &m.key,
        }
    }

    /// The case model, if this is a case document.
    pub fn as_case(&self) -> Option<&CaseModel> {
        match self {
            ModelDocument::Case(m) => Some(m),
            _ => None,
        }
    }
}
