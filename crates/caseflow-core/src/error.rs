// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for caseflow-core.
//!
//! Provides a unified error type covering the engine's failure taxonomy:
//! not-found lookups, deployer contract violations, structural execution
//! faults, behavior callback failures and model parse errors.

use std::fmt;

use crate::definitions::DefinitionKind;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur during deployment, resolution and execution.
///
/// All variants carry the lookup key or execution id they relate to; none of
/// them is retried by the engine itself.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// No case definition matched the lookup.
    CaseDefinitionNotFound {
        /// Human-readable description of the lookup (id, key, version...).
        lookup: String,
    },

    /// No process definition matched the lookup.
    ProcessDefinitionNotFound {
        /// Human-readable description of the lookup.
        lookup: String,
    },

    /// No decision definition matched the lookup.
    DecisionDefinitionNotFound {
        /// Human-readable description of the lookup.
        lookup: String,
    },

    /// The deployment owning a definition no longer exists.
    DeploymentNotFound {
        /// The deployment id that was not found.
        deployment_id: String,
    },

    /// The deployer chain ran but did not populate the expected definition.
    ///
    /// This is a deployer contract violation, not a transient condition; the
    /// resolution attempt is abandoned.
    CacheConsistency {
        /// The definition id that is still absent after deployment.
        definition_id: String,
        /// The deployment that was re-deployed.
        deployment_id: String,
    },

    /// A case execution has no current activity.
    MissingActivity {
        /// The affected execution id.
        execution_id: String,
    },

    /// A case execution's activity carries no behavior.
    MissingBehavior {
        /// The affected execution id.
        execution_id: String,
        /// The activity id without behavior.
        activity_id: String,
    },

    /// A behavior callback failed during a lifecycle transition.
    BehaviorCallback {
        /// The affected execution id.
        execution_id: String,
        /// The lifecycle event during which the callback failed.
        event: String,
        /// The underlying failure.
        details: String,
    },

    /// A model resource failed to parse.
    ModelParse {
        /// The definition id owning the resource.
        definition_id: String,
        /// Parser error details.
        details: String,
    },

    /// A deployment resource could not be loaded.
    Resource {
        /// The owning deployment id.
        deployment_id: String,
        /// The missing or unreadable resource name.
        resource_name: String,
    },

    /// A state transition was requested that the state machine forbids.
    InvalidTransition {
        /// The affected execution id.
        execution_id: String,
        /// The current state of the execution.
        state: String,
        /// The transition that was attempted.
        transition: String,
    },

    /// No case execution matched the lookup.
    ExecutionNotFound {
        /// Human-readable description of the lookup.
        lookup: String,
    },

    /// No job matched the given id.
    JobNotFound {
        /// The job id that was not found.
        job_id: String,
    },

    /// The durable store reported a failure.
    Store {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CaseDefinitionNotFound { .. } => "CASE_DEFINITION_NOT_FOUND",
            Self::ProcessDefinitionNotFound { .. } => "PROCESS_DEFINITION_NOT_FOUND",
            Self::DecisionDefinitionNotFound { .. } => "DECISION_DEFINITION_NOT_FOUND",
            Self::DeploymentNotFound { .. } => "DEPLOYMENT_NOT_FOUND",
            Self::CacheConsistency { .. } => "CACHE_CONSISTENCY",
            Self::MissingActivity { .. } => "MISSING_ACTIVITY",
            Self::MissingBehavior { .. } => "MISSING_BEHAVIOR",
            Self::BehaviorCallback { .. } => "BEHAVIOR_CALLBACK",
            Self::ModelParse { .. } => "MODEL_PARSE",
            Self::Resource { .. } => "RESOURCE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::Store { .. } => "STORE",
        }
    }

    /// Build the kind-specific not-found error for a definition lookup.
    pub fn definition_not_found(kind: DefinitionKind, lookup: impl Into<String>) -> Self {
        let lookup = lookup.into();
        match kind {
            DefinitionKind::Case => Self::CaseDefinitionNotFound { lookup },
            DefinitionKind::Process => Self::ProcessDefinitionNotFound { lookup },
            DefinitionKind::Decision => Self::DecisionDefinitionNotFound { lookup },
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaseDefinitionNotFound { lookup } => {
                write!(f, "No case definition found for {}", lookup)
            }
            Self::ProcessDefinitionNotFound { lookup } => {
                write!(f, "No process definition found for {}", lookup)
            }
            Self::DecisionDefinitionNotFound { lookup } => {
                write!(f, "No decision definition found for {}", lookup)
            }
            Self::DeploymentNotFound { deployment_id } => {
                write!(f, "Deployment '{}' not found", deployment_id)
            }
            Self::CacheConsistency {
                definition_id,
                deployment_id,
            } => {
                write!(
                    f,
                    "Deployment '{}' was deployed but definition '{}' is still absent from the cache",
                    deployment_id, definition_id
                )
            }
            Self::MissingActivity { execution_id } => {
                write!(f, "Case execution '{}' has no current activity", execution_id)
            }
            Self::MissingBehavior {
                execution_id,
                activity_id,
            } => {
                write!(
                    f,
                    "Activity '{}' of case execution '{}' has no behavior",
                    activity_id, execution_id
                )
            }
            Self::BehaviorCallback {
                execution_id,
                event,
                details,
            } => {
                write!(
                    f,
                    "Behavior callback for event '{}' failed on case execution '{}': {}",
                    event, execution_id, details
                )
            }
            Self::ModelParse {
                definition_id,
                details,
            } => {
                write!(
                    f,
                    "Model document of definition '{}' failed to parse: {}",
                    definition_id, details
                )
            }
            Self::Resource {
                deployment_id,
                resource_name,
            } => {
                write!(
                    f,
                    "Resource '{}' of deployment '{}' could not be loaded",
                    resource_name, deployment_id
                )
            }
            Self::InvalidTransition {
                execution_id,
                state,
                transition,
            } => {
                write!(
                    f,
                    "Case execution '{}' in state '{}' cannot perform transition '{}'",
                    execution_id, state, transition
                )
            }
            Self::ExecutionNotFound { lookup } => {
                write!(f, "No case execution found for {}", lookup)
            }
            Self::JobNotFound { job_id } => {
                write!(f, "Job '{}' not found", job_id)
            }
            Self::Store { operation, details } => {
                write!(f, "Store error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<caseflow_model::ModelError> for EngineError {
    fn from(err: caseflow_model::ModelError) -> Self {
        EngineError::ModelParse {
            definition_id: String::new(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                EngineError::CaseDefinitionNotFound {
                    lookup: "id 'x'".to_string(),
                },
                "CASE_DEFINITION_NOT_FOUND",
            ),
            (
                EngineError::CacheConsistency {
                    definition_id: "d".to_string(),
                    deployment_id: "dep".to_string(),
                },
                "CACHE_CONSISTENCY",
            ),
            (
                EngineError::MissingActivity {
                    execution_id: "e".to_string(),
                },
                "MISSING_ACTIVITY",
            ),
            (
                EngineError::BehaviorCallback {
                    execution_id: "e".to_string(),
                    event: "terminate".to_string(),
                    details: "boom".to_string(),
                },
                "BEHAVIOR_CALLBACK",
            ),
            (
                EngineError::InvalidTransition {
                    execution_id: "e".to_string(),
                    state: "active".to_string(),
                    transition: "enable".to_string(),
                },
                "INVALID_TRANSITION",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_display_carries_lookup_keys() {
        let err = EngineError::CaseDefinitionNotFound {
            lookup: "key 'loan' version 3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No case definition found for key 'loan' version 3"
        );

        let err = EngineError::CacheConsistency {
            definition_id: "loan:1:abc".to_string(),
            deployment_id: "dep-1".to_string(),
        };
        assert!(err.to_string().contains("loan:1:abc"));
        assert!(err.to_string().contains("dep-1"));

        let err = EngineError::MissingActivity {
            execution_id: "exec-42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Case execution 'exec-42' has no current activity"
        );
    }

    #[test]
    fn test_definition_not_found_is_kind_specific() {
        let case = EngineError::definition_not_found(DefinitionKind::Case, "id 'a'");
        assert_eq!(case.error_code(), "CASE_DEFINITION_NOT_FOUND");

        let process = EngineError::definition_not_found(DefinitionKind::Process, "id 'a'");
        assert_eq!(process.error_code(), "PROCESS_DEFINITION_NOT_FOUND");

        let decision = EngineError::definition_not_found(DefinitionKind::Decision, "id 'a'");
        assert_eq!(decision.error_code(), "DECISION_DEFINITION_NOT_FOUND");
    }
}
