// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of definitions cached per definition kind.
    pub definition_cache_capacity: usize,
    /// Maximum number of model documents cached per definition kind.
    pub model_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            definition_cache_capacity: 1000,
            model_cache_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CASEFLOW_DEFINITION_CACHE_CAPACITY`: definitions kept per kind
    ///   (default: 1000, 0 disables the bound)
    /// - `CASEFLOW_MODEL_CACHE_CAPACITY`: model documents kept per kind
    ///   (default: 1000, 0 disables the bound)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let definition_cache_capacity = match std::env::var("CASEFLOW_DEFINITION_CACHE_CAPACITY") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid(
                    "CASEFLOW_DEFINITION_CACHE_CAPACITY",
                    "must be a non-negative integer",
                )
            })?,
            Err(_) => defaults.definition_cache_capacity,
        };

        let model_cache_capacity = match std::env::var("CASEFLOW_MODEL_CACHE_CAPACITY") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid(
                    "CASEFLOW_MODEL_CACHE_CAPACITY",
                    "must be a non-negative integer",
                )
            })?,
            Err(_) => defaults.model_cache_capacity,
        };

        Ok(Self {
            definition_cache_capacity,
            model_cache_capacity,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
