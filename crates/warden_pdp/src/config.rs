//! Decision point configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use warden_index::MatchingMode;

use crate::combining::CombiningAlgorithm;

/// Configuration of a policy decision point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdpConfig {
    /// How the individual policies' decisions combine
    #[serde(default)]
    pub combining_algorithm: CombiningAlgorithm,
    /// How predicate failures during index matching are treated
    #[serde(default)]
    pub matching_mode: MatchingMode,
    /// Environment variables visible to every evaluation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Json>,
}

impl PdpConfig {
    /// Default configuration: deny-overrides, best-effort matching
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the combining algorithm
    #[must_use]
    pub fn with_combining_algorithm(mut self, algorithm: CombiningAlgorithm) -> Self {
        self.combining_algorithm = algorithm;
        self
    }

    /// Set the matching mode
    #[must_use]
    pub fn with_matching_mode(mut self, mode: MatchingMode) -> Self {
        self.matching_mode = mode;
        self
    }

    /// Bind an environment variable
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Json) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}
