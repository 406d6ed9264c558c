//! Backend status vocabulary
//!
//! The backend reports states as free-form strings whose spelling may change
//! independently of this runner, so the mapping to a closed classification is
//! configuration rather than a hardcoded match.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Closed classification of an open set of backend states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    Failure,
    InProgress,
}

/// Configurable mapping from backend states to [`StatusClass`]
///
/// Matching is case-insensitive on trimmed values. A state listed in both
/// sets is treated as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMap {
    success: BTreeSet<String>,
    failure: BTreeSet<String>,
}

fn normalize(state: &str) -> String {
    state.trim().to_ascii_uppercase()
}

impl StatusMap {
    pub fn new<S, F>(success: S, failure: F) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        Self {
            success: success.into_iter().map(|s| normalize(s.as_ref())).collect(),
            failure: failure.into_iter().map(|s| normalize(s.as_ref())).collect(),
        }
    }

    pub fn classify(&self, state: &str) -> StatusClass {
        let state = normalize(state);
        if self.failure.contains(&state) {
            StatusClass::Failure
        } else if self.success.contains(&state) {
            StatusClass::Success
        } else {
            StatusClass::InProgress
        }
    }

    pub fn success_states(&self) -> impl Iterator<Item = &str> {
        self.success.iter().map(String::as_str)
    }

    pub fn failure_states(&self) -> impl Iterator<Item = &str> {
        self.failure.iter().map(String::as_str)
    }
}

impl Default for StatusMap {
    fn default() -> Self {
        Self::new(
            ["COMPLETE", "COMPLETED", "SUCCESS"],
            ["FAILED", "ERROR", "CANCELLED"],
        )
    }
}
