//! Instance role decided by the exclusive claim.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of this process among all copies sharing an application handle.
///
/// Set once when the claim is acquired; a process never promotes itself
/// mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    /// Owns the claim and runs the dispatch listener.
    Primary,
    /// Another process owns the claim.
    Secondary,
    /// No claim has been attempted (engine not loaded).
    #[default]
    Unclaimed,
}

impl InstanceRole {
    /// Returns true for [`InstanceRole::Primary`].
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Returns true for [`InstanceRole::Secondary`].
    #[must_use]
    pub fn is_secondary(self) -> bool {
        matches!(self, Self::Secondary)
    }
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Unclaimed => "unclaimed",
        };
        f.write_str(label)
    }
}
