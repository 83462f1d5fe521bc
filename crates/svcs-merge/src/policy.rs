//! Conflict policies
//!
//! A policy decides conflicts nobody resolved explicitly. `Manual` decides
//! nothing, so unresolved conflicts come back to the caller.

use crate::conflict::{ConflictRecord, ResolutionChoice};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Automatic conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave every conflict for explicit resubmission
    #[default]
    Manual,
    /// Prefer the branch being merged into
    Ours,
    /// Prefer the branch being merged from
    Theirs,
}

impl ConflictPolicy {
    pub const ALL: [Self; 3] = [Self::Manual, Self::Ours, Self::Theirs];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ours => "ours",
            Self::Theirs => "theirs",
        }
    }

    /// Choice this policy makes for `record`, if any
    #[must_use]
    pub fn decide(self, record: &ConflictRecord) -> Option<ResolutionChoice> {
        let side = match self {
            Self::Manual => return None,
            Self::Ours => record.ours,
            Self::Theirs => record.theirs,
        };
        Some(side.map_or(ResolutionChoice::Clear, ResolutionChoice::Keep))
    }
}

impl Display for ConflictPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown policy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown conflict policy '{0}' (expected manual, ours or theirs)")]
pub struct UnknownPolicy(pub String);

impl FromStr for ConflictPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPolicy(s.to_owned()))
    }
}
