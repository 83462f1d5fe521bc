//! Conflict records and resolutions

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use svcs_chunk::{Chunk, ChunkId};
use svcs_index::Region;

/// Where a conflict stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    #[default]
    Unresolved,
    /// Settled by a [`ConflictPolicy`](crate::ConflictPolicy)
    AutoResolved,
    /// Settled by a submitted [`Resolution`]
    ManuallyResolved,
}

/// A region both sides changed to different occupants
///
/// `None` means the side left the region empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub region: Region,
    pub base: Option<ChunkId>,
    pub ours: Option<ChunkId>,
    pub theirs: Option<ChunkId>,
    #[serde(default)]
    pub state: ResolutionState,
}

impl ConflictRecord {
    /// Chunks a `Keep` resolution may pick for this region
    #[must_use]
    pub fn candidates(&self) -> Vec<ChunkId> {
        let mut out: Vec<ChunkId> = [self.ours, self.theirs, self.base]
            .into_iter()
            .flatten()
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state != ResolutionState::Unresolved
    }
}

impl Display for ConflictRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let side = |c: Option<ChunkId>| c.map_or_else(|| "-".to_owned(), |id| id.short());
        write!(
            f,
            "{}: ours={} theirs={} base={}",
            self.region,
            side(self.ours),
            side(self.theirs),
            side(self.base)
        )
    }
}

/// How one conflicted region should end up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "value", rename_all = "snake_case")]
pub enum ResolutionChoice {
    /// Keep one of the candidate chunks
    Keep(ChunkId),
    /// Replace the region with a newly authored chunk
    Author(Chunk),
    /// Leave the region empty
    Clear,
}

/// Resolution for one conflicted region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub region: Region,
    pub choice: ResolutionChoice,
}

impl Resolution {
    #[must_use]
    pub const fn new(region: Region, choice: ResolutionChoice) -> Self {
        Self { region, choice }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcs_chunk::{ContentHash, PayloadKind};
    use svcs_index::CellKey;

    fn id(n: u8) -> ChunkId {
        ChunkId::from_hash(ContentHash::compute(&[n]))
    }

    #[test]
    fn candidates_are_deduplicated() {
        let record = ConflictRecord {
            region: Region::new(PayloadKind::Semantic, CellKey::new(0, 0, 0)),
            base: Some(id(1)),
            ours: Some(id(2)),
            theirs: Some(id(1)),
            state: ResolutionState::Unresolved,
        };
        assert_eq!(record.candidates().len(), 2);
        assert!(!record.is_resolved());
    }

    #[test]
    fn clear_choice_serializes_without_value() {
        let json = serde_json::to_string(&ResolutionChoice::Clear).unwrap();
        assert_eq!(json, r#"{"choice":"clear"}"#);
    }
}
