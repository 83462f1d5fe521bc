//! Typed chunk payloads
//!
//! A chunk carries exactly one [`ChunkPayload`]. The set of payload kinds is
//! closed: indexing, merging and reporting all match on it exhaustively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Payload kind, which doubles as the spatial index layer
///
/// Chunks of different kinds never displace each other in the index: an audio
/// note dropped on a table does not erase the table's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Mesh or point-cloud geometry
    Geometry,
    /// Vision-derived semantic labels
    Semantic,
    /// Audio-derived annotations
    Audio,
    /// Agent-issued edits
    Agent,
}

impl PayloadKind {
    /// Every kind, in index order
    pub const ALL: [Self; 4] = [Self::Geometry, Self::Semantic, Self::Audio, Self::Agent];

    /// Stable type tag mixed into chunk identifiers
    #[must_use]
    pub const fn type_tag(self) -> &'static str {
        match self {
            Self::Geometry => "svcs.geometry.v1",
            Self::Semantic => "svcs.semantic.v1",
            Self::Audio => "svcs.audio.v1",
            Self::Agent => "svcs.agent.v1",
        }
    }

    /// Short lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Semantic => "semantic",
            Self::Audio => "audio",
            Self::Agent => "agent",
        }
    }
}

impl Display for PayloadKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Mesh,
    PointCloud,
}

/// Opaque geometry blob produced by the capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: GeometryKind,
    /// Encoded vertex/point data, hex on the wire
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Semantic labels attached to a region by the vision channel
///
/// Labels map to a detector confidence in `[0, 1]`. The map is ordered so the
/// encoding (and hence the chunk id) is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticLabels {
    pub labels: BTreeMap<String, f32>,
    /// Detector tracking id, stable across frames of one session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

impl SemanticLabels {
    /// Label set with a single entry
    #[must_use]
    pub fn single(label: impl Into<String>, confidence: f32) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(label.into(), confidence);
        Self {
            labels,
            track_id: None,
        }
    }

    /// Most confident label
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.labels
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.as_str())
    }
}

/// Annotation derived from an audio stream (already transcribed upstream)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAnnotation {
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub start_ms: u64,
    pub duration_ms: u64,
}

/// Explicit edit command from an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEdit {
    /// Issuing agent
    pub agent: String,
    pub op: EditOp,
}

/// Edit operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    /// Remove every chunk of `layer` from the cells the edit covers
    Clear { layer: PayloadKind },
    /// Attach a free-text note to the region
    Annotate { note: String },
}

/// Chunk payload, one variant per channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ChunkPayload {
    Geometry(Geometry),
    Semantic(SemanticLabels),
    Audio(AudioAnnotation),
    AgentEdit(AgentEdit),
}

impl ChunkPayload {
    /// Payload kind / index layer
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::Geometry(_) => PayloadKind::Geometry,
            Self::Semantic(_) => PayloadKind::Semantic,
            Self::Audio(_) => PayloadKind::Audio,
            Self::AgentEdit(_) => PayloadKind::Agent,
        }
    }

    /// Human-readable terms describing the payload
    ///
    /// Used by label search and change reports.
    #[must_use]
    pub fn terms(&self) -> Vec<&str> {
        match self {
            Self::Geometry(g) => vec![match g.kind {
                GeometryKind::Mesh => "mesh",
                GeometryKind::PointCloud => "point_cloud",
            }],
            Self::Semantic(s) => s.labels.keys().map(String::as_str).collect(),
            Self::Audio(a) => vec![a.transcript.as_str()],
            Self::AgentEdit(e) => match &e.op {
                EditOp::Clear { layer } => vec![layer.as_str()],
                EditOp::Annotate { note } => vec![note.as_str()],
            },
        }
    }

    /// Check payload invariants
    ///
    /// # Errors
    /// Returns a description of the first violated invariant
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Geometry(g) if g.data.is_empty() => Err("geometry data is empty".into()),
            Self::Geometry(_) => Ok(()),
            Self::Semantic(s) => {
                if s.labels.is_empty() {
                    return Err("semantic chunk has no labels".into());
                }
                match s.labels.iter().find(|(_, c)| !(0.0..=1.0).contains(*c)) {
                    Some((label, c)) => Err(format!("confidence {c} for '{label}' outside [0, 1]")),
                    None => Ok(()),
                }
            }
            Self::Audio(a) if a.transcript.trim().is_empty() => {
                Err("audio annotation has no transcript".into())
            }
            Self::Audio(_) => Ok(()),
            Self::AgentEdit(e) => match &e.op {
                EditOp::Clear {
                    layer: PayloadKind::Agent,
                } => Err("agent edits cannot clear the agent layer".into()),
                EditOp::Annotate { note } if note.trim().is_empty() => {
                    Err("annotation note is empty".into())
                }
                _ => Ok(()),
            },
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
