//! Stream messages
//!
//! Probes publish on four logical channels. Every message names its session,
//! its position in the source stream and the region it covers.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use svcs_chunk::{Aabb, Chunk, ChunkError, ChunkPayload, PayloadKind};
use ulid::Ulid;

/// Ingestion session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Fresh, time-ordered identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Branch a conflicted session snapshot is parked on
    #[must_use]
    pub fn parking_branch(&self) -> String {
        format!("sessions/{}", self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Logical input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Geometry deltas
    Spatial,
    /// Semantic annotations
    Vision,
    /// Audio-derived annotations
    Audio,
    /// Explicit edit commands
    Agent,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::Spatial, Self::Vision, Self::Audio, Self::Agent];

    /// Payload kind this channel carries
    #[must_use]
    pub const fn payload_kind(self) -> PayloadKind {
        match self {
            Self::Spatial => PayloadKind::Geometry,
            Self::Vision => PayloadKind::Semantic,
            Self::Audio => PayloadKind::Audio,
            Self::Agent => PayloadKind::Agent,
        }
    }

    /// Channel a payload kind arrives on
    #[must_use]
    pub const fn for_kind(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Geometry => Self::Spatial,
            PayloadKind::Semantic => Self::Vision,
            PayloadKind::Audio => Self::Audio,
            PayloadKind::Agent => Self::Agent,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spatial => "spatial",
            Self::Vision => "vision",
            Self::Audio => "audio",
            Self::Agent => "agent",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on a capture stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub session: SessionId,
    pub channel: Channel,
    /// Position in the source stream
    pub seq: u64,
    pub bounds: Aabb,
    pub payload: ChunkPayload,
}

impl StreamMessage {
    /// Message on the channel matching `payload`
    #[must_use]
    pub fn new(session: SessionId, seq: u64, bounds: Aabb, payload: ChunkPayload) -> Self {
        Self {
            session,
            channel: Channel::for_kind(payload.kind()),
            seq,
            bounds,
            payload,
        }
    }

    /// Whether the payload belongs on the message's channel
    #[must_use]
    pub fn channel_matches(&self) -> bool {
        self.channel.payload_kind() == self.payload.kind()
    }

    /// Build the chunk this message materializes into
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidPayload`] if the payload is malformed
    pub fn to_chunk(&self) -> Result<Chunk, ChunkError> {
        Chunk::new(self.bounds, self.payload.clone(), self.seq)
    }
}
