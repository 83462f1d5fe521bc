//! Pending message buffer
//!
//! Messages are kept keyed by source sequence so chunk construction follows
//! stream order regardless of arrival order.

use crate::error::IngestError;
use crate::message::StreamMessage;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};
use svcs_chunk::Chunk;

/// Result of buffering one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Buffered {
    Accepted,
    /// Identical message already buffered
    Duplicate,
}

#[derive(Debug, Default)]
pub(crate) struct SessionBuffer {
    pending: BTreeMap<u64, StreamMessage>,
}

impl SessionBuffer {
    pub(crate) fn insert(&mut self, message: StreamMessage) -> Result<Buffered, IngestError> {
        if !message.channel_matches() {
            return Err(IngestError::ChannelMismatch {
                seq: message.seq,
                channel: message.channel,
                kind: message.payload.kind(),
            });
        }
        message
            .payload
            .validate()
            .map_err(|reason| IngestError::InvalidMessage { seq: message.seq, reason })?;

        match self.pending.entry(message.seq) {
            Entry::Vacant(slot) => {
                slot.insert(message);
                Ok(Buffered::Accepted)
            }
            Entry::Occupied(existing) if *existing.get() == message => Ok(Buffered::Duplicate),
            Entry::Occupied(_) => Err(IngestError::ConflictingDuplicate { seq: message.seq }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Chunks in ascending sequence order
    pub(crate) fn into_chunks(self) -> Result<Vec<Chunk>, IngestError> {
        self.pending
            .into_values()
            .map(|m| {
                m.to_chunk()
                    .map_err(|e| IngestError::InvalidMessage { seq: m.seq, reason: e.to_string() })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Channel, SessionId};
    use svcs_chunk::{Aabb, ChunkPayload, Point3, SemanticLabels};

    fn msg(session: SessionId, seq: u64, label: &str) -> StreamMessage {
        StreamMessage::new(
            session,
            seq,
            Aabb::cube(Point3::new(0.5, 0.5, 0.5), 1.0).unwrap(),
            ChunkPayload::Semantic(SemanticLabels::single(label, 0.8)),
        )
    }

    #[test]
    fn out_of_order_messages_come_out_sorted() {
        let session = SessionId::new();
        let mut buffer = SessionBuffer::default();
        for seq in [3, 1, 2] {
            buffer.insert(msg(session, seq, "wall")).unwrap();
        }
        let seqs: Vec<_> = buffer.into_chunks().unwrap().iter().map(Chunk::seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn duplicates_are_idempotent_but_conflicts_rejected() {
        let session = SessionId::new();
        let mut buffer = SessionBuffer::default();
        assert_eq!(buffer.insert(msg(session, 1, "wall")).unwrap(), Buffered::Accepted);
        assert_eq!(buffer.insert(msg(session, 1, "wall")).unwrap(), Buffered::Duplicate);
        assert!(matches!(
            buffer.insert(msg(session, 1, "door")),
            Err(IngestError::ConflictingDuplicate { seq: 1 })
        ));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn wrong_channel_is_rejected() {
        let mut bad = msg(SessionId::new(), 1, "wall");
        bad.channel = Channel::Spatial;
        let mut buffer = SessionBuffer::default();
        assert!(matches!(buffer.insert(bad), Err(IngestError::ChannelMismatch { .. })));
        assert!(buffer.is_empty());
    }
}
