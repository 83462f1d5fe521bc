//! Spatial VCS ingestion pipeline
//!
//! Turns streamed probe captures into committed snapshots.
//!
//! # Core Concepts
//!
//! - **Session**: one capture run by one probe against one branch, driven by
//!   the state machine `Opened → Receiving → {Committed, Aborted}`
//! - **StreamMessage**: a payload on one of four channels (`spatial`,
//!   `vision`, `audio`, `agent`) with its source sequence number and region
//! - **Flush**: on `end` (or idle timeout) buffered messages become chunks in
//!   sequence order; the session snapshot is a child of the tip seen at open
//!   and is fast-forwarded or merged onto the branch's current tip
//! - **Parking**: a session whose merge conflicts is kept on
//!   `sessions/<id>` so nothing captured is lost
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_ingest::{IngestConfig, IngestPipeline, StreamMessage};
//!
//! let pipeline = IngestPipeline::new(graph, MergeEngine::new(graph.clone()), IngestConfig::default());
//! let session = pipeline.open("main", "probe-7")?;
//! pipeline.submit(StreamMessage::new(session.id, 1, bounds, payload)).await?;
//! let outcome = pipeline.end(session.id).await?;
//! println!("{} chunks at {}", outcome.chunks, outcome.tip);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod buffer;
mod config;
mod error;
mod message;
mod pipeline;
mod session;
mod state;

pub use buffer::Buffered;
pub use config::{IdleAction, IngestConfig};
pub use error::IngestError;
pub use message::{Channel, SessionId, StreamMessage};
pub use pipeline::IngestPipeline;
pub use session::{AbortReason, CommitMode, SessionEnd, SessionInfo, SessionOutcome, SessionReport};
pub use state::{allowed_transitions, validate_transition, SessionState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
