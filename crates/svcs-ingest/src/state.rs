//! Session lifecycle
//!
//! ```text
//! Opened ──► Receiving ──► Committed
//!   │            │
//!   │            └───────► Aborted
//!   ├──► Committed   (end with nothing received)
//!   └──► Aborted
//! ```

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// State of one ingestion session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opened,
    Receiving,
    Committed,
    Aborted,
}

impl SessionState {
    /// Whether no further transitions are possible
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Opened => "opened",
            Self::Receiving => "receiving",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SessionState) -> &'static [SessionState] {
    use SessionState::{Aborted, Committed, Opened, Receiving};
    match from {
        Opened => &[Receiving, Committed, Aborted],
        Receiving => &[Committed, Aborted],
        Committed | Aborted => &[],
    }
}

/// Check a single transition against the table
///
/// # Errors
/// Returns [`IngestError::IllegalTransition`] if `to` is not reachable from `from`
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), IngestError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IngestError::IllegalTransition { from, to })
    }
}
