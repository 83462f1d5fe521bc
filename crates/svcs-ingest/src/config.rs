use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// What an idle session does when its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleAction {
    /// Flush what was received
    #[default]
    Commit,
    /// Discard what was received
    Abort,
}

impl Display for IdleAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Abort => "abort",
        })
    }
}

impl FromStr for IdleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commit" => Ok(Self::Commit),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown idle action '{other}' (expected commit or abort)")),
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Silence after which a session is closed
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default)]
    pub idle_action: IdleAction,

    /// Per-session inbound queue depth
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Merge attempts when the branch keeps moving during a flush
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_max_commit_retries() -> u32 {
    3
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            idle_action: IdleAction::default(),
            channel_capacity: default_channel_capacity(),
            max_commit_retries: default_max_commit_retries(),
        }
    }
}

impl IngestConfig {
    #[inline]
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
