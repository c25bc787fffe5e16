//! SLA tiers for one-off task execution
//!
//! Each tier carries a hard deadline. Classification is a pure function of the
//! serialized input size and the command length.

use super::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Payload size (bytes of serialized JSON) below which a task may be INSTANT
pub const INSTANT_MAX_PAYLOAD: usize = 100;
/// Command length below which a task may be INSTANT
pub const INSTANT_MAX_COMMAND: usize = 20;
/// Payload size below which a task may be FAST
pub const FAST_MAX_PAYLOAD: usize = 1_000;
/// Command length below which a task may be FAST
pub const FAST_MAX_COMMAND: usize = 100;
/// Payload size below which a task stays STANDARD
pub const STANDARD_MAX_PAYLOAD: usize = 50_000;

/// Latency tier a task executes under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// 100 ms deadline
    Instant,
    /// 500 ms deadline
    Fast,
    /// 5 s deadline
    #[default]
    Standard,
    /// 300 s deadline
    Background,
}

impl ExecutionMode {
    /// All tiers, fastest first
    pub const ALL: [ExecutionMode; 4] = [
        ExecutionMode::Instant,
        ExecutionMode::Fast,
        ExecutionMode::Standard,
        ExecutionMode::Background,
    ];

    /// Hard deadline enforced by the execution engine for this tier
    pub const fn deadline(self) -> Duration {
        match self {
            ExecutionMode::Instant => Duration::from_millis(100),
            ExecutionMode::Fast => Duration::from_millis(500),
            ExecutionMode::Standard => Duration::from_secs(5),
            ExecutionMode::Background => Duration::from_secs(300),
        }
    }

    /// Pick the tier for a payload of `payload_size` units and a command of
    /// `command_len` characters.
    pub fn classify(payload_size: usize, command_len: usize) -> Self {
        if payload_size < INSTANT_MAX_PAYLOAD && command_len < INSTANT_MAX_COMMAND {
            ExecutionMode::Instant
        } else if payload_size < FAST_MAX_PAYLOAD && command_len < FAST_MAX_COMMAND {
            ExecutionMode::Fast
        } else if payload_size < STANDARD_MAX_PAYLOAD {
            ExecutionMode::Standard
        } else {
            ExecutionMode::Background
        }
    }

    /// Classify a command together with its input payload
    pub fn for_input(command: &str, input: &Payload) -> Self {
        Self::classify(payload_size(input), command.chars().count())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Instant => "instant",
            ExecutionMode::Fast => "fast",
            ExecutionMode::Standard => "standard",
            ExecutionMode::Background => "background",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instant" => Ok(ExecutionMode::Instant),
            "fast" => Ok(ExecutionMode::Fast),
            "standard" => Ok(ExecutionMode::Standard),
            "background" => Ok(ExecutionMode::Background),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// Size of an input payload in units: the length of its compact JSON encoding
pub fn payload_size(input: &Payload) -> usize {
    serde_json::to_string(input).map(|s| s.len()).unwrap_or(0)
}
