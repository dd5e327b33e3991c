use std::fmt;

use serde::Serialize;

use crate::error::TransferError;
use crate::metrics::{to_mib, Rate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Normal,
    StreamComplete,
}

/// Snapshot pushed by a worker. `rate` is `None` exactly for `StreamComplete`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub direction: Direction,
    pub kind: ProgressKind,
    pub rate: Option<Rate>,
    pub cumulative_mb: f64,
}

impl ProgressEvent {
    pub fn normal(direction: Direction, rate: Rate, total_bytes: u64) -> Self {
        Self {
            direction,
            kind: ProgressKind::Normal,
            rate: Some(rate),
            cumulative_mb: to_mib(total_bytes),
        }
    }

    pub fn stream_complete(direction: Direction, total_bytes: u64) -> Self {
        Self {
            direction,
            kind: ProgressKind::StreamComplete,
            rate: None,
            cumulative_mb: to_mib(total_bytes),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    CancelledByUser,
    TargetReached,
    Failed(TransferError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerEvent {
    Progress(ProgressEvent),
    /// Download stream exhausted and reopened; `restarts` counts reopenings this run.
    Restarted { direction: Direction, restarts: u64 },
    /// Last event of every run.
    Finished { direction: Direction, outcome: Outcome },
}

impl WorkerEvent {
    pub fn direction(&self) -> Direction {
        match self {
            WorkerEvent::Progress(p) => p.direction,
            WorkerEvent::Restarted { direction, .. } => *direction,
            WorkerEvent::Finished { direction, .. } => *direction,
        }
    }
}
