//! Continuous HTTP throughput measurement.
//!
//! A [`DownloadWorker`] streams a large resource over and over, an
//! [`UploadWorker`] POSTs random chunks to a [`SinkEndpoint`], and both push
//! [`WorkerEvent`]s down a channel for whoever drives them.

pub mod clock;
pub mod config;
pub mod download;
pub mod error;
pub mod event;
pub mod metrics;
pub mod monitor;
pub mod sink;
pub mod transport;
pub mod upload;
pub mod worker;

pub use config::{DownloadSettings, MonitorConfig, SinkConfig, UploadSettings};
pub use download::DownloadWorker;
pub use error::{TransferError, TransportKind};
pub use event::{Direction, Outcome, ProgressEvent, ProgressKind, WorkerEvent};
pub use metrics::{Rate, RateSampler};
pub use monitor::{DirectionState, DirectionStatus, Monitor};
pub use sink::SinkEndpoint;
pub use upload::UploadWorker;
