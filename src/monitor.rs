use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{self as channel, Receiver};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::download::DownloadWorker;
use crate::error::TransferError;
use crate::event::{Direction, Outcome, ProgressKind, WorkerEvent};
use crate::metrics::Rate;
use crate::transport::{DownloadSource, HttpDownloadSource, HttpUploadTarget, UploadTarget};
use crate::upload::UploadWorker;
use crate::worker::WorkerState;

#[derive(Clone, Debug, PartialEq)]
pub enum DirectionState {
    Idle,
    Running,
    Finished,
    Error(String),
}

/// What a consumer should display for one direction.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionStatus {
    pub state: DirectionState,
    pub rate: Option<Rate>,
    pub cumulative_mb: f64,
}

impl DirectionStatus {
    pub fn idle() -> Self {
        Self { state: DirectionState::Idle, rate: None, cumulative_mb: 0.0 }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, DirectionState::Finished | DirectionState::Error(_))
    }
}

/// Owns both workers and folds their events into per-direction status.
pub struct Monitor {
    download: Option<DownloadWorker>,
    upload: Option<UploadWorker>,
    events: Receiver<WorkerEvent>,
    download_status: DirectionStatus,
    upload_status: DirectionStatus,
}

impl Monitor {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        let source = match &config.download {
            Some(d) => Some(Arc::new(HttpDownloadSource::new(d)?) as Arc<dyn DownloadSource>),
            None => None,
        };
        let target = match &config.upload {
            Some(u) => Some(Arc::new(HttpUploadTarget::new(u)?) as Arc<dyn UploadTarget>),
            None => None,
        };
        Self::with_transports(config, source, target)
    }

    /// Directions without a transport are left disabled.
    pub fn with_transports(
        config: &MonitorConfig,
        source: Option<Arc<dyn DownloadSource>>,
        target: Option<Arc<dyn UploadTarget>>,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = channel::unbounded::<WorkerEvent>();
        let download = match (&config.download, source) {
            (Some(settings), Some(source)) => Some(DownloadWorker::new(source, settings.clone(), tx.clone())),
            _ => None,
        };
        let upload = match (&config.upload, target) {
            (Some(settings), Some(target)) => Some(UploadWorker::new(target, settings.clone(), tx)),
            _ => None,
        };
        Ok(Self {
            download,
            upload,
            events: rx,
            download_status: DirectionStatus::idle(),
            upload_status: DirectionStatus::idle(),
        })
    }

    /// Starts both directions from the idle baseline. Refuses without touching
    /// either worker while any of them is still running.
    pub fn start(&mut self) -> Result<(), TransferError> {
        let download_running = self.download.as_ref().is_some_and(|w| w.state() == WorkerState::Running);
        let upload_running = self.upload.as_ref().is_some_and(|w| w.state() == WorkerState::Running);
        if download_running || upload_running {
            return Err(TransferError::AlreadyRunning);
        }

        // Join runs that ended on their own, then drop whatever they left queued.
        let stale = self.stop().len();
        if stale > 0 {
            debug!(stale, "Discarded events from previous run");
        }

        if let Some(w) = self.download.as_mut() {
            w.start()?;
            self.download_status = DirectionStatus { state: DirectionState::Running, ..DirectionStatus::idle() };
        }
        if let Some(w) = self.upload.as_mut() {
            if let Err(e) = w.start() {
                self.stop();
                return Err(e);
            }
            self.upload_status = DirectionStatus { state: DirectionState::Running, ..DirectionStatus::idle() };
        }
        info!(
            download = self.download.is_some(),
            upload = self.upload.is_some(),
            "Monitor started"
        );
        Ok(())
    }

    /// Stops and joins both workers, then resets both directions to idle.
    /// Events still queued from the finished run are returned, not applied.
    pub fn stop(&mut self) -> Vec<WorkerEvent> {
        if let Some(w) = self.download.as_mut() {
            w.stop();
        }
        if let Some(w) = self.upload.as_mut() {
            w.stop();
        }
        let stale: Vec<WorkerEvent> = self.events.try_iter().collect();
        self.download_status = DirectionStatus::idle();
        self.upload_status = DirectionStatus::idle();
        debug!(stale = stale.len(), "Monitor stopped");
        stale
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<WorkerEvent> {
        let ev = self.events.recv_timeout(timeout).ok()?;
        self.apply(&ev);
        Some(ev)
    }

    pub fn poll(&mut self) -> Vec<WorkerEvent> {
        let events: Vec<WorkerEvent> = self.events.try_iter().collect();
        for ev in &events {
            self.apply(ev);
        }
        events
    }

    pub fn status(&self, direction: Direction) -> &DirectionStatus {
        match direction {
            Direction::Download => &self.download_status,
            Direction::Upload => &self.upload_status,
        }
    }

    /// True once every enabled direction has finished or failed.
    pub fn is_finished(&self) -> bool {
        let download_done = self.download.is_none() || self.download_status.is_terminal();
        let upload_done = self.upload.is_none() || self.upload_status.is_terminal();
        download_done && upload_done
    }

    fn apply(&mut self, ev: &WorkerEvent) {
        let direction = ev.direction();
        let status = match direction {
            Direction::Download => &mut self.download_status,
            Direction::Upload => &mut self.upload_status,
        };
        match ev {
            WorkerEvent::Progress(p) => {
                status.cumulative_mb = p.cumulative_mb;
                match p.kind {
                    ProgressKind::Normal => status.rate = p.rate,
                    // download reopens right away, so a stale rate would mislead;
                    // upload keeps its last rate on screen after the run
                    ProgressKind::StreamComplete => {
                        if direction == Direction::Download {
                            status.rate = None;
                        }
                    }
                }
            }
            WorkerEvent::Restarted { restarts, .. } => {
                debug!(%direction, restarts, "Stream restarted");
            }
            WorkerEvent::Finished { outcome, .. } => match outcome {
                Outcome::CancelledByUser | Outcome::TargetReached => {
                    status.state = DirectionState::Finished;
                }
                Outcome::Failed(e) => {
                    status.state = DirectionState::Error(e.to_string());
                    status.rate = None;
                }
            },
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
