use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::UploadSettings;
use crate::error::TransferError;
use crate::event::{Direction, Outcome, WorkerEvent};
use crate::metrics::{to_mib, RateWindow};
use crate::transport::{ChunkBuffer, UploadTarget};
use crate::worker::{TransferSession, WorkerHandle, WorkerState};

/// POSTs random chunks to the sink until the byte target is reached or it is stopped.
pub struct UploadWorker {
    target: Arc<dyn UploadTarget>,
    settings: UploadSettings,
    clock: Arc<dyn Clock>,
    events: Sender<WorkerEvent>,
    handle: WorkerHandle,
}

impl UploadWorker {
    pub fn new(target: Arc<dyn UploadTarget>, settings: UploadSettings, events: Sender<WorkerEvent>) -> Self {
        Self::with_clock(target, settings, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        target: Arc<dyn UploadTarget>,
        settings: UploadSettings,
        events: Sender<WorkerEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target,
            settings,
            clock,
            events,
            handle: WorkerHandle::new("upload"),
        }
    }

    pub fn start(&mut self) -> Result<(), TransferError> {
        let target = Arc::clone(&self.target);
        let settings = self.settings.clone();
        let clock = Arc::clone(&self.clock);
        let events = self.events.clone();
        self.handle.start(move |stop| {
            run_upload(target.as_ref(), &settings, clock.as_ref(), &stop, &events);
        })
    }

    pub fn stop(&mut self) {
        self.handle.stop();
    }

    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }
}

pub(crate) fn run_upload(
    target: &dyn UploadTarget,
    settings: &UploadSettings,
    clock: &dyn Clock,
    stop: &AtomicBool,
    events: &Sender<WorkerEvent>,
) -> Outcome {
    let mut session = TransferSession::new(Direction::Upload, stop, events);
    // Cumulative for the whole run, retries included.
    let mut window = RateWindow::new(clock.now(), settings.report_interval);
    let mut first_chunk = true;
    let mut retries: u32 = 0;
    let mut chunks_sent: u64 = 0;

    let outcome = loop {
        if !session.running() {
            break Outcome::CancelledByUser;
        }
        if window.bytes() >= settings.total_target {
            break Outcome::TargetReached;
        }

        let chunk = ChunkBuffer::random(settings.chunk_size);
        let len = chunk.len() as u64;
        debug!(chunk = chunks_sent + 1, bytes = len, "Sending chunk");

        match target.send(chunk) {
            Ok(()) => first_chunk = false,
            // Only the first chunk is retried: the sink may still be coming up.
            Err(e) if first_chunk && retries < settings.first_chunk_retries => {
                retries += 1;
                warn!(
                    %e,
                    attempt = retries + 1,
                    max_attempts = settings.first_chunk_retries + 1,
                    "First chunk failed, retrying"
                );
                clock.sleep(settings.retry_backoff);
                continue;
            }
            Err(e) if first_chunk => {
                error!(%e, attempts = retries + 1, "Upload sink not reachable");
                break Outcome::Failed(TransferError::SinkUnreachable {
                    attempts: retries + 1,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                error!(%e, chunk = chunks_sent + 1, "Upload chunk failed");
                break Outcome::Failed(e);
            }
        }

        chunks_sent += 1;
        window.record(len);
        session.add(len);
        if let Some(rate) = window.poll(clock.now()) {
            debug!(uploaded_mb = to_mib(session.total_bytes()), mbps = rate.mbps, "Upload progress");
            session.emit_rate(rate);
        }
        clock.sleep(settings.pacing);
    };

    if !matches!(outcome, Outcome::Failed(_)) {
        session.emit_complete();
        info!(chunks = chunks_sent, total_mb = to_mib(session.total_bytes()), "Upload finished or stopped");
    }
    session.finish(outcome)
}
