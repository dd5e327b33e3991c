use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::event::{Direction, Outcome, ProgressEvent, WorkerEvent};
use crate::metrics::Rate;

/// Per-run state owned by the worker thread. Dropped when the run ends,
/// so the all-time counter starts from zero on the next `start`.
pub(crate) struct TransferSession<'a> {
    direction: Direction,
    stop: &'a AtomicBool,
    events: &'a Sender<WorkerEvent>,
    total_bytes: u64,
}

impl<'a> TransferSession<'a> {
    pub(crate) fn new(direction: Direction, stop: &'a AtomicBool, events: &'a Sender<WorkerEvent>) -> Self {
        Self { direction, stop, events, total_bytes: 0 }
    }

    pub(crate) fn running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&mut self, n: u64) {
        self.total_bytes += n;
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn emit_rate(&self, rate: Rate) {
        self.emit(WorkerEvent::Progress(ProgressEvent::normal(self.direction, rate, self.total_bytes)));
    }

    pub(crate) fn emit_complete(&self) {
        self.emit(WorkerEvent::Progress(ProgressEvent::stream_complete(self.direction, self.total_bytes)));
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        // Receiver gone means nobody is listening any more; keep measuring until stopped.
        let _ = self.events.send(event);
    }

    pub(crate) fn finish(self, outcome: Outcome) -> Outcome {
        self.emit(WorkerEvent::Finished { direction: self.direction, outcome: outcome.clone() });
        outcome
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    /// Thread ended on its own (target reached or failure) and has not been joined yet.
    Exited,
}

/// One named OS thread plus the flag that asks it to stop.
pub struct WorkerHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Spawns `body` with a fresh stop flag. A previous run that already exited is joined first.
    pub fn start<F>(&mut self, body: F) -> Result<(), TransferError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        match self.state() {
            WorkerState::Running => return Err(TransferError::AlreadyRunning),
            WorkerState::Exited => self.join(),
            WorkerState::Idle => {}
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let handle = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || body(stop_for_thread))
            .map_err(|e| TransferError::Spawn(e.to_string()))?;
        self.stop = stop;
        self.thread = Some(handle);
        debug!(worker = self.name, "Worker started");
        Ok(())
    }

    /// Requests a stop and blocks until the thread has exited. No-op when idle.
    pub fn stop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        self.join();
        debug!(worker = self.name, "Worker stopped");
    }

    pub fn state(&self) -> WorkerState {
        match &self.thread {
            None => WorkerState::Idle,
            Some(h) if h.is_finished() => WorkerState::Exited,
            Some(_) => WorkerState::Running,
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(worker = self.name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
