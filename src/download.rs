use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::DownloadSettings;
use crate::error::TransferError;
use crate::event::{Direction, Outcome, WorkerEvent};
use crate::metrics::{to_mib, RateWindow};
use crate::transport::{read_chunk, DownloadSource};
use crate::worker::{TransferSession, WorkerHandle, WorkerState};

/// Streams the test resource over and over, reporting the rate of each request.
pub struct DownloadWorker {
    source: Arc<dyn DownloadSource>,
    settings: DownloadSettings,
    clock: Arc<dyn Clock>,
    events: Sender<WorkerEvent>,
    handle: WorkerHandle,
}

impl DownloadWorker {
    pub fn new(source: Arc<dyn DownloadSource>, settings: DownloadSettings, events: Sender<WorkerEvent>) -> Self {
        Self::with_clock(source, settings, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn DownloadSource>,
        settings: DownloadSettings,
        events: Sender<WorkerEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            settings,
            clock,
            events,
            handle: WorkerHandle::new("download"),
        }
    }

    pub fn start(&mut self) -> Result<(), TransferError> {
        let source = Arc::clone(&self.source);
        let settings = self.settings.clone();
        let clock = Arc::clone(&self.clock);
        let events = self.events.clone();
        self.handle.start(move |stop| {
            run_download(source.as_ref(), &settings, clock.as_ref(), &stop, &events);
        })
    }

    pub fn stop(&mut self) {
        self.handle.stop();
    }

    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }
}

pub(crate) fn run_download(
    source: &dyn DownloadSource,
    settings: &DownloadSettings,
    clock: &dyn Clock,
    stop: &AtomicBool,
    events: &Sender<WorkerEvent>,
) -> Outcome {
    let mut session = TransferSession::new(Direction::Download, stop, events);
    let mut buf = vec![0u8; settings.chunk_size];
    let mut restarts: u64 = 0;

    let outcome = loop {
        if !session.running() {
            break Outcome::CancelledByUser;
        }

        debug!(url = %settings.url, "Opening download stream");
        let mut body = match source.open() {
            Ok(body) => body,
            Err(e) => {
                error!(%e, "Download request failed");
                break Outcome::Failed(e);
            }
        };

        let mut window = RateWindow::new(clock.now(), settings.report_interval);
        let read_result: Result<(), TransferError> = loop {
            if !session.running() {
                break Ok(());
            }
            match read_chunk(body.as_mut(), &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    window.record(n as u64);
                    session.add(n as u64);
                    if let Some(rate) = window.poll(clock.now()) {
                        session.emit_rate(rate);
                    }
                }
                Err(e) => break Err(e.into()),
            }
        };
        // Release the connection before reopening.
        drop(body);

        if let Err(e) = read_result {
            error!(%e, "Download stream aborted");
            break Outcome::Failed(e);
        }

        session.emit_complete();
        info!(
            request_mb = to_mib(window.bytes()),
            total_mb = to_mib(session.total_bytes()),
            "Download stream complete"
        );

        if !session.running() {
            break Outcome::CancelledByUser;
        }
        restarts += 1;
        session.emit(WorkerEvent::Restarted { direction: Direction::Download, restarts });
    };

    session.finish(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    use crossbeam_channel as channel;

    use crate::clock::ManualClock;
    use crate::error::TransportKind;
    use crate::event::{ProgressEvent, ProgressKind};

    const CHUNK: usize = 64 * 1024;

    enum Plan {
        Stream { chunks: usize },
        FailAfter { chunks: usize },
        FailOpen,
    }

    /// Each read yields one chunk and advances the virtual clock by `step`.
    struct FakeBody {
        chunks_left: usize,
        fail_at_end: bool,
        clock: Arc<ManualClock>,
        step: Duration,
        stop_at_eof: Option<Arc<AtomicBool>>,
    }

    impl Read for FakeBody {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks_left == 0 {
                if self.fail_at_end {
                    return Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
                }
                if let Some(stop) = &self.stop_at_eof {
                    stop.store(true, Ordering::Relaxed);
                }
                return Ok(0);
            }
            self.chunks_left -= 1;
            self.clock.advance(self.step);
            let n = CHUNK.min(buf.len());
            buf[..n].fill(0xAB);
            Ok(n)
        }
    }

    /// Plays `plans` in order; the final stream raises the stop flag when it ends.
    struct ScriptedSource {
        plans: Mutex<VecDeque<Plan>>,
        clock: Arc<ManualClock>,
        step: Duration,
        stop: Arc<AtomicBool>,
        opens: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(plans: Vec<Plan>, clock: Arc<ManualClock>, step: Duration, stop: Arc<AtomicBool>) -> Self {
            Self {
                plans: Mutex::new(plans.into()),
                clock,
                step,
                stop,
                opens: Mutex::new(0),
            }
        }
    }

    impl DownloadSource for ScriptedSource {
        fn open(&self) -> Result<Box<dyn Read + Send>, TransferError> {
            *self.opens.lock().unwrap() += 1;
            let mut plans = self.plans.lock().unwrap();
            let plan = plans.pop_front().expect("source opened more often than scripted");
            let last = plans.is_empty();
            let (chunks, fail_at_end) = match plan {
                Plan::Stream { chunks } => (chunks, false),
                Plan::FailAfter { chunks } => (chunks, true),
                Plan::FailOpen => {
                    return Err(TransferError::transport(TransportKind::Connect, "connection refused"))
                }
            };
            Ok(Box::new(FakeBody {
                chunks_left: chunks,
                fail_at_end,
                clock: Arc::clone(&self.clock),
                step: self.step,
                stop_at_eof: last.then(|| Arc::clone(&self.stop)),
            }))
        }
    }

    fn settings() -> DownloadSettings {
        DownloadSettings {
            url: "http://test.invalid/blob".into(),
            chunk_size: CHUNK,
            ..DownloadSettings::default()
        }
    }

    fn run_scripted(plans: Vec<Plan>, step: Duration) -> (Outcome, Vec<WorkerEvent>, usize) {
        let clock = Arc::new(ManualClock::new());
        let stop = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource::new(plans, Arc::clone(&clock), step, Arc::clone(&stop));
        let (tx, rx) = channel::unbounded();
        let outcome = run_download(&source, &settings(), clock.as_ref(), &stop, &tx);
        drop(tx);
        let opens = *source.opens.lock().unwrap();
        (outcome, rx.iter().collect(), opens)
    }

    fn progress(events: &[WorkerEvent]) -> Vec<ProgressEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_threshold_crossing_yields_one_normal_then_complete() {
        // 4 chunks, 150ms each: only the 4th read (600ms) crosses the 500ms interval
        let (outcome, events, _) = run_scripted(vec![Plan::Stream { chunks: 4 }], Duration::from_millis(150));
        assert_eq!(outcome, Outcome::CancelledByUser);

        let p = progress(&events);
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].kind, ProgressKind::Normal);
        let rate = p[0].rate.unwrap();
        let expected_mbps = (4 * CHUNK) as f64 * 8.0 / 0.6 / 1_000_000.0;
        assert!((rate.mbps - expected_mbps).abs() < 1e-6);

        assert_eq!(p[1].kind, ProgressKind::StreamComplete);
        assert!(p[1].rate.is_none());
        assert_eq!(p[1].cumulative_mb, (4 * CHUNK) as f64 / (1024.0 * 1024.0));

        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Finished { direction: Direction::Download, outcome: Outcome::CancelledByUser })
        ));
    }

    #[test]
    fn exhausted_stream_restarts_and_total_keeps_growing() {
        let plans = vec![
            Plan::Stream { chunks: 2 },
            Plan::Stream { chunks: 2 },
            Plan::Stream { chunks: 4 },
        ];
        let (outcome, events, opens) = run_scripted(plans, Duration::from_millis(100));
        assert_eq!(outcome, Outcome::CancelledByUser);
        assert_eq!(opens, 3);

        let restarts: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Restarted { restarts, .. } => Some(*restarts),
                _ => None,
            })
            .collect();
        assert_eq!(restarts, vec![1, 2]);

        let completes: Vec<f64> = progress(&events)
            .into_iter()
            .filter(|p| p.kind == ProgressKind::StreamComplete)
            .map(|p| p.cumulative_mb)
            .collect();
        assert_eq!(completes, vec![0.125, 0.25, 0.5]);
    }

    #[test]
    fn rate_is_per_request_not_all_time() {
        // Samples from the second request must not include bytes or time from the first.
        let clock = Arc::new(ManualClock::new());
        let stop = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource::new(
            vec![Plan::Stream { chunks: 10 }, Plan::Stream { chunks: 10 }],
            Arc::clone(&clock),
            Duration::from_millis(100),
            Arc::clone(&stop),
        );
        let (tx, rx) = channel::unbounded();
        run_download(&source, &settings(), clock.as_ref(), &stop, &tx);
        drop(tx);

        let normals: Vec<f64> = progress(&rx.iter().collect::<Vec<_>>())
            .into_iter()
            .filter_map(|p| p.rate.map(|r| r.mbps))
            .collect();
        // every sample is CHUNK bytes per 100ms regardless of how many requests came before
        let expected = CHUNK as f64 * 8.0 / 0.1 / 1_000_000.0;
        assert!(!normals.is_empty());
        for mbps in normals {
            assert!((mbps - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn open_failure_is_terminal_without_restart() {
        let (outcome, events, opens) = run_scripted(vec![Plan::FailOpen, Plan::Stream { chunks: 1 }], Duration::ZERO);
        assert!(matches!(outcome, Outcome::Failed(TransferError::Transport { kind: TransportKind::Connect, .. })));
        assert_eq!(opens, 1);
        assert!(progress(&events).is_empty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn mid_stream_error_is_terminal_and_not_a_completion() {
        let (outcome, events, opens) = run_scripted(
            vec![Plan::FailAfter { chunks: 3 }, Plan::Stream { chunks: 1 }],
            Duration::from_millis(300),
        );
        assert!(matches!(outcome, Outcome::Failed(TransferError::Transport { .. })));
        assert_eq!(opens, 1);
        assert!(progress(&events).iter().all(|p| p.kind == ProgressKind::Normal));
        assert!(!events.iter().any(|e| matches!(e, WorkerEvent::Restarted { .. })));
    }

    struct Endless;

    impl Read for Endless {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(1));
            let n = buf.len().min(4096);
            buf[..n].fill(0);
            Ok(n)
        }
    }

    struct EndlessSource;

    impl DownloadSource for EndlessSource {
        fn open(&self) -> Result<Box<dyn Read + Send>, TransferError> {
            Ok(Box::new(Endless))
        }
    }

    #[test]
    fn stop_joins_thread_and_reports_cancellation() {
        let (tx, rx) = channel::unbounded();
        let settings = DownloadSettings {
            chunk_size: 4096,
            report_interval: Duration::from_millis(20),
            ..settings()
        };
        let mut worker = DownloadWorker::new(Arc::new(EndlessSource), settings, tx);
        worker.start().unwrap();
        assert_eq!(worker.start(), Err(TransferError::AlreadyRunning));

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, WorkerEvent::Progress(ProgressEvent { kind: ProgressKind::Normal, .. })));

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.stop();

        let rest: Vec<WorkerEvent> = rx.try_iter().collect();
        let n = rest.len();
        assert!(n >= 2);
        assert!(matches!(&rest[n - 2], WorkerEvent::Progress(p) if p.kind == ProgressKind::StreamComplete));
        assert_eq!(
            rest[n - 1],
            WorkerEvent::Finished { direction: Direction::Download, outcome: Outcome::CancelledByUser }
        );
    }
}
