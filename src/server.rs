use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ratewatch::event::{Direction, Outcome, ProgressKind, WorkerEvent};
use ratewatch::sink::run_sink_until;
use ratewatch::{Monitor, SinkConfig, SinkEndpoint, TransferError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{OutputFormat, Run, Sink};

fn stop_on_ctrlc() -> Arc<AtomicBool> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }
    stop_flag
}

pub fn run_monitor(run: Run) -> Result<()> {
    run_monitor_with_shutdown(run, stop_on_ctrlc())
}

pub fn run_sink(sink: Sink) -> Result<()> {
    let config = sink.sink_config();
    info!(host = %config.addr, read_timeout_ms = sink.read_timeout_ms, "Starting sink");
    run_sink_until(&config, stop_on_ctrlc())
}

pub(crate) fn run_monitor_with_shutdown(run: Run, stop_flag: Arc<AtomicBool>) -> Result<()> {
    let mut config = run.monitor_config();

    // Kept alive until the monitor is done with it
    let local_sink = if run.serve_sink && config.upload.is_some() {
        let sink = SinkEndpoint::spawn(&SinkConfig {
            addr: "127.0.0.1:0".parse().context("Parsing loopback address")?,
            ..SinkConfig::default()
        })?;
        if let Some(upload) = config.upload.as_mut() {
            upload.url = sink.url();
        }
        Some(sink)
    } else {
        None
    };

    let mut monitor = Monitor::new(&config).context("Building monitor")?;
    monitor.start().context("Starting workers")?;
    info!(download = config.download.is_some(), upload = config.upload.is_some(), "Monitoring throughput");

    let deadline = run.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut failure: Option<(Direction, TransferError)> = None;
    let mut report = |ev: &WorkerEvent| -> Result<()> {
        if let WorkerEvent::Finished { direction, outcome: Outcome::Failed(e) } = ev {
            failure.get_or_insert((*direction, e.clone()));
        }
        println!("{}", format_event(ev, run.format)?);
        Ok(())
    };

    while !stop_flag.load(Ordering::Relaxed) && !monitor.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if let Some(ev) = monitor.recv_timeout(Duration::from_millis(200)) {
            report(&ev)?;
        }
    }

    for ev in monitor.poll() {
        report(&ev)?;
    }
    for ev in monitor.stop() {
        report(&ev)?;
    }
    if let Some(sink) = local_sink {
        if let Err(e) = sink.shutdown() {
            warn!(?e, "Local sink shutdown failed");
        }
    }

    match failure {
        Some((direction, err)) => Err(anyhow::Error::from(err).context(format!("{direction} failed"))),
        None => Ok(()),
    }
}

#[derive(Serialize)]
struct EventOut {
    direction: Direction,
    event: &'static str,
    mbps: Option<f64>,
    mbytes_per_sec: Option<f64>,
    cumulative_mb: Option<f64>,
    restarts: Option<u64>,
    error: Option<String>,
}

fn label(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Download => ("Download", "Downloaded"),
        Direction::Upload => ("Upload", "Uploaded"),
    }
}

pub(crate) fn format_event(ev: &WorkerEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_text(ev)),
        OutputFormat::Json => {
            let out = match ev {
                WorkerEvent::Progress(p) => EventOut {
                    direction: p.direction,
                    event: match p.kind {
                        ProgressKind::Normal => "progress",
                        ProgressKind::StreamComplete => "stream_complete",
                    },
                    mbps: p.rate.map(|r| r.mbps),
                    mbytes_per_sec: p.rate.map(|r| r.mbytes_per_sec),
                    cumulative_mb: Some(p.cumulative_mb),
                    restarts: None,
                    error: None,
                },
                WorkerEvent::Restarted { direction, restarts } => EventOut {
                    direction: *direction,
                    event: "restarted",
                    mbps: None,
                    mbytes_per_sec: None,
                    cumulative_mb: None,
                    restarts: Some(*restarts),
                    error: None,
                },
                WorkerEvent::Finished { direction, outcome } => EventOut {
                    direction: *direction,
                    event: match outcome {
                        Outcome::CancelledByUser => "cancelled",
                        Outcome::TargetReached => "target_reached",
                        Outcome::Failed(_) => "error",
                    },
                    mbps: None,
                    mbytes_per_sec: None,
                    cumulative_mb: None,
                    restarts: None,
                    error: match outcome {
                        Outcome::Failed(e) => Some(e.to_string()),
                        _ => None,
                    },
                },
            };
            Ok(serde_json::to_string(&out)?)
        }
    }
}

fn format_text(ev: &WorkerEvent) -> String {
    match ev {
        WorkerEvent::Progress(p) => {
            let (name, done) = label(p.direction);
            match p.rate {
                Some(r) => format!(
                    "{name}: {:.2} Mbps | {:.2} MBps | {done}: {:.2} MB",
                    r.mbps, r.mbytes_per_sec, p.cumulative_mb
                ),
                None => format!("{name}: -- Mbps | -- MBps | {done}: {:.2} MB (stream complete)", p.cumulative_mb),
            }
        }
        WorkerEvent::Restarted { direction, restarts } => {
            format!("{}: stream restarted (#{restarts})", label(*direction).0)
        }
        WorkerEvent::Finished { direction, outcome } => {
            let name = label(*direction).0;
            match outcome {
                Outcome::CancelledByUser => format!("{name}: stopped"),
                Outcome::TargetReached => format!("{name}: target reached"),
                Outcome::Failed(e) => format!("{name}: error: {e}"),
            }
        }
    }
}
