use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::SinkConfig;

#[derive(Debug, Default)]
pub struct SinkStats {
    requests: AtomicU64,
    bytes: AtomicU64,
    last_request_bytes: AtomicU64,
}

impl SinkStats {
    fn record(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.last_request_bytes.store(bytes, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn last_request_bytes(&self) -> u64 {
        self.last_request_bytes.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct SinkState {
    read_timeout: Duration,
    stats: Arc<SinkStats>,
}

/// `POST /` only; anything else gets 405/404 from the router.
pub fn sink_router(read_timeout: Duration, stats: Arc<SinkStats>) -> Router {
    Router::new()
        .route("/", post(receive_handler))
        .with_state(SinkState { read_timeout, stats })
        .layer(DefaultBodyLimit::disable())
}

async fn receive_handler(
    State(state): State<SinkState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Body,
) -> StatusCode {
    let total = drain_body(body, state.read_timeout).await;
    state.stats.record(total);
    info!(%peer, bytes = total, "Received POST");
    StatusCode::OK
}

/// Reads and discards the body. Each frame must arrive within `read_timeout`;
/// a stalled client ends the drain early instead of holding the handler.
async fn drain_body(body: Body, read_timeout: Duration) -> u64 {
    let mut stream = body.into_data_stream();
    let mut total: u64 = 0;
    loop {
        match tokio::time::timeout(read_timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => total += frame.len() as u64,
            Ok(Some(Err(e))) => {
                warn!(?e, received = total, "Error reading upload body");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(received = total, "Upload body read timed out");
                break;
            }
        }
    }
    total
}

/// Sink server running on its own thread and runtime.
pub struct SinkEndpoint {
    addr: SocketAddr,
    stats: Arc<SinkStats>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl SinkEndpoint {
    /// Binds synchronously so address errors surface here, then serves in the background.
    pub fn spawn(config: &SinkConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.addr)
            .with_context(|| format!("Binding sink listener at {}", config.addr))?;
        listener
            .set_nonblocking(true)
            .context("Setting sink listener non-blocking mode")?;
        let addr = listener.local_addr().context("Reading sink local address")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sink-rt")
            .enable_all()
            .build()
            .context("Building sink runtime")?;

        let stats = Arc::new(SinkStats::default());
        let app = sink_router(config.read_timeout, Arc::clone(&stats));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("sink".into())
            .spawn(move || -> Result<()> {
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await?;
                    Ok(())
                })
            })
            .context("Spawning sink thread")?;

        info!(%addr, "Sink listening");
        Ok(Self {
            addr,
            stats,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| anyhow!("Sink thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for SinkEndpoint {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(?e, "Sink shutdown error");
        }
    }
}

/// Serves until `stop_flag` is raised.
pub fn run_sink_until(config: &SinkConfig, stop_flag: Arc<AtomicBool>) -> Result<()> {
    let sink = SinkEndpoint::spawn(config)?;
    while !stop_flag.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }
    info!(
        requests = sink.stats.requests(),
        bytes = sink.stats.bytes(),
        "Shutting down sink"
    );
    sink.shutdown()
}
