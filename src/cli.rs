use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use ratewatch::config::{
    parse_byte_size, DEFAULT_DOWNLOAD_URL, DEFAULT_SINK_ADDR, DEFAULT_UPLOAD_URL,
};
use ratewatch::{DownloadSettings, MonitorConfig, SinkConfig, UploadSettings};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure download and upload throughput until stopped
    Run(Run),
    /// Accept and discard upload bodies
    Sink(Sink),
}

#[derive(Parser, Clone, Debug)]
pub struct Run {
    /// Large resource streamed by the download worker
    #[arg(long, default_value = DEFAULT_DOWNLOAD_URL)]
    pub download_url: String,

    /// Sink that receives upload chunks
    #[arg(long, default_value = DEFAULT_UPLOAD_URL)]
    pub upload_url: String,

    /// Skip the download direction
    #[arg(long, conflicts_with = "no_upload")]
    pub no_download: bool,

    /// Skip the upload direction
    #[arg(long)]
    pub no_upload: bool,

    /// Bytes per download read (e.g. 256KiB, 35MiB)
    #[arg(long, value_parser = parse_byte_size, default_value = "256KiB")]
    pub download_chunk: u64,

    /// Bytes per upload POST
    #[arg(long, value_parser = parse_byte_size, default_value = "2MiB")]
    pub upload_chunk: u64,

    /// Stop uploading after this many bytes
    #[arg(long, value_parser = parse_byte_size, default_value = "200MiB")]
    pub upload_total: u64,

    /// Milliseconds between rate reports
    #[arg(long, default_value_t = 500)]
    pub report_interval_ms: u64,

    /// Download connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Download per-read timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub read_timeout: u64,

    /// Upload request timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub upload_timeout: u64,

    /// Retries allowed for the first upload chunk
    #[arg(long, default_value_t = 3)]
    pub first_chunk_retries: u32,

    /// Milliseconds to wait between first-chunk retries
    #[arg(long, default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    /// Stop automatically after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Start a sink in-process on a free loopback port and upload to it
    #[arg(long)]
    pub serve_sink: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl Run {
    pub fn monitor_config(&self) -> MonitorConfig {
        let report_interval = Duration::from_millis(self.report_interval_ms);
        let download = (!self.no_download).then(|| DownloadSettings {
            url: self.download_url.clone(),
            chunk_size: self.download_chunk as usize,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            report_interval,
        });
        let upload = (!self.no_upload).then(|| UploadSettings {
            url: self.upload_url.clone(),
            chunk_size: self.upload_chunk as usize,
            total_target: self.upload_total,
            request_timeout: Duration::from_secs(self.upload_timeout),
            report_interval,
            first_chunk_retries: self.first_chunk_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            ..UploadSettings::default()
        });
        MonitorConfig { download, upload }
    }
}

#[derive(Parser, Clone, Debug)]
pub struct Sink {
    /// Listen address
    #[arg(long, default_value = DEFAULT_SINK_ADDR)]
    pub host: SocketAddr,

    /// Per-read body timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    pub read_timeout_ms: u64,
}

impl Sink {
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            addr: self.host,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ratewatch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_defaults_match_library_defaults() {
        let Some(Commands::Run(run)) = parse(&["run"]).command else {
            panic!("expected run");
        };
        let cfg = run.monitor_config();
        let up = cfg.upload.unwrap();
        let defaults = UploadSettings::default();
        assert_eq!(up.chunk_size, defaults.chunk_size);
        assert_eq!(up.total_target, defaults.total_target);
        assert_eq!(up.retry_backoff, defaults.retry_backoff);
        assert_eq!(cfg.download.unwrap().chunk_size, DownloadSettings::default().chunk_size);
    }

    #[test]
    fn run_accepts_sizes_and_single_direction() {
        let Some(Commands::Run(run)) =
            parse(&["run", "--no-upload", "--download-chunk", "35MiB", "--format", "json"]).command
        else {
            panic!("expected run");
        };
        assert_eq!(run.format, OutputFormat::Json);
        let cfg = run.monitor_config();
        assert!(cfg.upload.is_none());
        assert_eq!(cfg.download.unwrap().chunk_size, 35 * 1024 * 1024);
    }

    #[test]
    fn both_directions_disabled_is_rejected() {
        let res = Cli::try_parse_from(["ratewatch", "run", "--no-download", "--no-upload"]);
        assert!(res.is_err());
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let res = Cli::try_parse_from(["ratewatch", "run", "--download-chunk", "99999999999999999999G"]);
        assert!(res.is_err());

        let Some(Commands::Run(run)) = parse(&["run", "--upload-chunk", "4GiB"]).command else {
            panic!("expected run");
        };
        assert!(run.monitor_config().validate().is_err());
    }

    #[test]
    fn sink_host_parses() {
        let Some(Commands::Sink(sink)) = parse(&["sink", "--host", "0.0.0.0:9000"]).command else {
            panic!("expected sink");
        };
        assert_eq!(sink.sink_config().addr.port(), 9000);
    }
}
