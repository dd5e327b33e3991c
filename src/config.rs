use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes=200000000";
pub const DEFAULT_UPLOAD_URL: &str = "http://127.0.0.1:8000/";
pub const DEFAULT_SINK_ADDR: &str = "127.0.0.1:8000";

/// Largest value `parse_byte_size` accepts (1 TiB).
pub const MAX_BYTE_SIZE: u64 = 1 << 40;
/// Largest single read or POST buffer (1 GiB).
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

#[derive(Clone, Debug)]
pub struct DownloadSettings {
    pub url: String,
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub report_interval: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DOWNLOAD_URL.to_string(),
            chunk_size: 256 * 1024,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            report_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub url: String,
    pub chunk_size: usize,
    pub total_target: u64,
    pub request_timeout: Duration,
    pub report_interval: Duration,
    /// Retries allowed for the first chunk, on top of the initial attempt.
    pub first_chunk_retries: u32,
    pub retry_backoff: Duration,
    pub pacing: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPLOAD_URL.to_string(),
            chunk_size: 2 * 1024 * 1024,
            total_target: 200 * 1024 * 1024,
            request_timeout: Duration::from_secs(5),
            report_interval: Duration::from_millis(500),
            first_chunk_retries: 3,
            retry_backoff: Duration::from_secs(1),
            pacing: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub download: Option<DownloadSettings>,
    pub upload: Option<UploadSettings>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            download: Some(DownloadSettings::default()),
            upload: Some(UploadSettings::default()),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.download.is_none() && self.upload.is_none() {
            bail!("Both directions are disabled; nothing to measure.");
        }
        if let Some(d) = &self.download {
            if d.chunk_size == 0 {
                bail!("Download chunk size must be greater than zero.");
            }
            if d.chunk_size > MAX_CHUNK_SIZE {
                bail!("Download chunk size {} exceeds the {MAX_CHUNK_SIZE} byte limit.", d.chunk_size);
            }
            if d.report_interval.is_zero() {
                bail!("Report interval must be greater than zero.");
            }
        }
        if let Some(u) = &self.upload {
            if u.chunk_size == 0 {
                bail!("Upload chunk size must be greater than zero.");
            }
            if u.chunk_size > MAX_CHUNK_SIZE {
                bail!("Upload chunk size {} exceeds the {MAX_CHUNK_SIZE} byte limit.", u.chunk_size);
            }
            if u.total_target == 0 {
                bail!("Upload target must be greater than zero.");
            }
            if u.report_interval.is_zero() {
                bail!("Report interval must be greater than zero.");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub addr: SocketAddr,
    pub read_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Parses `1048576`, `256K`, `256KiB`, `2MB`, `1.5G` and similar.
/// All suffixes are binary multiples.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        bail!("Invalid byte size '{input}'");
    }
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => bail!("Unknown byte size unit '{other}' in '{input}'"),
    };
    let value: f64 = num
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid byte size '{input}'"))?;
    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes > MAX_BYTE_SIZE as f64 {
        bail!("Byte size '{input}' exceeds the {MAX_BYTE_SIZE} byte limit");
    }
    Ok(bytes as u64)
}
