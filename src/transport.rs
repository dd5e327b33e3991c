use std::io::Read;

use bytes::Bytes;
use rand::RngCore;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::config::{DownloadSettings, UploadSettings};
use crate::error::{TransferError, TransportKind};

/// Opens one streaming GET per call. The returned reader yields the body.
pub trait DownloadSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn Read + Send>, TransferError>;
}

/// Sends one chunk and waits for the response. The chunk is consumed.
pub trait UploadTarget: Send + Sync {
    fn send(&self, chunk: ChunkBuffer) -> Result<(), TransferError>;
}

/// Fixed-size payload for one POST. Moved into the transport and dropped after the send.
#[derive(Debug)]
pub struct ChunkBuffer(Bytes);

impl ChunkBuffer {
    pub fn random(size: usize) -> Self {
        let mut buf = vec![0u8; size];
        rand::rng().fill_bytes(&mut buf);
        Self(Bytes::from(buf))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

pub struct HttpDownloadSource {
    client: Client,
    url: String,
}

impl HttpDownloadSource {
    pub fn new(settings: &DownloadSettings) -> Result<Self, TransferError> {
        // The blocking client applies `timeout` to each wait, including every body read.
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()?;
        Ok(Self { client, url: settings.url.clone() })
    }
}

impl DownloadSource for HttpDownloadSource {
    fn open(&self) -> Result<Box<dyn Read + Send>, TransferError> {
        let resp = self.client.get(&self.url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransferError::transport(
                TransportKind::Status(status.as_u16()),
                format!("GET {} returned {status}", self.url),
            ));
        }
        Ok(Box::new(resp))
    }
}

pub struct HttpUploadTarget {
    client: Client,
    url: String,
}

impl HttpUploadTarget {
    pub fn new(settings: &UploadSettings) -> Result<Self, TransferError> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, url: settings.url.clone() })
    }
}

impl UploadTarget for HttpUploadTarget {
    fn send(&self, chunk: ChunkBuffer) -> Result<(), TransferError> {
        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.into_bytes())
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransferError::transport(
                TransportKind::Status(status.as_u16()),
                format!("POST {} returned {status}", self.url),
            ));
        }
        Ok(())
    }
}

/// Fills `buf` from `reader` until it is full or the stream ends.
pub(crate) fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
