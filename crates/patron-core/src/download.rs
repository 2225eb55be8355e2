//! Book downloads
//!
//! A [`Downloader`] starts a transfer and reports its progress to a
//! [`DownloadListener`]. Exactly one of `completed`, `failed` or `cancelled`
//! ends every transfer. The returned [`DownloadHandle`] cancels it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use reqwest::header::CONTENT_TYPE;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::HttpAuth;
use crate::http::{authorize, header_str};
use crate::storage::{self, StorageResult};

/// What to download
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub uri: Url,
    pub auth: Option<HttpAuth>,
}

/// Progress callbacks of one download
///
/// Callbacks run on the downloader's task and must not block.
pub trait DownloadListener: Send + Sync {
    /// The server accepted the request
    fn started(&self, expected_total: Option<u64>);

    /// `running` bytes have been received so far
    fn data_received(&self, running: u64, expected_total: Option<u64>);

    /// The whole payload is in `file`
    fn completed(&self, file: TempPath, content_type: Option<String>);

    /// The transfer failed after `running` bytes
    fn failed(&self, status: Option<u16>, running: u64, cause: anyhow::Error);

    /// The transfer was cancelled through its handle
    fn cancelled(&self);
}

/// Cancels a download
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    cancel: Arc<watch::Sender<bool>>,
}

/// Observed by the running download to learn about cancellation
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl DownloadHandle {
    /// Create a handle and the signal it controls
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Arc::new(tx),
            },
            CancelSignal { rx },
        )
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Whether both handles control the same download
    pub fn same_as(&self, other: &DownloadHandle) -> bool {
        Arc::ptr_eq(&self.cancel, &other.cancel)
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the download is cancelled
    ///
    /// Never resolves if every handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Starts downloads
pub trait Downloader: Send + Sync {
    fn download(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> DownloadHandle;
}

/// [`Downloader`] streaming over HTTP into temporary files
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl HttpDownloader {
    /// Downloads land in `temp_dir` until the listener takes them
    pub fn new(client: reqwest::Client, temp_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let temp_dir = temp_dir.into();
        storage::create_dir_all(&temp_dir)?;
        Ok(Self { client, temp_dir })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl Downloader for HttpDownloader {
    fn download(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> DownloadHandle {
        let (handle, signal) = DownloadHandle::new();
        let client = self.client.clone();
        let temp_dir = self.temp_dir.clone();
        tokio::spawn(async move {
            transfer(client, temp_dir, request, listener, signal).await;
        });
        handle
    }
}

async fn transfer(
    client: reqwest::Client,
    temp_dir: PathBuf,
    request: DownloadRequest,
    listener: Arc<dyn DownloadListener>,
    mut signal: CancelSignal,
) {
    debug!(uri = %request.uri, "download starting");
    let send = authorize(client.get(request.uri.clone()), request.auth.as_ref()).send();
    let response = tokio::select! {
        biased;
        _ = signal.cancelled() => {
            listener.cancelled();
            return;
        }
        response = send => response,
    };

    let mut response = match response {
        Ok(response) => response,
        Err(e) => {
            listener.failed(None, 0, e.into());
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("request failed");
        listener.failed(Some(status.as_u16()), 0, anyhow!("{}", reason));
        return;
    }

    let total = response.content_length();
    let content_type = header_str(&response, CONTENT_TYPE);

    let (file, path) = match NamedTempFile::new_in(&temp_dir) {
        Ok(file) => file.into_parts(),
        Err(e) => {
            listener.failed(None, 0, anyhow!(e).context("Failed to create download file"));
            return;
        }
    };
    let mut out = tokio::fs::File::from_std(file);

    listener.started(total);
    listener.data_received(0, total);

    let mut running: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                debug!(uri = %request.uri, running, "download cancelled");
                listener.cancelled();
                return;
            }
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                if let Err(e) = out.write_all(&bytes).await {
                    listener.failed(None, running, anyhow!(e).context("Failed to write download"));
                    return;
                }
                running += bytes.len() as u64;
                listener.data_received(running, total);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(uri = %request.uri, running, "download interrupted: {}", e);
                listener.failed(None, running, e.into());
                return;
            }
        }
    }

    if let Err(e) = out.sync_all().await {
        listener.failed(None, running, anyhow!(e).context("Failed to flush download"));
        return;
    }
    drop(out);

    debug!(uri = %request.uri, bytes = running, "download complete");
    listener.completed(path, content_type);
}
