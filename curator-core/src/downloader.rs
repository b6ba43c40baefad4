use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::config::CuratorConfig;

const USER_AGENT: &str = "MidnightCurator/1.0";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid download url: {url}")]
    InvalidUrl { url: String },
    #[error("download timed out after {seconds}s: {url}")]
    TimedOut { url: String, seconds: u64 },
    #[error("download produced an empty file: {url}")]
    EmptyFile { url: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Streams a resolved URL into a temp path under the library directory.
/// The whole transfer runs under one timeout; any failure removes the
/// partial file so nothing half-written survives the attempt.
pub struct Downloader {
    client: Client,
    timeout: Duration,
    progress_interval: Duration,
}

impl Downloader {
    pub fn new(config: &CuratorConfig) -> DownloadResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.download.timeout_seconds),
            progress_interval: Duration::from_secs(config.download.progress_interval_seconds),
        })
    }

    /// Fetches `url` into `dest`, returning the byte count on success.
    /// `expected_bytes` only feeds progress logging; the transfer is not
    /// rejected when the final size disagrees with it.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        expected_bytes: Option<u64>,
    ) -> DownloadResult<u64> {
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.fetch_inner(url, dest, expected_bytes),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DownloadError::TimedOut {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        };
        if outcome.is_err() {
            self.discard_partial(dest).await;
        }
        outcome
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &Path,
        expected_bytes: Option<u64>,
    ) -> DownloadResult<u64> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let source = parsed.to_file_path().map_err(|_| DownloadError::InvalidUrl {
                    url: url.to_string(),
                })?;
                let written =
                    fs::copy(&source, dest)
                        .await
                        .map_err(|source| DownloadError::Io {
                            path: dest.to_path_buf(),
                            source,
                        })?;
                if written == 0 {
                    return Err(DownloadError::EmptyFile {
                        url: url.to_string(),
                    });
                }
                return Ok(written);
            }
        }

        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().or(expected_bytes);
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| DownloadError::Io {
                path: dest.to_path_buf(),
                source,
            })?;

        let mut written: u64 = 0;
        let mut last_report = Instant::now();
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| DownloadError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
            written += data.len() as u64;
            if last_report.elapsed() >= self.progress_interval {
                match total {
                    Some(total) if total > 0 => {
                        debug!(
                            url = %url,
                            written,
                            total,
                            percent = written * 100 / total,
                            "download progress"
                        );
                    }
                    _ => debug!(url = %url, written, "download progress"),
                }
                last_report = Instant::now();
            }
        }
        file.flush().await.map_err(|source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        if written == 0 {
            return Err(DownloadError::EmptyFile {
                url: url.to_string(),
            });
        }
        Ok(written)
    }

    async fn discard_partial(&self, dest: &Path) {
        match fs::remove_file(dest).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %dest.display(), error = %err, "failed to remove partial download");
            }
        }
    }
}
