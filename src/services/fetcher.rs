use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;

use crate::config::FetchSettings;
use crate::errors::{PatchOpsError, Result};
use crate::models::{
    Asset, CancelToken, DownloadRecord, DownloadStatus, SizeRange, Source, SourceLocation,
};

const PART_SUFFIX: &str = ".part";

#[derive(Clone, Debug)]
pub struct FetchProgress {
    pub asset: String,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
}

impl FetchProgress {
    pub fn speed_bps(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.downloaded as f64 / secs) as u64
        } else {
            0
        }
    }
}

pub type ProgressFn<'a> = &'a (dyn Fn(FetchProgress) + Send + Sync);

#[derive(Debug)]
enum SourceFailure {
    /// Worth retrying the same source.
    Transient(String),
    /// Source cannot serve the asset; move on.
    Unavailable(String),
    /// Source served something that is not the asset; move on.
    Rejected(String),
    Checksum { actual: String, bytes: u64 },
    Cancelled,
}

struct Fetched {
    sha256: String,
    bytes: u64,
}

fn looks_like_html(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&head[..head.len().min(256)]);
    let trimmed = text
        .trim_start_matches('\u{feff}')
        .trim_start()
        .to_ascii_lowercase();
    ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|marker| trimmed.starts_with(marker))
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

fn classify_transport(err: &reqwest::Error) -> SourceFailure {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        SourceFailure::Transient(err.to_string())
    } else {
        SourceFailure::Unavailable(err.to_string())
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
    chunk_timeout: Duration,
    offline: bool,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings, offline: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("PatchOps/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            max_retries: settings.max_retries,
            base_backoff: settings.base_backoff(),
            chunk_timeout: settings.chunk_timeout(),
            offline,
        })
    }

    /// Walks the asset's sources in order until one yields verified bytes at
    /// `destination`. Never returns an error: the outcome is in the record.
    pub async fn fetch(
        &self,
        asset: &Asset,
        destination: &Path,
        expected_size: Option<SizeRange>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> DownloadRecord {
        let mut record = DownloadRecord {
            asset: asset.name.clone(),
            destination: destination.to_path_buf(),
            expected_size,
            expected_sha256: asset.sha256.clone(),
            computed_sha256: None,
            source: None,
            bytes_transferred: 0,
            status: DownloadStatus::Exhausted,
            detail: None,
        };

        let mut failures: Vec<String> = Vec::new();
        let mut only_rejections = true;

        for source in &asset.sources {
            if cancel.is_cancelled() {
                record.status = DownloadStatus::Cancelled;
                return record;
            }
            if self.offline && matches!(source.location, SourceLocation::Remote(_)) {
                failures.push(format!("{} -> skipped while offline", source));
                only_rejections = false;
                continue;
            }

            let outcome = self
                .fetch_source(source, asset, destination, expected_size, progress, cancel)
                .await;
            match outcome {
                Ok(fetched) => {
                    tracing::info!(
                        "fetched {} from {} ({} bytes)",
                        asset.name,
                        source,
                        fetched.bytes
                    );
                    record.status = DownloadStatus::Ok;
                    record.source = Some(source.clone());
                    record.bytes_transferred = fetched.bytes;
                    record.computed_sha256 = Some(fetched.sha256);
                    return record;
                }
                Err(SourceFailure::Checksum { actual, bytes }) => {
                    tracing::error!(
                        "{} from {} failed checksum verification: got {}",
                        asset.name,
                        source,
                        actual
                    );
                    record.status = DownloadStatus::ChecksumMismatch;
                    record.source = Some(source.clone());
                    record.bytes_transferred = bytes;
                    record.computed_sha256 = Some(actual);
                    return record;
                }
                Err(SourceFailure::Cancelled) => {
                    record.status = DownloadStatus::Cancelled;
                    record.source = Some(source.clone());
                    return record;
                }
                Err(SourceFailure::Rejected(reason)) => {
                    tracing::warn!("rejected content from {}: {}", source, reason);
                    failures.push(format!("{} -> {}", source, reason));
                }
                Err(SourceFailure::Unavailable(reason)) | Err(SourceFailure::Transient(reason)) => {
                    tracing::warn!("source {} unavailable: {}", source, reason);
                    failures.push(format!("{} -> {}", source, reason));
                    only_rejections = false;
                }
            }
        }

        record.status = if only_rejections && !failures.is_empty() {
            DownloadStatus::ContentTypeRejected
        } else {
            DownloadStatus::Exhausted
        };
        record.detail = Some(if failures.is_empty() {
            "no sources available".to_string()
        } else {
            failures.join("; ")
        });
        record
    }

    async fn fetch_source(
        &self,
        source: &Source,
        asset: &Asset,
        destination: &Path,
        expected_size: Option<SizeRange>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<Fetched, SourceFailure> {
        match &source.location {
            SourceLocation::Local(path) => {
                let outcome = self
                    .read_local(path, asset, destination, expected_size, progress, cancel)
                    .await;
                match outcome {
                    // A stale cached copy is not the asset we asked for.
                    Err(SourceFailure::Checksum { actual, .. }) => Err(SourceFailure::Unavailable(
                        format!("local copy has checksum {}", actual),
                    )),
                    other => other,
                }
            }
            SourceLocation::Remote(url) => {
                let attempts = self.max_retries + 1;
                let mut attempt = 1;
                loop {
                    let outcome = self
                        .download_once(url, asset, destination, expected_size, progress, cancel)
                        .await;
                    match outcome {
                        Err(SourceFailure::Transient(reason)) if attempt < attempts => {
                            let delay = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                            tracing::warn!(
                                "{} -> {} [attempt {}/{}], retrying in {:?}",
                                url,
                                reason,
                                attempt,
                                attempts,
                                delay
                            );
                            let mut cancel = cancel.clone();
                            tokio::select! {
                                _ = sleep(delay) => {}
                                _ = cancel.cancelled() => return Err(SourceFailure::Cancelled),
                            }
                            attempt += 1;
                        }
                        Err(SourceFailure::Transient(reason)) => {
                            return Err(SourceFailure::Unavailable(format!(
                                "{} after {} attempts",
                                reason, attempts
                            )))
                        }
                        other => return other,
                    }
                }
            }
        }
    }

    async fn download_once(
        &self,
        url: &str,
        asset: &Asset,
        destination: &Path,
        expected_size: Option<SizeRange>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<Fetched, SourceFailure> {
        let mut cancel = cancel.clone();
        let response = tokio::select! {
            response = self.client.get(url).send() => response,
            _ = cancel.cancelled() => return Err(SourceFailure::Cancelled),
        };
        let response = response.map_err(|err| classify_transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            let failure = format!("HTTP {}", status);
            let retryable = status.is_server_error()
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            return Err(if retryable {
                SourceFailure::Transient(failure)
            } else {
                SourceFailure::Unavailable(failure)
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.contains("text/html") {
            return Err(SourceFailure::Rejected(format!(
                "content-type {} is not an archive",
                content_type
            )));
        }

        let total = response.content_length();
        if let (Some(range), Some(total)) = (expected_size, total) {
            if !range.contains(total) {
                return Err(SourceFailure::Rejected(format!(
                    "advertised size {} outside expected range",
                    total
                )));
            }
        }

        let part = part_path(destination);
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| SourceFailure::Transient(err.to_string()))
        });
        let outcome = self
            .write_stream(stream, &part, asset, total, expected_size, progress, &mut cancel)
            .await;
        finish_part(outcome, &part, destination, asset).await
    }

    async fn read_local(
        &self,
        path: &Path,
        asset: &Asset,
        destination: &Path,
        expected_size: Option<SizeRange>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<Fetched, SourceFailure> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|err| SourceFailure::Unavailable(format!("{}: {}", path.display(), err)))?;
        if !metadata.is_file() {
            return Err(SourceFailure::Unavailable(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if let Some(range) = expected_size {
            if !range.contains(metadata.len()) {
                return Err(SourceFailure::Rejected(format!(
                    "local file size {} outside expected range",
                    metadata.len()
                )));
            }
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
        let stream = futures_util::stream::unfold(file, |mut file| async move {
            let mut buffer = vec![0u8; 65536];
            match file.read(&mut buffer).await {
                Ok(0) => None,
                Ok(read) => {
                    buffer.truncate(read);
                    Some((Ok(buffer), file))
                }
                Err(err) => Some((Err(SourceFailure::Unavailable(err.to_string())), file)),
            }
        });

        let mut cancel = cancel.clone();
        if same_file(path, destination) {
            let outcome = self
                .write_stream(
                    stream,
                    Path::new(""),
                    asset,
                    Some(metadata.len()),
                    expected_size,
                    progress,
                    &mut cancel,
                )
                .await?;
            return verify_digest(outcome, asset);
        }

        let part = part_path(destination);
        let outcome = self
            .write_stream(
                stream,
                &part,
                asset,
                Some(metadata.len()),
                expected_size,
                progress,
                &mut cancel,
            )
            .await;
        finish_part(outcome, &part, destination, asset).await
    }

    /// Hashes and (unless `sink` is empty) writes the stream, enforcing the
    /// HTML sniff, chunk timeout and cancellation between chunks.
    #[allow(clippy::too_many_arguments)]
    async fn write_stream<S>(
        &self,
        stream: S,
        sink: &Path,
        asset: &Asset,
        total: Option<u64>,
        expected_size: Option<SizeRange>,
        progress: ProgressFn<'_>,
        cancel: &mut CancelToken,
    ) -> std::result::Result<Fetched, SourceFailure>
    where
        S: futures_util::Stream<Item = std::result::Result<Vec<u8>, SourceFailure>>,
    {
        futures_util::pin_mut!(stream);
        let mut file = if sink.as_os_str().is_empty() {
            None
        } else {
            if let Some(parent) = sink.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
            }
            Some(
                tokio::fs::File::create(sink)
                    .await
                    .map_err(|err| SourceFailure::Unavailable(err.to_string()))?,
            )
        };

        let started = Instant::now();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut sniffed = false;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceFailure::Cancelled),
                next = tokio::time::timeout(self.chunk_timeout, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    return Err(SourceFailure::Transient(format!(
                        "no data for {:?}",
                        self.chunk_timeout
                    )))
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };
            if chunk.is_empty() {
                continue;
            }
            if !sniffed {
                if looks_like_html(&chunk) {
                    return Err(SourceFailure::Rejected(
                        "payload is an HTML page".to_string(),
                    ));
                }
                sniffed = true;
            }

            hasher.update(&chunk);
            if let Some(file) = file.as_mut() {
                file.write_all(&chunk)
                    .await
                    .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
            }
            downloaded += chunk.len() as u64;
            progress(FetchProgress {
                asset: asset.name.clone(),
                downloaded,
                total,
                elapsed: started.elapsed(),
            });
        }

        if let Some(mut file) = file {
            file.flush()
                .await
                .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
            file.sync_all()
                .await
                .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
        }

        if let Some(range) = expected_size {
            if !range.contains(downloaded) {
                return Err(SourceFailure::Rejected(format!(
                    "received {} bytes, outside expected range",
                    downloaded
                )));
            }
        }

        Ok(Fetched {
            sha256: hex::encode(hasher.finalize()),
            bytes: downloaded,
        })
    }

    /// GET a JSON document (release index) with the same retry policy.
    pub async fn fetch_json(&self, url: &str, cancel: &CancelToken) -> Result<Value> {
        if self.offline {
            return Err(PatchOpsError::SourceUnavailable(format!(
                "{} skipped while offline",
                url
            )));
        }
        let attempts = self.max_retries + 1;
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(PatchOpsError::Cancelled);
            }
            let response = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .timeout(self.chunk_timeout)
                .send()
                .await;
            let retryable = match response {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await?;
                    return serde_json::from_str(&body).map_err(|err| {
                        PatchOpsError::ContentRejected(format!("{}: {}", url, err))
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_failure = format!("HTTP {}", status);
                    status.is_server_error()
                        || status == reqwest::StatusCode::REQUEST_TIMEOUT
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                }
                Err(err) => {
                    last_failure = err.to_string();
                    err.is_timeout() || err.is_connect()
                }
            };
            if !retryable || attempt == attempts {
                break;
            }
            sleep(self.base_backoff * 2u32.saturating_pow(attempt - 1)).await;
        }
        Err(PatchOpsError::SourceUnavailable(format!(
            "{} -> {}",
            url, last_failure
        )))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn verify_digest(
    fetched: Fetched,
    asset: &Asset,
) -> std::result::Result<Fetched, SourceFailure> {
    match &asset.sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(&fetched.sha256) => {
            Err(SourceFailure::Checksum {
                actual: fetched.sha256,
                bytes: fetched.bytes,
            })
        }
        _ => Ok(fetched),
    }
}

/// Moves a verified `.part` file into place; removes it on any failure.
async fn finish_part(
    outcome: std::result::Result<Fetched, SourceFailure>,
    part: &Path,
    destination: &Path,
    asset: &Asset,
) -> std::result::Result<Fetched, SourceFailure> {
    let verified = outcome.and_then(|fetched| verify_digest(fetched, asset));
    match verified {
        Ok(fetched) => {
            tokio::fs::rename(part, destination)
                .await
                .map_err(|err| SourceFailure::Unavailable(err.to_string()))?;
            Ok(fetched)
        }
        Err(failure) => {
            let _ = tokio::fs::remove_file(part).await;
            Err(failure)
        }
    }
}
