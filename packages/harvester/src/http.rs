//! Artifact downloader: fetch result sheets with retry and classify them.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use tempfile::NamedTempFile;

use crate::config::DownloadPolicy;
use crate::error::{HarvesterError, Result};
use crate::types::{ArtifactKind, ArtifactRecord, ArtifactStatus, HierarchyNode};

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("election-harvester/", env!("CARGO_PKG_VERSION"));

/// Something that can turn a polling-unit URL into an artifact on disk.
///
/// The crawl only ever talks to this trait so tests can swap in a fake.
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `url` for `node`, storing it at `destination` plus an extension
    /// chosen from the declared content type.
    ///
    /// Non-document responses yield a record with `ArtifactStatus::Failed`
    /// and nothing on disk. Exhausted retries yield
    /// `HarvesterError::DownloadFailure`.
    fn fetch(
        &self,
        node: &Arc<HierarchyNode>,
        url: &str,
        destination: &Path,
    ) -> Result<ArtifactRecord>;
}

/// Create a configured blocking HTTP client.
///
/// # Arguments
/// * `policy` - download policy providing the per-attempt timeout
pub fn create_client(policy: &DownloadPolicy) -> Result<Client> {
    let client = Client::builder()
        .timeout(policy.attempt_timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Why a single attempt did not produce an artifact.
enum AttemptError {
    /// Transport-level problem; try again after the delay.
    Transient(String),
    /// Retrying will not help.
    Fatal(HarvesterError),
}

/// HTTP-backed [`ArtifactFetcher`] with fixed-delay retry.
pub struct HttpDownloader {
    client: Client,
    policy: DownloadPolicy,
}

impl HttpDownloader {
    /// Create a downloader with its own client.
    pub fn new(policy: DownloadPolicy) -> Result<Self> {
        let client = create_client(&policy)?;
        Ok(Self { client, policy })
    }

    fn attempt(
        &self,
        node: &Arc<HierarchyNode>,
        url: &str,
        destination: &Path,
    ) -> std::result::Result<ArtifactRecord, AttemptError> {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(AttemptError::Fatal(HarvesterError::Http(e))),
            Err(e) => return Err(AttemptError::Transient(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP status {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let kind = ArtifactKind::from_content_type(&content_type);
        let local_path = with_extension(destination, &kind.extension(&content_type));

        if !kind.is_document() {
            return Ok(ArtifactRecord {
                node: Arc::clone(node),
                local_path,
                kind,
                content_type,
                status: ArtifactStatus::Failed,
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.policy.max_response_size {
                return Err(AttemptError::Fatal(self.too_large(url)));
            }
        }

        self.store(response, url, &local_path)?;

        Ok(ArtifactRecord {
            node: Arc::clone(node),
            local_path,
            kind,
            content_type,
            status: ArtifactStatus::Downloaded,
        })
    }

    /// Stream the body into a temp file next to `path`, then rename it into place.
    fn store(
        &self,
        response: Response,
        url: &str,
        path: &Path,
    ) -> std::result::Result<(), AttemptError> {
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| AttemptError::Fatal(e.into()))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| AttemptError::Fatal(e.into()))?;
        let mut limited = response.take(self.policy.max_response_size + 1);
        let written = io::copy(&mut limited, temp.as_file_mut())
            .map_err(|e| AttemptError::Transient(format!("reading body: {e}")))?;

        if written > self.policy.max_response_size {
            return Err(AttemptError::Fatal(self.too_large(url)));
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        temp.persist(path)
            .map_err(|e| AttemptError::Fatal(HarvesterError::Io(e.error)))?;
        Ok(())
    }

    fn too_large(&self, url: &str) -> HarvesterError {
        HarvesterError::ResponseTooLarge {
            url: url.to_string(),
            max_bytes: self.policy.max_response_size,
        }
    }
}

impl ArtifactFetcher for HttpDownloader {
    fn fetch(
        &self,
        node: &Arc<HierarchyNode>,
        url: &str,
        destination: &Path,
    ) -> Result<ArtifactRecord> {
        let mut last_error: Option<String> = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                tracing::debug!(
                    attempt,
                    delay_ms = self.policy.retry_delay.as_millis() as u64,
                    "Retrying after delay"
                );
                thread::sleep(self.policy.retry_delay);
            }

            match self.attempt(node, url, destination) {
                Ok(record) => return Ok(record),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(message)) => {
                    tracing::warn!(
                        url,
                        error = %message,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        "Download attempt failed"
                    );
                    last_error = Some(message);
                }
            }
        }

        Err(HarvesterError::DownloadFailure {
            url: url.to_string(),
            attempts: self.policy.max_attempts,
            last_error: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Append an extension to a destination stem.
///
/// Sanitized names never contain dots, so appending is always safe.
fn with_extension(destination: &Path, extension: &str) -> PathBuf {
    let mut path = destination.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}
