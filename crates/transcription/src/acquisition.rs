//! Source acquisition: brings a referenced asset into a session's acquisition
//! area and enforces size and duration limits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use longform_config::AcquisitionSettings;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::AcquisitionError;
use crate::pipeline::detect_duration_secs;

#[derive(Debug, Clone)]
pub struct FetchConstraints {
    pub max_duration_secs: f64,
    pub max_size_bytes: u64,
}

impl From<&AcquisitionSettings> for FetchConstraints {
    fn from(settings: &AcquisitionSettings) -> Self {
        Self {
            max_duration_secs: settings.max_duration_secs,
            max_size_bytes: settings.max_size_bytes,
        }
    }
}

impl FetchConstraints {
    fn check_size(&self, size_bytes: u64) -> Result<(), AcquisitionError> {
        if size_bytes > self.max_size_bytes {
            return Err(AcquisitionError::TooLarge {
                size_bytes,
                limit_bytes: self.max_size_bytes,
            });
        }
        Ok(())
    }

    fn check_duration(&self, duration_secs: Option<f64>) -> Result<(), AcquisitionError> {
        match duration_secs {
            Some(d) if d > self.max_duration_secs => Err(AcquisitionError::TooLong {
                duration_secs: d,
                limit_secs: self.max_duration_secs,
            }),
            _ => Ok(()),
        }
    }
}

/// A source copied into the session workspace.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub path: PathBuf,
    /// Detected duration; `None` when the container could not be read.
    pub duration_estimate: Option<f64>,
    pub size_bytes: u64,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    /// Retrieves `reference` into `dest_dir`.
    async fn fetch(
        &self,
        reference: &str,
        constraints: &FetchConstraints,
        dest_dir: &Path,
    ) -> Result<FetchedSource, AcquisitionError>;
}

/// Copies files from the local filesystem. Accepts plain paths and `file://` URLs.
#[derive(Debug, Default, Clone)]
pub struct LocalFileFetcher;

#[async_trait]
impl SourceFetcher for LocalFileFetcher {
    async fn fetch(
        &self,
        reference: &str,
        constraints: &FetchConstraints,
        dest_dir: &Path,
    ) -> Result<FetchedSource, AcquisitionError> {
        let source = PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference));
        let metadata = match tokio::fs::metadata(&source).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(AcquisitionError::NotFound(reference.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AcquisitionError::NotFound(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        constraints.check_size(metadata.len())?;

        let target = dest_dir.join(target_name(source.extension().and_then(|e| e.to_str())));
        tokio::fs::copy(&source, &target).await?;

        let duration_estimate = detect_duration_secs(&target).await;
        constraints.check_duration(duration_estimate)?;

        debug!(
            source = %source.display(),
            size_bytes = metadata.len(),
            ?duration_estimate,
            "Local source acquired"
        );
        Ok(FetchedSource {
            path: target,
            duration_estimate,
            size_bytes: metadata.len(),
        })
    }
}

/// Downloads `http://` and `https://` references.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        reference: &str,
        constraints: &FetchConstraints,
        dest_dir: &Path,
    ) -> Result<FetchedSource, AcquisitionError> {
        let mut response = self
            .client
            .get(reference)
            .send()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AcquisitionError::NotFound(reference.to_string()));
        }
        if !status.is_success() {
            return Err(AcquisitionError::Network(format!(
                "download failed with status {status}"
            )));
        }
        if let Some(len) = response.content_length() {
            constraints.check_size(len)?;
        }

        let extension = reference
            .rsplit('/')
            .next()
            .and_then(|name| name.split(['?', '#']).next())
            .and_then(|name| Path::new(name).extension())
            .and_then(|e| e.to_str())
            .map(str::to_string);
        let target = dest_dir.join(target_name(extension.as_deref()));
        let mut file = tokio::fs::File::create(&target).await?;

        let mut size_bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?
        {
            size_bytes += chunk.len() as u64;
            constraints.check_size(size_bytes)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let duration_estimate = detect_duration_secs(&target).await;
        constraints.check_duration(duration_estimate)?;

        info!(
            url = reference,
            size_bytes,
            ?duration_estimate,
            "Remote source downloaded"
        );
        Ok(FetchedSource {
            path: target,
            duration_estimate,
            size_bytes,
        })
    }
}

/// Dispatches on the reference scheme: `http(s)://` goes to the HTTP fetcher,
/// plain paths and `file://` to the local one.
pub struct RoutingFetcher {
    local: LocalFileFetcher,
    http: HttpFetcher,
}

impl RoutingFetcher {
    pub fn new(settings: &AcquisitionSettings) -> Result<Self, AcquisitionError> {
        Ok(Self {
            local: LocalFileFetcher,
            http: HttpFetcher::new(Duration::from_secs(settings.http_timeout_secs))?,
        })
    }
}

#[async_trait]
impl SourceFetcher for RoutingFetcher {
    async fn fetch(
        &self,
        reference: &str,
        constraints: &FetchConstraints,
        dest_dir: &Path,
    ) -> Result<FetchedSource, AcquisitionError> {
        match reference.split_once("://").map(|(scheme, _)| scheme) {
            Some("http") | Some("https") => self.http.fetch(reference, constraints, dest_dir).await,
            Some("file") | None => self.local.fetch(reference, constraints, dest_dir).await,
            Some(other) => Err(AcquisitionError::Unsupported(format!(
                "scheme '{other}' in {reference}"
            ))),
        }
    }
}

fn target_name(extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("source.{}", ext.to_ascii_lowercase()),
        _ => "source.bin".to_string(),
    }
}
