//! Source resolution: bring a local path, an HTTP(S) URL or in-memory bytes
//! into a job's namespace as `source.pdf`.
//!
//! The `%PDF` magic is checked before anything is staged, so a web page or
//! an image handed in by mistake fails as a decode error rather than deep
//! inside a rendering backend.

use crate::error::PipelineError;
use crate::job::{Artifact, PipelineJob};
use crate::pipeline::document;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read `source` (path or URL) and stage it into `job`.
///
/// Returns the source bytes for the first stage.
pub async fn stage_source(
    source: &str,
    job: &PipelineJob,
    download_timeout_secs: u64,
) -> Result<Vec<u8>, PipelineError> {
    let bytes = read_source(source, download_timeout_secs).await?;
    stage_bytes(bytes, job).await
}

/// Fetch `source` (path or URL) into memory without staging it.
pub async fn read_source(source: &str, download_timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    if is_url(source) {
        download_url(source, download_timeout_secs).await
    } else {
        read_local(source).await
    }
}

/// Stage bytes already in memory into `job`.
pub async fn stage_bytes(bytes: Vec<u8>, job: &PipelineJob) -> Result<Vec<u8>, PipelineError> {
    document::check_magic(&bytes)?;
    job.store(Artifact::Source, &bytes).await?;
    Ok(bytes)
}

/// Read a local file, mapping the common failures to typed errors.
async fn read_local(path_str: &str) -> Result<Vec<u8>, PipelineError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local PDF {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::FileNotFound { path }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(PipelineError::PermissionDenied { path })
        }
        Err(e) => Err(PipelineError::staging(path, e)),
    }
}

/// Download `url` into memory under an overall timeout.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.map_err(classify)?);
    }

    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes)
}
