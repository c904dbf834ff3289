//! Per-job staging namespace.
//!
//! Every job gets its own directory under the staging root holding the
//! source, the watermarked intermediate and the flattened result. Jobs never
//! share files, so any number can run side by side. The directory goes away
//! when the job is released or dropped, on success and on every failure path.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const JOB_PREFIX: &str = "pdfseal-job-";

/// Artifacts a job stages, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Source,
    Watermarked,
    Flattened,
}

impl Artifact {
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Source => "source.pdf",
            Artifact::Watermarked => "watermarked.pdf",
            Artifact::Flattened => "flattened.pdf",
        }
    }
}

/// An isolated temporary namespace for one watermark-and-flatten run.
#[derive(Debug)]
pub struct PipelineJob {
    id: String,
    dir: TempDir,
}

impl PipelineJob {
    /// Create a fresh namespace under `staging_root` (system temp dir if
    /// `None`).
    pub fn create(staging_root: Option<&Path>) -> Result<Self, PipelineError> {
        let root = staging_root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix(JOB_PREFIX)
            .tempdir_in(&root)
            .map_err(|e| PipelineError::staging(&root, e))?;
        let id = dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("Created job namespace {}", dir.path().display());
        Ok(Self { id, dir })
    }

    /// Name of the namespace directory, for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.dir.path().join(artifact.file_name())
    }

    /// Write an artifact into the namespace.
    ///
    /// The bytes land under a temporary name first and are renamed into
    /// place, so a reader never sees a half-written artifact.
    pub async fn store(&self, artifact: Artifact, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let dest = self.artifact_path(artifact);
        let partial = dest.with_extension("pdf.partial");
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| PipelineError::staging(&partial, e))?;
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| PipelineError::staging(&dest, e))?;
        debug!("Staged {} ({} bytes)", dest.display(), bytes.len());
        Ok(dest)
    }

    /// Delete the namespace, reporting a failure instead of ignoring it.
    pub fn release(self) -> Result<(), PipelineError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|source| {
            warn!("Failed to release job namespace {}: {}", path.display(), source);
            PipelineError::StagingRelease { path, source }
        })
    }
}
