//! Runtime configuration.
//!
//! Read from an optional JSON file, then overridden by command-line flags and
//! environment variables before being handed to the repositories.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FtlError, Result};

pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtlConfig {
    /// Local repository root.
    pub root: Option<PathBuf>,
    /// Remote bucket: a directory path or `file://` URL.
    pub bucket: Option<String>,
    /// Maximum concurrent downloads during a sync.
    pub download_workers: usize,
}

impl Default for FtlConfig {
    fn default() -> Self {
        Self {
            root: None,
            bucket: None,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
        }
    }
}

impl FtlConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            FtlError::Config(format!("Failed to read config from {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            FtlError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    pub fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| FtlError::Config("No FTL root configured (--ftl-root or FTL_ROOT)".into()))
    }

    /// Directory backing the remote store.
    pub fn bucket_path(&self) -> Result<PathBuf> {
        let bucket = self.bucket.as_deref().ok_or_else(|| {
            FtlError::Config("No FTL bucket configured (--ftl-bucket or FTL_BUCKET)".into())
        })?;
        if let Some(path) = bucket.strip_prefix(FILE_SCHEME) {
            return Ok(PathBuf::from(path));
        }
        if bucket.contains("://") {
            return Err(FtlError::Config(format!("Unsupported bucket URL: {}", bucket)));
        }
        Ok(PathBuf::from(bucket))
    }

    pub fn download_workers(&self) -> usize {
        self.download_workers.max(1)
    }
}
