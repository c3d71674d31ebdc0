//! Error types shared by the remote and local repositories.

use std::fmt;

use crate::store::StoreError;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, FtlError>;

/// A lifecycle hook exited unsuccessfully. `exit_status` becomes the process
/// exit status of the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageScriptError {
    pub exit_status: i32,
    pub hook_name: String,
    pub revision: String,
}

impl fmt::Display for PackageScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hook '{}' for {} exited with status {}",
            self.hook_name, self.revision, self.exit_status
        )
    }
}

impl std::error::Error for PackageScriptError {}

/// Errors that can occur while managing revisions
#[derive(Debug, thiserror::Error)]
pub enum FtlError {
    #[error("Object store error: {0}")]
    Transport(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0}")]
    Parse(String),

    #[error("Checksum mismatch for {revision}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        revision: String,
        expected: String,
        actual: String,
    },

    #[error("Refusing to remove active revision {0}")]
    ActiveRevisionProtected(String),

    #[error(transparent)]
    PackageScript(#[from] PackageScriptError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed downloading revisions ({failed} of {total} failed)")]
    DownloadFailed {
        failed: usize,
        total: usize,
        errors: Vec<FtlError>,
    },

    #[error("Sync failed for {failed} of {total} packages")]
    SyncFailed {
        failed: usize,
        total: usize,
        errors: Vec<FtlError>,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl FtlError {
    /// Process exit status for this error: the hook's own status for a
    /// failed package script, 1 for everything else. Batch failures report
    /// the first collected error that carries a hook status.
    pub fn exit_code(&self) -> i32 {
        match self {
            FtlError::PackageScript(e) => e.exit_status,
            FtlError::DownloadFailed { errors, .. } | FtlError::SyncFailed { errors, .. } => errors
                .iter()
                .map(FtlError::exit_code)
                .find(|code| *code != 1)
                .unwrap_or(1),
            _ => 1,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FtlError::NotFound(_) | FtlError::Transport(StoreError::NotFound(_))
        )
    }
}
