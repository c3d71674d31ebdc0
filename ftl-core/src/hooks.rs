//! Package lifecycle hooks
//!
//! A revision may ship executables under `ftl/` in its directory:
//! - pre-jump: runs before the revision becomes current (can abort the jump)
//! - post-jump: runs after the revision becomes current
//! - un-jump: runs on the revision being displaced
//! - post-spool: runs after the revision's content is extracted locally
//! - clean: reserved for external maintenance tooling
//!
//! Hooks run with the revision directory as working directory, no arguments,
//! and inherited stdio. A missing hook is not an error.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{FtlError, PackageScriptError, Result};

/// Directory inside a revision that holds its hooks.
pub const HOOK_DIR: &str = "ftl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreJump,
    PostJump,
    UnJump,
    PostSpool,
    Clean,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::PreJump => "pre-jump",
            Hook::PostJump => "post-jump",
            Hook::UnJump => "un-jump",
            Hook::PostSpool => "post-spool",
            Hook::Clean => "clean",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs hook scripts for a single revision directory.
pub struct HookRunner {
    revision_dir: PathBuf,
    revision_name: String,
}

impl HookRunner {
    pub fn new(revision_dir: PathBuf, revision_name: impl Into<String>) -> Self {
        Self {
            revision_dir,
            revision_name: revision_name.into(),
        }
    }

    /// Return the path to a named hook script.
    pub fn hook_path(&self, hook: Hook) -> PathBuf {
        self.revision_dir.join(HOOK_DIR).join(hook.as_str())
    }

    fn hook_exists(&self, hook: Hook) -> Option<PathBuf> {
        let p = self.hook_path(hook);
        if p.is_file() {
            Some(p)
        } else {
            None
        }
    }

    /// Execute a hook synchronously.
    ///
    /// Returns `Ok(())` if the hook is absent or exits 0, and a
    /// `PackageScriptError` carrying the exit status otherwise.
    pub fn run(&self, hook: Hook) -> Result<()> {
        let hook_path = match self.hook_exists(hook) {
            Some(p) => p,
            None => {
                tracing::trace!("No {} hook for {}", hook, self.revision_name);
                return Ok(());
            }
        };

        tracing::debug!("Running {} hook for {}", hook, self.revision_name);

        let status = Command::new(&hook_path)
            .current_dir(&self.revision_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| {
                FtlError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to execute hook '{}': {}", hook, e),
                ))
            })?;

        if status.success() {
            Ok(())
        } else {
            let exit_status = exit_status_code(status);
            tracing::warn!(
                "{} hook for {} failed with status {}",
                hook,
                self.revision_name,
                exit_status
            );
            Err(PackageScriptError {
                exit_status,
                hook_name: hook.as_str().to_string(),
                revision: self.revision_name.clone(),
            }
            .into())
        }
    }
}

#[cfg(unix)]
fn exit_status_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_status_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn make_hook(dir: &Path, hook: Hook, script: &str) {
        let hooks_dir = dir.join(HOOK_DIR);
        fs::create_dir_all(&hooks_dir).unwrap();
        let hook_path = hooks_dir.join(hook.as_str());
        fs::write(&hook_path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&hook_path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn test_no_hook_allows() {
        let tmp = TempDir::new().unwrap();
        let runner = HookRunner::new(tmp.path().to_path_buf(), "web.001");
        assert!(runner.run(Hook::PreJump).is_ok());
    }

    #[test]
    fn test_hook_success() {
        let tmp = TempDir::new().unwrap();
        make_hook(tmp.path(), Hook::PostJump, "#!/bin/sh\nexit 0\n");
        let runner = HookRunner::new(tmp.path().to_path_buf(), "web.001");
        assert!(runner.run(Hook::PostJump).is_ok());
    }

    #[test]
    fn test_hook_failure_carries_status() {
        let tmp = TempDir::new().unwrap();
        make_hook(tmp.path(), Hook::PreJump, "#!/bin/sh\necho 'not today' >&2\nexit 3\n");
        let runner = HookRunner::new(tmp.path().to_path_buf(), "web.001");
        match runner.run(Hook::PreJump) {
            Err(FtlError::PackageScript(e)) => {
                assert_eq!(e.exit_status, 3);
                assert_eq!(e.hook_name, "pre-jump");
                assert_eq!(e.revision, "web.001");
            }
            other => panic!("expected package script error, got {:?}", other),
        }
    }

    #[test]
    fn test_hook_runs_in_revision_dir() {
        let tmp = TempDir::new().unwrap();
        make_hook(tmp.path(), Hook::PostSpool, "#!/bin/sh\npwd > ran-here\n");
        let runner = HookRunner::new(tmp.path().to_path_buf(), "web.001");
        runner.run(Hook::PostSpool).unwrap();

        let recorded = fs::read_to_string(tmp.path().join("ran-here")).unwrap();
        assert_eq!(
            fs::canonicalize(recorded.trim()).unwrap(),
            fs::canonicalize(tmp.path()).unwrap()
        );
    }

    #[test]
    fn test_hooks_are_independent() {
        let tmp = TempDir::new().unwrap();
        make_hook(tmp.path(), Hook::UnJump, "#!/bin/sh\nexit 1\n");
        let runner = HookRunner::new(tmp.path().to_path_buf(), "web.001");
        assert!(runner.run(Hook::PreJump).is_ok());
        assert!(runner.run(Hook::UnJump).is_err());
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::PreJump.to_string(), "pre-jump");
        assert_eq!(Hook::UnJump.as_str(), "un-jump");
        assert_eq!(Hook::Clean.as_str(), "clean");
    }
}
