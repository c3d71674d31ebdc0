//! Host-local revision repository
//!
//! The only component allowed to change which revision is live on a machine.
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   {package}/
//!     revs/{revision}/        # extracted artifact, optional ftl/{hook}
//!     current  -> revs/{revision}
//!     previous -> revs/{revision}
//! ```
//!
//! Pointer links are replaced by creating the new link under a temporary name
//! and renaming it over the old one, so a reader sees either the old or the
//! new target.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::archive;
use crate::error::{FtlError, Result};
use crate::hooks::{Hook, HookRunner};
use crate::revision::{ContentDigest, RevisionInfo};

pub const REVS_DIR: &str = "revs";
pub const CURRENT_LINK: &str = "current";
pub const PREVIOUS_LINK: &str = "previous";

/// Local mirror of package revisions rooted at a single directory.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, package: &str) -> Result<PathBuf> {
        if package.is_empty()
            || package.starts_with('.')
            || package.contains(['/', '\\', crate::revision::SEPARATOR])
        {
            return Err(FtlError::Parse(format!("Invalid package name: {:?}", package)));
        }
        Ok(self.root.join(package))
    }

    fn link_path(&self, package: &str, link: &str) -> Result<PathBuf> {
        Ok(self.package_dir(package)?.join(link))
    }

    /// `{root}/{package}/revs/{revision}`
    pub fn revision_dir(&self, revision: &RevisionInfo) -> Result<PathBuf> {
        if revision.revision.is_empty() || revision.revision.contains(['/', '\\']) {
            return Err(FtlError::Parse(format!("Invalid revision: {:?}", revision.revision)));
        }
        Ok(self
            .package_dir(&revision.package_name)?
            .join(REVS_DIR)
            .join(&revision.revision))
    }

    /// Link target stored in `current` / `previous`, relative to the package dir.
    fn link_target(revision: &RevisionInfo) -> PathBuf {
        Path::new(REVS_DIR).join(&revision.revision)
    }

    /// Packages present under the root, sorted by name.
    pub fn list_packages(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    packages.push(name.to_string());
                }
            }
        }
        packages.sort();
        Ok(packages)
    }

    /// Revisions present locally, sorted ascending by revision token.
    pub fn list_revisions(&self, package: &str) -> Result<Vec<RevisionInfo>> {
        let revs_dir = self.package_dir(package)?.join(REVS_DIR);
        let entries = match fs::read_dir(&revs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut revisions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    revisions.push(RevisionInfo::new(package, name));
                }
            }
        }
        revisions.sort();
        Ok(revisions)
    }

    fn read_link_raw(&self, package: &str, link: &str) -> Result<Option<PathBuf>> {
        match fs::read_link(self.link_path(package, link)?) {
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_pointer(&self, package: &str, link: &str) -> Result<Option<RevisionInfo>> {
        self.read_link_raw(package, link)?
            .map(|target| revision_from_target(package, &target))
            .transpose()
    }

    pub fn get_current_revision(&self, package: &str) -> Result<Option<RevisionInfo>> {
        self.read_pointer(package, CURRENT_LINK)
    }

    pub fn get_previous_revision(&self, package: &str) -> Result<Option<RevisionInfo>> {
        self.read_pointer(package, PREVIOUS_LINK)
    }

    /// Ensure `{root}/{package}/revs` exists.
    pub fn check_package(&self, package: &str) -> Result<()> {
        let package_dir = self.package_dir(package)?;
        let revs_dir = package_dir.join(REVS_DIR);
        for dir in [&package_dir, &revs_dir] {
            match fs::metadata(dir) {
                Ok(meta) if !meta.is_dir() => {
                    return Err(FtlError::Conflict(format!(
                        "{} exists but is not a directory",
                        dir.display()
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        fs::create_dir_all(&revs_dir)?;
        Ok(())
    }

    /// Store a downloaded artifact as a new local revision.
    ///
    /// The artifact is written into the revision directory while being
    /// hashed, checked against the digest prefix carried in the revision
    /// token, unpacked, and handed to the `post-spool` hook. A failed add
    /// leaves the revision directory behind.
    pub fn add<R: Read + ?Sized>(
        &self,
        revision: &RevisionInfo,
        file_name: &str,
        content: &mut R,
    ) -> Result<()> {
        if file_name.is_empty() || file_name.starts_with('.') || file_name.contains(['/', '\\']) {
            return Err(FtlError::Parse(format!("Invalid artifact name: {:?}", file_name)));
        }
        let expected = revision
            .hash_prefix()
            .ok_or_else(|| FtlError::Parse(format!("Revision {} has no digest", revision)))?
            .to_string();

        let dir = self.revision_dir(revision)?;
        fs::create_dir_all(&dir)?;

        let path = dir.join(file_name);
        let mut out = BufWriter::new(File::create(&path)?);
        let mut digest = ContentDigest::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = content.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            size += n as u64;
        }
        out.flush()?;
        drop(out);

        let actual = digest.hash_prefix();
        if actual != expected {
            tracing::warn!(
                "Checksum mismatch for {}; leaving {} for cleanup",
                revision,
                dir.display()
            );
            return Err(FtlError::ChecksumMismatch {
                revision: revision.name(),
                expected,
                actual,
            });
        }

        archive::extract(&dir, file_name)?;
        tracing::info!("Added {} ({} bytes)", revision, size);

        self.run_package_script(revision, Hook::PostSpool)
    }

    /// Delete a revision that is not currently active.
    pub fn remove(&self, revision: &RevisionInfo) -> Result<()> {
        if self.get_current_revision(&revision.package_name)?.as_ref() == Some(revision) {
            return Err(FtlError::ActiveRevisionProtected(revision.name()));
        }
        let dir = self.revision_dir(revision)?;
        if !dir.is_dir() {
            return Err(FtlError::NotFound(revision.name()));
        }
        fs::remove_dir_all(&dir)?;
        tracing::info!("Removed {}", revision);
        Ok(())
    }

    /// Make `revision` the current revision of its package.
    pub fn jump(&self, revision: &RevisionInfo) -> Result<()> {
        let package = &revision.package_name;
        let current = self.get_current_revision(package)?;
        if current.as_ref() == Some(revision) {
            tracing::debug!("{} is already current", revision);
            return Ok(());
        }

        if !self.revision_dir(revision)?.is_dir() {
            return Err(FtlError::NotFound(revision.name()));
        }

        self.run_package_script(revision, Hook::PreJump)?;

        if let Some(current) = &current {
            self.run_package_script(current, Hook::UnJump)?;
            if self.revision_dir(current)?.is_dir() {
                self.set_previous_jump(current)?;
            } else {
                tracing::warn!("Current revision {} is missing, not recording it as previous", current);
            }
        }

        replace_link(
            &self.link_path(package, CURRENT_LINK)?,
            &Self::link_target(revision),
        )?;
        tracing::info!("Jumped {} to {}", package, revision.revision);

        self.run_package_script(revision, Hook::PostJump)
    }

    /// Point `previous` at `revision`, unless it already does.
    pub fn set_previous_jump(&self, revision: &RevisionInfo) -> Result<()> {
        let package = &revision.package_name;
        if self.get_previous_revision(package)?.as_ref() == Some(revision) {
            return Ok(());
        }
        if !self.revision_dir(revision)?.is_dir() {
            return Err(FtlError::NotFound(revision.name()));
        }
        replace_link(
            &self.link_path(package, PREVIOUS_LINK)?,
            &Self::link_target(revision),
        )?;
        tracing::debug!("Previous revision of {} is now {}", package, revision.revision);
        Ok(())
    }

    /// Swap `current` and `previous`, running hooks around the swap.
    pub fn jump_back(&self, package: &str) -> Result<()> {
        let previous_target = self
            .read_link_raw(package, PREVIOUS_LINK)?
            .ok_or_else(|| FtlError::NotFound(format!("No previous revision for {}", package)))?;
        let current_target = self
            .read_link_raw(package, CURRENT_LINK)?
            .ok_or_else(|| FtlError::NotFound(format!("No current revision for {}", package)))?;

        let previous = revision_from_target(package, &previous_target)?;
        let current = revision_from_target(package, &current_target)?;

        self.run_package_script(&previous, Hook::PreJump)?;
        self.run_package_script(&current, Hook::UnJump)?;

        replace_link(&self.link_path(package, CURRENT_LINK)?, &previous_target)?;
        replace_link(&self.link_path(package, PREVIOUS_LINK)?, &current_target)?;
        tracing::info!(
            "Jumped {} back from {} to {}",
            package,
            current.revision,
            previous.revision
        );

        self.run_package_script(&previous, Hook::PostJump)
    }

    /// Run a revision's hook with the revision directory as working directory.
    pub fn run_package_script(&self, revision: &RevisionInfo, hook: Hook) -> Result<()> {
        HookRunner::new(self.revision_dir(revision)?, revision.name()).run(hook)
    }
}

fn revision_from_target(package: &str, target: &Path) -> Result<RevisionInfo> {
    target
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| RevisionInfo::new(package, name))
        .ok_or_else(|| {
            FtlError::Parse(format!(
                "Link target {} does not name a revision",
                target.display()
            ))
        })
}

/// Point `link` at `target` by renaming a freshly created link over it.
fn replace_link(link: &Path, target: &Path) -> io::Result<()> {
    let name = link
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "link has no file name"))?;
    let tmp = link.with_file_name(format!(".{}.tmp", name));

    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink_dir(target, &tmp)?;
    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replace_link_overwrites() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("revs/a")).unwrap();
        fs::create_dir_all(tmp.path().join("revs/b")).unwrap();
        let link = tmp.path().join("current");

        replace_link(&link, Path::new("revs/a")).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("revs/a"));

        replace_link(&link, Path::new("revs/b")).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("revs/b"));
        assert!(!tmp.path().join(".current.tmp").exists());
    }

    #[test]
    fn test_revision_from_target_ignores_trailing_slash() {
        let rev = revision_from_target("web", Path::new("/srv/ftl/web/revs/001Ab/")).unwrap();
        assert_eq!(rev, RevisionInfo::new("web", "001Ab"));
    }

    #[test]
    fn test_package_name_validation() {
        let repo = LocalRepository::new("/nonexistent");
        assert!(matches!(repo.check_package("../etc"), Err(FtlError::Parse(_))));
        assert!(matches!(repo.check_package("web.001"), Err(FtlError::Parse(_))));
        assert!(matches!(repo.check_package(""), Err(FtlError::Parse(_))));
    }

    #[test]
    fn test_list_on_missing_root() {
        let tmp = TempDir::new().unwrap();
        let repo = LocalRepository::new(tmp.path().join("missing"));
        assert!(repo.list_packages().unwrap().is_empty());
        assert!(repo.list_revisions("web").unwrap().is_empty());
        assert!(repo.get_current_revision("web").unwrap().is_none());
    }
}
