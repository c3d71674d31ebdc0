//! Remote revision repository
//!
//! Artifacts and pointers live side by side in a flat object store:
//! ```text
//! <package>.<revision>.<ext>   # artifact
//! <package>.current            # payload: <package>.<revision>
//! <package>.previous           # payload: <package>.<revision>
//! <package>.rev                # legacy current pointer, migrated on read
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::error::{FtlError, Result};
use crate::revision::{build_revision_id, build_revision_id_at, RevisionInfo, SEPARATOR};
use crate::store::{ObjectStore, PutOptions, StoreError, StreamReader};

const CURRENT_POINTER: &str = "current";
const PREVIOUS_POINTER: &str = "previous";
const LEGACY_POINTER: &str = "rev";

/// Package revisions and pointers held in an object store.
#[derive(Clone)]
pub struct RemoteRepository {
    store: Arc<dyn ObjectStore>,
}

impl RemoteRepository {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Distinct package names found in the store.
    pub async fn list_packages(&self) -> Result<Vec<String>> {
        let listing = self.store.list("", Some(SEPARATOR)).await?;
        Ok(listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.strip_suffix(SEPARATOR))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Revisions of `package` in store order.
    pub async fn list_revisions(&self, package: &str) -> Result<Vec<RevisionInfo>> {
        let prefix = format!("{}{}", package, SEPARATOR);
        let listing = self.store.list(&prefix, Some(SEPARATOR)).await?;
        Ok(listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|p| p.strip_suffix(SEPARATOR))
            .filter(|r| !r.is_empty())
            .map(|r| RevisionInfo::new(package, r))
            .collect())
    }

    /// Upload the file at `path` as a new revision of the package named by
    /// its base name.
    pub async fn spool(&self, path: &Path) -> Result<RevisionInfo> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FtlError::Parse(format!("No file name in {}", path.display())))?
            .to_string();
        let (package, ext) = split_artifact_name(&file_name)?;

        let hash_path = path.to_path_buf();
        let (token, length) = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let mut file = std::fs::File::open(&hash_path)?;
            let length = file.metadata()?.len();
            let token = build_revision_id(&mut file)?;
            Ok((token, length))
        })
        .await
        .map_err(|e| FtlError::Task(e.to_string()))??;

        let revision = RevisionInfo::new(package, token);
        let file = tokio::fs::File::open(path).await?;
        self.upload(&revision, ext, Box::new(file), length).await?;
        Ok(revision)
    }

    /// Upload in-memory content as a new revision, stamped with `now`.
    pub async fn spool_bytes_at(
        &self,
        file_name: &str,
        content: Bytes,
        now: DateTime<Utc>,
    ) -> Result<RevisionInfo> {
        let (package, ext) = split_artifact_name(file_name)?;
        let token = build_revision_id_at(&mut Cursor::new(&content[..]), now)?;
        let revision = RevisionInfo::new(package, token);
        let length = content.len() as u64;
        self.upload(&revision, ext, Box::new(Cursor::new(content)), length)
            .await?;
        Ok(revision)
    }

    async fn upload(
        &self,
        revision: &RevisionInfo,
        ext: &str,
        reader: StreamReader,
        length: u64,
    ) -> Result<()> {
        let key = format!("{}{}{}", revision.name(), SEPARATOR, ext);
        self.store
            .put_stream(&key, reader, length, &PutOptions::artifact())
            .await?;
        tracing::info!("Spooled {} ({} bytes)", revision, length);
        Ok(())
    }

    fn pointer_key(package: &str, pointer: &str) -> String {
        format!("{}{}{}", package, SEPARATOR, pointer)
    }

    async fn read_pointer(&self, package: &str, pointer: &str) -> Result<Option<RevisionInfo>> {
        match self.store.get(&Self::pointer_key(package, pointer)).await {
            Ok(payload) => parse_pointer(package, &payload).map(Some),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_pointer(&self, pointer: &str, revision: &RevisionInfo) -> Result<()> {
        let key = Self::pointer_key(&revision.package_name, pointer);
        tracing::debug!("{} <- {}", key, revision);
        self.store
            .put(&key, Bytes::from(revision.name()), &PutOptions::pointer())
            .await?;
        Ok(())
    }

    /// Current revision of `package`, migrating a legacy pointer if that is
    /// all the store has.
    pub async fn get_current_revision(&self, package: &str) -> Result<Option<RevisionInfo>> {
        if let Some(current) = self.read_pointer(package, CURRENT_POINTER).await? {
            return Ok(Some(current));
        }

        let legacy = match self.read_pointer(package, LEGACY_POINTER).await? {
            Some(revision) => revision,
            None => return Ok(None),
        };
        self.write_pointer(CURRENT_POINTER, &legacy).await?;
        self.store
            .delete(&Self::pointer_key(package, LEGACY_POINTER))
            .await?;
        tracing::info!("Migrated legacy pointer for {} to {}", package, legacy);
        Ok(Some(legacy))
    }

    pub async fn get_previous_revision(&self, package: &str) -> Result<Option<RevisionInfo>> {
        self.read_pointer(package, PREVIOUS_POINTER).await
    }

    fn revision_prefix(revision: &RevisionInfo) -> String {
        format!("{}{}", revision.name(), SEPARATOR)
    }

    pub async fn revision_exists(&self, revision: &RevisionInfo) -> Result<bool> {
        let listing = self
            .store
            .list(&Self::revision_prefix(revision), None)
            .await?;
        Ok(!listing.objects.is_empty())
    }

    /// Make `revision` current, recording the displaced revision as previous.
    pub async fn jump(&self, revision: &RevisionInfo) -> Result<()> {
        let current = self.get_current_revision(&revision.package_name).await?;
        if current.as_ref() == Some(revision) {
            tracing::debug!("{} is already current", revision);
            return Ok(());
        }
        if !self.revision_exists(revision).await? {
            return Err(FtlError::NotFound(revision.name()));
        }

        if let Some(current) = &current {
            self.write_pointer(PREVIOUS_POINTER, current).await?;
        }
        self.write_pointer(CURRENT_POINTER, revision).await?;
        tracing::info!("Jumped remote {} to {}", revision.package_name, revision.revision);
        Ok(())
    }

    /// Swap the current and previous pointers.
    pub async fn jump_back(&self, package: &str) -> Result<()> {
        let current = self.get_current_revision(package).await?;
        let previous = self.get_previous_revision(package).await?;
        let (current, previous) = match (current, previous) {
            (Some(current), Some(previous)) => (current, previous),
            (None, _) => {
                return Err(FtlError::Conflict(format!("{} has no current revision", package)))
            }
            (_, None) => {
                return Err(FtlError::Conflict(format!("{} has no previous revision", package)))
            }
        };

        self.write_pointer(CURRENT_POINTER, &previous).await?;
        self.write_pointer(PREVIOUS_POINTER, &current).await?;
        tracing::info!(
            "Jumped remote {} back from {} to {}",
            package,
            current.revision,
            previous.revision
        );
        Ok(())
    }

    /// Delete every object of a non-current revision.
    pub async fn purge_revision(&self, revision: &RevisionInfo) -> Result<()> {
        let current = self.get_current_revision(&revision.package_name).await?;
        if current.as_ref() == Some(revision) {
            return Err(FtlError::ActiveRevisionProtected(revision.name()));
        }

        let listing = self
            .store
            .list(&Self::revision_prefix(revision), None)
            .await?;
        if listing.objects.is_empty() {
            return Err(FtlError::NotFound(revision.name()));
        }
        for key in &listing.objects {
            self.store.delete(key).await?;
        }
        tracing::info!("Purged remote {} ({} objects)", revision, listing.objects.len());
        Ok(())
    }

    /// Fetch the artifact of `revision`, returning its object key and body.
    pub async fn get_revision_reader(&self, revision: &RevisionInfo) -> Result<(String, Bytes)> {
        let listing = self
            .store
            .list(&Self::revision_prefix(revision), None)
            .await?;
        let key = listing
            .objects
            .into_iter()
            .next()
            .ok_or_else(|| FtlError::NotFound(revision.name()))?;
        let data = self.store.get(&key).await?;
        tracing::debug!("Fetched {} ({} bytes)", key, data.len());
        Ok((key, data))
    }
}

/// Split `web.tar.gz` into (`web`, `tar.gz`).
fn split_artifact_name(file_name: &str) -> Result<(&str, &str)> {
    match file_name.split_once(SEPARATOR) {
        Some((base, ext)) if !base.is_empty() && !ext.is_empty() => Ok((base, ext)),
        _ => Err(FtlError::Parse(format!(
            "'{}' needs a package name and an extension",
            file_name
        ))),
    }
}

/// Pointer payloads are `<package>.<revision>`, or a bare revision token in
/// the legacy format.
fn parse_pointer(package: &str, payload: &[u8]) -> Result<RevisionInfo> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| FtlError::Parse(format!("Pointer for {} is not UTF-8", package)))?
        .trim();
    if text.is_empty() {
        return Err(FtlError::Parse(format!("Pointer for {} is empty", package)));
    }
    if text.contains(SEPARATOR) {
        RevisionInfo::parse(text)
    } else {
        Ok(RevisionInfo::new(package, text))
    }
}
