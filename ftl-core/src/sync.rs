//! Bringing a host's local repository in line with the remote one.
//!
//! A sync of one package runs in a fixed order:
//! metadata → reconcile → downloads → activation → purge.
//! Packages are synced one after another; downloads within a package fan out
//! over a bounded pool.

use serde::Serialize;

use crate::error::{FtlError, Result};
use crate::local::LocalRepository;
use crate::pool::run_bounded;
use crate::remote::RemoteRepository;
use crate::revision::RevisionInfo;

/// What a sync must do to the local side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub download: Vec<RevisionInfo>,
    pub purge: Vec<RevisionInfo>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.download.is_empty() && self.purge.is_empty()
    }
}

/// Merge two ascending revision lists into a download set and a purge set.
///
/// Remote revisions older than `floor` are never downloaded. Local revisions
/// still listed remotely are kept even below the floor; everything else only
/// present locally is purged.
pub fn reconcile(
    remote: &[RevisionInfo],
    local: &[RevisionInfo],
    floor: Option<&RevisionInfo>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let (mut i, mut j) = (0, 0);

    loop {
        match (remote.get(i), local.get(j)) {
            (None, None) => break,
            (None, Some(l)) => {
                plan.purge.push(l.clone());
                j += 1;
            }
            (Some(r), Some(l)) if r == l => {
                i += 1;
                j += 1;
            }
            (Some(r), _) if floor.is_some_and(|f| r < f) => {
                i += 1;
            }
            (Some(r), None) => {
                plan.download.push(r.clone());
                i += 1;
            }
            (Some(r), Some(l)) if r < l => {
                plan.download.push(r.clone());
                i += 1;
            }
            (Some(_), Some(l)) => {
                plan.purge.push(l.clone());
                j += 1;
            }
        }
    }

    plan
}

/// Remote pointers and revisions of one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    pub current: Option<RevisionInfo>,
    pub previous: Option<RevisionInfo>,
    /// Sorted ascending
    pub revisions: Vec<RevisionInfo>,
}

impl RemoteState {
    /// Oldest revision worth keeping: the earlier of current and previous.
    pub fn floor(&self) -> Option<&RevisionInfo> {
        match (&self.current, &self.previous) {
            (Some(current), Some(previous)) => Some(current.min(previous)),
            (current, previous) => current.as_ref().or(previous.as_ref()),
        }
    }
}

/// Fetch current, previous and the revision list concurrently.
pub async fn fetch_remote_state(remote: &RemoteRepository, package: &str) -> Result<RemoteState> {
    let (current, previous, revisions) = tokio::join!(
        remote.get_current_revision(package),
        remote.get_previous_revision(package),
        remote.list_revisions(package),
    );

    let mut revisions = revisions?;
    revisions.sort();
    Ok(RemoteState {
        current: current?,
        previous: previous?,
        revisions,
    })
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FtlError::Task(e.to_string()))?
}

/// Download and add `revisions` locally with at most `workers` in flight.
///
/// All downloads run to completion; the batch fails if any one of them did.
pub async fn download_revisions(
    remote: &RemoteRepository,
    local: &LocalRepository,
    revisions: Vec<RevisionInfo>,
    workers: usize,
) -> Result<Vec<RevisionInfo>> {
    let total = revisions.len();
    let results = run_bounded(revisions, workers, |revision| {
        let remote = remote.clone();
        let local = local.clone();
        async move {
            tracing::info!("Downloading {}", revision);
            let (key, data) = remote.get_revision_reader(&revision).await?;
            let added = revision.clone();
            blocking(move || local.add(&added, &key, &mut &data[..])).await?;
            Ok(revision)
        }
    })
    .await;

    let mut downloaded = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(revision) => downloaded.push(revision),
            Err(e) => {
                tracing::error!("Download failed: {}", e);
                errors.push(e);
            }
        }
    }

    if !errors.is_empty() {
        return Err(FtlError::DownloadFailed {
            failed: errors.len(),
            total,
            errors,
        });
    }
    Ok(downloaded)
}

/// Outcome of syncing one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub package: String,
    pub downloaded: Vec<RevisionInfo>,
    pub purged: Vec<RevisionInfo>,
    /// Set when the local current revision changed
    pub activated: Option<RevisionInfo>,
}

/// Result of syncing every local package.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub reports: Vec<SyncReport>,
    /// Packages whose sync failed, with the error that stopped them
    pub failures: Vec<(String, FtlError)>,
}

impl SyncOutcome {
    /// The reports, or `SyncFailed` carrying every package error.
    pub fn into_result(self) -> Result<Vec<SyncReport>> {
        if self.failures.is_empty() {
            return Ok(self.reports);
        }
        Err(FtlError::SyncFailed {
            failed: self.failures.len(),
            total: self.failures.len() + self.reports.len(),
            errors: self.failures.into_iter().map(|(_, e)| e).collect(),
        })
    }
}

/// Drives package syncs between one remote and one local repository.
#[derive(Clone)]
pub struct Syncer {
    remote: RemoteRepository,
    local: LocalRepository,
    workers: usize,
}

impl Syncer {
    pub fn new(remote: RemoteRepository, local: LocalRepository, workers: usize) -> Self {
        Self {
            remote,
            local,
            workers,
        }
    }

    pub async fn sync_package(&self, package: &str) -> Result<SyncReport> {
        let pkg = package.to_string();
        let local = self.local.clone();
        blocking(move || local.check_package(&pkg)).await?;

        let state = fetch_remote_state(&self.remote, package).await?;

        let pkg = package.to_string();
        let local = self.local.clone();
        let local_revisions = blocking(move || local.list_revisions(&pkg)).await?;

        let plan = reconcile(&state.revisions, &local_revisions, state.floor());
        tracing::info!(
            "{}: {} to download, {} to purge",
            package,
            plan.download.len(),
            plan.purge.len()
        );

        let downloaded =
            download_revisions(&self.remote, &self.local, plan.download, self.workers).await?;

        let mut activated = None;
        if let Some(current) = state.current.clone() {
            let local = self.local.clone();
            let changed = blocking(move || {
                let before = local.get_current_revision(&current.package_name)?;
                local.jump(&current)?;
                Ok((before.as_ref() != Some(&current)).then_some(current))
            })
            .await?;
            activated = changed;
        }

        if let Some(previous) = state.previous.clone() {
            let local = self.local.clone();
            blocking(move || {
                if local.revision_dir(&previous)?.is_dir() {
                    local.set_previous_jump(&previous)
                } else {
                    tracing::warn!("Previous revision {} is not present locally", previous);
                    Ok(())
                }
            })
            .await?;
        }

        let pkg = package.to_string();
        let local = self.local.clone();
        let local_previous = blocking(move || local.get_previous_revision(&pkg)).await?;

        let mut purged = Vec::with_capacity(plan.purge.len());
        for revision in plan.purge {
            if local_previous.as_ref() == Some(&revision) {
                tracing::warn!("Not purging {}, it is the rollback target", revision);
                continue;
            }
            let local = self.local.clone();
            let target = revision.clone();
            match blocking(move || local.remove(&target)).await {
                Ok(()) => purged.push(revision),
                Err(FtlError::ActiveRevisionProtected(name)) => {
                    tracing::warn!("Not purging active revision {}", name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SyncReport {
            package: package.to_string(),
            downloaded,
            purged,
            activated,
        })
    }

    /// Sync every package known locally, one at a time.
    ///
    /// A failing package does not stop the others; its error is collected in
    /// the outcome.
    pub async fn sync_all(&self) -> Result<SyncOutcome> {
        let local = self.local.clone();
        let packages = blocking(move || local.list_packages()).await?;

        let mut outcome = SyncOutcome::default();
        for package in packages {
            match self.sync_package(&package).await {
                Ok(report) => outcome.reports.push(report),
                Err(e) => {
                    tracing::error!("Sync of {} failed: {}", package, e);
                    outcome.failures.push((package, e));
                }
            }
        }
        Ok(outcome)
    }
}
