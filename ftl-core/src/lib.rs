//! FTL Core Library
//!
//! Revision-based deployment of opaque package artifacts:
//! - Revision identity (timestamp + content digest prefix)
//! - Object store abstraction (in-memory and directory-backed)
//! - Remote repository: artifacts plus current/previous pointers
//! - Local repository: extracted revisions, symlink pointers, lifecycle hooks
//! - Reconciliation and bounded concurrent sync

pub mod archive;
pub mod config;
pub mod error;
pub mod hooks;
pub mod local;
pub mod pool;
pub mod remote;
pub mod revision;
pub mod store;
pub mod sync;

pub use config::{FtlConfig, DEFAULT_DOWNLOAD_WORKERS};
pub use error::{FtlError, PackageScriptError, Result};
pub use hooks::{Hook, HookRunner};
pub use local::LocalRepository;
pub use remote::RemoteRepository;
pub use revision::{build_revision_id, RevisionInfo};
pub use store::{Acl, DirectoryStore, Listing, MemoryStore, ObjectStore, PutOptions, StoreError};
pub use sync::{
    download_revisions, fetch_remote_state, reconcile, RemoteState, SyncOutcome, SyncPlan,
    SyncReport, Syncer,
};
