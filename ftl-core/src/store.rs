//! Object store abstraction for the remote repository
//!
//! The remote repository only needs a flat keyed blob store with
//! delimiter-based listing. Two implementations ship here: an in-memory store
//! and a directory-backed store where each key is one file.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Access control applied to uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acl {
    #[default]
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

/// Metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub acl: Acl,
}

impl PutOptions {
    pub fn new(content_type: impl Into<String>, acl: Acl) -> Self {
        Self {
            content_type: content_type.into(),
            acl,
        }
    }

    /// Options for artifact blobs.
    pub fn artifact() -> Self {
        Self::new("application/octet-stream", Acl::Private)
    }

    /// Options for pointer objects.
    pub fn pointer() -> Self {
        Self::new("text/plain", Acl::Private)
    }
}

/// Result of a delimiter listing: keys that continue past the delimiter are
/// rolled up into `common_prefixes` (delimiter included), the rest are objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub common_prefixes: Vec<String>,
    pub objects: Vec<String>,
}

impl Listing {
    /// Group `keys` under `prefix` the way an S3-style delimiter listing does.
    pub fn from_keys<I, S>(keys: I, prefix: &str, delimiter: Option<char>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes = BTreeSet::new();
        let mut objects = Vec::new();
        for key in keys {
            let key = key.as_ref();
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len_utf8())) {
                Some(end) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..end]));
                }
                None => objects.push(key.to_string()),
            }
        }
        objects.sort();
        Self {
            common_prefixes: prefixes.into_iter().collect(),
            objects,
        }
    }
}

/// Streaming upload body.
pub type StreamReader = Box<dyn AsyncRead + Send + Unpin>;

/// Keyed blob store consumed by the remote repository.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List keys under `prefix`, grouping by `delimiter` when given
    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing>;

    /// Fetch an object; a missing key is `StoreError::NotFound`
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Upload a small object
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<()>;

    /// Upload `length` bytes read from `reader`
    async fn put_stream(
        &self,
        key: &str,
        reader: StreamReader,
        length: u64,
        options: &PutOptions,
    ) -> Result<()>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    options: PutOptions,
}

/// In-memory object store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload options recorded for `key`.
    pub async fn options(&self, key: &str) -> Option<PutOptions> {
        self.objects.read().await.get(key).map(|o| o.options.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing> {
        let objects = self.objects.read().await;
        Ok(Listing::from_keys(objects.keys(), prefix, delimiter))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        reader: StreamReader,
        length: u64,
        options: &PutOptions,
    ) -> Result<()> {
        let mut data = Vec::with_capacity(length as usize);
        reader.take(length).read_to_end(&mut data).await?;
        if data.len() as u64 != length {
            return Err(StoreError::Backend(format!(
                "Short upload for {}: expected {} bytes, got {}",
                key,
                length,
                data.len()
            )));
        }
        self.put(key, Bytes::from(data), options).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

const TMP_DIR: &str = ".ftl-tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Object store backed by a flat directory: one file per key.
///
/// Layout on disk:
/// ```text
/// {root}/
///   <key>          # object data
///   .ftl-tmp/      # in-flight uploads, renamed into place when complete
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if needed) a directory store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(StoreError::Backend(format!("Invalid object key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}.{}.{}", key, std::process::id(), n))
    }

    async fn commit(&self, tmp: &Path, dest: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(tmp, dest).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn not_found_or(e: std::io::Error, key: &str) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for DirectoryStore {
    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
        Ok(Listing::from_keys(keys, prefix, delimiter))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key)?;
        let data = tokio::fs::read(&path).await.map_err(|e| not_found_or(e, key))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<()> {
        let dest = self.object_path(key)?;
        let tmp = self.temp_path(key);
        tracing::trace!(
            "put {} ({} bytes, {}, {})",
            key,
            data.len(),
            options.content_type,
            options.acl.as_str()
        );
        tokio::fs::write(&tmp, &data).await?;
        self.commit(&tmp, &dest).await
    }

    async fn put_stream(
        &self,
        key: &str,
        reader: StreamReader,
        length: u64,
        options: &PutOptions,
    ) -> Result<()> {
        let dest = self.object_path(key)?;
        let tmp = self.temp_path(key);
        tracing::trace!(
            "put_stream {} ({} bytes, {}, {})",
            key,
            length,
            options.content_type,
            options.acl.as_str()
        );

        let mut file = tokio::fs::File::create(&tmp).await?;
        let copied = tokio::io::copy(&mut reader.take(length), &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if copied != length {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Backend(format!(
                "Short upload for {}: expected {} bytes, got {}",
                key, length, copied
            )));
        }
        self.commit(&tmp, &dest).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
