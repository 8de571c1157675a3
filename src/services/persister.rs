use crate::services::error::UploadError;
use crate::utils::keyed_mutex::KeyedMutex;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Hierarchical byte store keyed by `{root, relative path}`.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Opens `root/relative` for sequential writes, replacing any existing content.
    async fn create(
        &self,
        root: &Path,
        relative: &Path,
    ) -> io::Result<Box<dyn AsyncWrite + Send + Unpin>>;
    async fn remove(&self, root: &Path, relative: &Path) -> io::Result<()>;
    async fn exists(&self, root: &Path, relative: &Path) -> io::Result<bool>;
}

/// Files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DestinationStore for LocalStore {
    async fn create(
        &self,
        root: &Path,
        relative: &Path,
    ) -> io::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(file))
    }

    async fn remove(&self, root: &Path, relative: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(root.join(relative)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, root: &Path, relative: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(root.join(relative)).await
    }
}

/// Maps a client filename to a path that cannot leave the destination root.
///
/// Only plain name segments are accepted: no `..`, no root or drive prefix,
/// no backslash separators, no empty names.
pub fn safe_relative_path(filename: &str) -> Result<PathBuf, UploadError> {
    let reject = || UploadError::PathTraversal(filename.to_string());

    if filename.trim().is_empty() || filename.contains('\\') || filename.contains('\0') {
        return Err(reject());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject());
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(reject());
    }
    Ok(relative)
}

/// Streams an ordered byte sequence into the store.
///
/// Clones share one set of per-destination locks: two writers never hold
/// the same `{root, filename}` at once, even across requests.
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn DestinationStore>,
    locks: KeyedMutex,
}

impl Persister {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self {
            store,
            locks: KeyedMutex::new(),
        }
    }

    /// Writes every chunk of `source` to `root/filename`, one chunk in flight at a time.
    ///
    /// The path is checked before anything is opened. A writer already busy
    /// with the same destination is waited for. On any failure the partially
    /// written file is removed. Returns the number of bytes written.
    pub async fn persist<S>(&self, root: &Path, filename: &str, source: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let relative = safe_relative_path(filename)?;
        let guard = self.locks.lock(&root.join(&relative)).await;

        let outcome = self.write_locked(root, &relative, filename, source).await;

        drop(guard);
        self.locks.cleanup();
        outcome
    }

    async fn write_locked<S>(
        &self,
        root: &Path,
        relative: &Path,
        filename: &str,
        source: S,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let mut writer = self
            .store
            .create(root, relative)
            .await
            .map_err(|e| UploadError::PersistFailure {
                filename: filename.to_string(),
                written: 0,
                reason: e.to_string(),
            })?;

        let mut written = 0u64;
        let outcome = copy_stream(source, &mut writer, &mut written).await;

        match outcome {
            Ok(()) => Ok(written),
            Err(e) => {
                drop(writer);
                let e = match e {
                    CopyError::Source(e) => e,
                    CopyError::Write(io_err) => UploadError::PersistFailure {
                        filename: filename.to_string(),
                        written,
                        reason: io_err.to_string(),
                    },
                };
                self.discard_partial(root, relative, written).await;
                Err(e)
            }
        }
    }

    async fn discard_partial(&self, root: &Path, relative: &Path, written: u64) {
        match self.store.remove(root, relative).await {
            Ok(()) => tracing::info!(
                "Removed partial file {} ({} bytes written)",
                relative.display(),
                written
            ),
            Err(e) => tracing::warn!(
                "Failed to remove partial file {}: {}",
                relative.display(),
                e
            ),
        }
    }
}

enum CopyError {
    Source(UploadError),
    Write(io::Error),
}

async fn copy_stream<S, W>(source: S, writer: &mut W, written: &mut u64) -> Result<(), CopyError>
where
    S: Stream<Item = Result<Bytes, UploadError>>,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut source = std::pin::pin!(source);
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(CopyError::Source)?;
        writer.write_all(&chunk).await.map_err(CopyError::Write)?;
        *written += chunk.len() as u64;
    }
    writer.flush().await.map_err(CopyError::Write)?;
    writer.shutdown().await.map_err(CopyError::Write)?;
    Ok(())
}
