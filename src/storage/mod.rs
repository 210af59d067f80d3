use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use url::Url;

use crate::credentials::StorageOptions;
use crate::error::{Result, TabError};

mod azure;
mod generic;
mod gcs;
mod local;
pub mod options;
mod resolver;
mod s3;

pub use azure::{AzureBackend, AzureTarget};
pub use gcs::GcsBackend;
pub use generic::GenericBackend;
pub use local::LocalBackend;
pub use options::{StoreCache, build_object_store};
pub use resolver::BackendResolver;
pub use s3::S3Backend;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub url: String,
    pub size: u64,
}

/// Uniform storage contract over local disk and object stores.
///
/// Implementors translate locations into an `ObjectStore` client plus an
/// object path ([`resolve_path`](Self::resolve_path)) and back
/// ([`to_uri`](Self::to_uri)); listing, sizing and the directory check are
/// shared on top of that.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Client and object path serving `location`.
    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)>;

    /// Location string of an object listed from the client serving `base`.
    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String>;

    /// Serializable credential projection, `None` when no credentials are needed.
    fn storage_options(&self) -> Option<StorageOptions> {
        None
    }

    /// `location` in the shape the query engine's object store registry expects.
    fn engine_url(&self, location: &str) -> Result<String> {
        Ok(location.to_string())
    }

    /// Client the query engine registers under `base`, the store root of
    /// [`engine_url`](Self::engine_url). Built from the options mapping when
    /// there is one, otherwise the live client.
    async fn engine_store(&self, base: &Url, location: &str) -> Result<Arc<dyn ObjectStore>> {
        match self.storage_options() {
            Some(options) => build_object_store(base, &options),
            None => Ok(self.resolve_path(location).await?.0),
        }
    }

    /// Stream the object's bytes.
    async fn open(&self, location: &str) -> Result<ByteStream> {
        let (store, path) = self.resolve_path(location).await?;
        let result = store
            .get(&path)
            .await
            .map_err(|e| TabError::from_store(location, e))?;
        let owned = location.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| TabError::from_store(owned.clone(), e))
            .boxed())
    }

    /// Object metadata; `NotFound` when nothing is stored at `location`.
    async fn head(&self, location: &str) -> Result<ObjectMeta> {
        let (store, path) = self.resolve_path(location).await?;
        store
            .head(&path)
            .await
            .map_err(|e| TabError::from_store(location, e))
    }

    async fn stat_size(&self, location: &str) -> Result<u64> {
        Ok(self.head(location).await?.size as u64)
    }

    /// Recursive listing under `location`, sorted by URL.
    ///
    /// `extension` filters by suffix (`"parquet"` or `".parquet"`); empty keeps
    /// every file. Every call lists afresh.
    async fn list(&self, location: &str, extension: &str) -> Result<BoxStream<'static, Result<FileInfo>>> {
        let (store, path) = self.resolve_path(location).await?;
        let prefix = (!path.as_ref().is_empty()).then_some(path);
        let suffix = match extension.trim_start_matches('.') {
            "" => None,
            ext => Some(format!(".{}", ext.to_ascii_lowercase())),
        };

        let metas: Vec<ObjectMeta> = store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| TabError::from_store(location, e))?;

        let mut files = Vec::with_capacity(metas.len());
        for meta in metas {
            let url = self.to_uri(location, &meta.location)?;
            if let Some(suffix) = &suffix {
                if !url.to_ascii_lowercase().ends_with(suffix.as_str()) {
                    continue;
                }
            }
            files.push(FileInfo {
                url,
                size: meta.size as u64,
            });
        }
        files.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(stream::iter(files.into_iter().map(Ok)).boxed())
    }

    /// Object stores have no real directories: anything with at least one
    /// object below it counts as one. A bucket root skips the HEAD.
    async fn is_directory(&self, location: &str) -> Result<bool> {
        let (store, path) = self.resolve_path(location).await?;
        if !path.as_ref().is_empty() {
            match self.head(location).await {
                Ok(_) => return Ok(false),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let prefix = (!path.as_ref().is_empty()).then_some(path);
        let listing = store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| TabError::from_store(location, e))?;
        Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty())
    }
}

/// Collect a listing into a vector.
pub async fn list_files(
    backend: &dyn StorageBackend,
    location: &str,
    extension: &str,
) -> Result<Vec<FileInfo>> {
    backend.list(location, extension).await?.try_collect().await
}

/// Write `data` as the full contents of `location`.
pub async fn write_all(backend: &dyn StorageBackend, location: &str, data: Bytes) -> Result<()> {
    let (store, path) = backend.resolve_path(location).await?;
    store
        .put(&path, data.into())
        .await
        .map_err(|e| TabError::from_store(location, e))?;
    Ok(())
}
