use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use url::Url;

use super::StorageBackend;
use crate::error::{Result, TabError};
use crate::location::Location;

/// Local disk. Needs no credentials and hands no options to the engine.
pub struct LocalBackend {
    store: Arc<dyn ObjectStore>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(LocalFileSystem::new()),
        }
    }

    /// Filesystem path of a scheme-less or `file://` location.
    fn fs_path(location: &str) -> Result<PathBuf> {
        let loc = Location::parse(location)?;
        if !loc.is_local() {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: "not a local path".to_string(),
            });
        }
        Ok(PathBuf::from(loc.path))
    }

    fn absolute(location: &str) -> Result<PathBuf> {
        Ok(std::path::absolute(Self::fs_path(location)?)?)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        let path = ObjectPath::from_absolute_path(Self::absolute(location)?).map_err(|e| {
            TabError::MalformedLocation {
                location: location.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok((self.store.clone(), path))
    }

    /// Listed files keep the spelling of `base`, so relative inputs give relative results.
    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String> {
        let file = Url::parse(&format!("file:///{path}"))
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| TabError::storage_msg(format!("cannot map {path} back to a local path")))?;

        let base_path = Self::fs_path(base)?;
        let base_abs = std::path::absolute(&base_path)?;
        let shown = match file.strip_prefix(&base_abs) {
            Ok(rel) if rel.as_os_str().is_empty() => base_path,
            Ok(rel) => base_path.join(rel),
            Err(_) => file,
        };
        Ok(shown.to_string_lossy().into_owned())
    }

    fn engine_url(&self, location: &str) -> Result<String> {
        Ok(Self::fs_path(location)?.to_string_lossy().into_owned())
    }

    async fn is_directory(&self, location: &str) -> Result<bool> {
        let path = Self::fs_path(location)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TabError::NotFound {
                location: location.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
