use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use super::options::{StoreCache, store_base};
use super::StorageBackend;
use crate::credentials::{Credentials, StorageOptions};
use crate::error::{Result, TabError};
use crate::location::{Location, Scheme};

/// `gs://bucket/key` and its `gcs://` alias.
pub struct GcsBackend {
    credentials: Credentials,
    stores: StoreCache,
}

impl GcsBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            stores: StoreCache::default(),
        }
    }

    fn parse(location: &str) -> Result<Location> {
        let loc = Location::parse(location)?;
        if loc.kind() != Scheme::Gcs {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: "not a gs:// location".to_string(),
            });
        }
        Ok(loc)
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        let loc = Self::parse(location)?;
        let base = store_base("gs", &loc.authority)?;
        let store = self.stores.get_or_build(&base, &self.credentials.options)?;
        Ok((store, ObjectPath::from(loc.path.as_str())))
    }

    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String> {
        let loc = Self::parse(base)?;
        Ok(format!("gs://{}/{path}", loc.authority))
    }

    fn storage_options(&self) -> Option<StorageOptions> {
        Some(self.credentials.options.clone())
    }

    fn engine_url(&self, location: &str) -> Result<String> {
        let loc = Self::parse(location)?;
        Ok(Location {
            scheme: "gs".to_string(),
            ..loc
        }
        .to_url())
    }
}
