use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use super::options::{StoreCache, store_base};
use super::StorageBackend;
use crate::credentials::{Credentials, StorageOptions};
use crate::error::{Result, TabError};
use crate::location::{Location, Scheme};

/// `s3://bucket/key`. One client per bucket, all built from the same credentials.
pub struct S3Backend {
    credentials: Credentials,
    stores: StoreCache,
}

impl S3Backend {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            stores: StoreCache::default(),
        }
    }

    fn parse(location: &str) -> Result<Location> {
        let loc = Location::parse(location)?;
        if loc.kind() != Scheme::S3 {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: "not an s3:// location".to_string(),
            });
        }
        Ok(loc)
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        let loc = Self::parse(location)?;
        let base = store_base("s3", &loc.authority)?;
        let store = self.stores.get_or_build(&base, &self.credentials.options)?;
        Ok((store, ObjectPath::from(loc.path.as_str())))
    }

    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String> {
        let loc = Self::parse(base)?;
        Ok(format!("s3://{}/{path}", loc.authority))
    }

    fn storage_options(&self) -> Option<StorageOptions> {
        Some(self.credentials.options.clone())
    }

    /// `s3a://` is folded into `s3://`.
    fn engine_url(&self, location: &str) -> Result<String> {
        let loc = Self::parse(location)?;
        Ok(Location {
            scheme: "s3".to_string(),
            ..loc
        }
        .to_url())
    }
}
