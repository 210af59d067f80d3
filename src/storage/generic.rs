use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, ObjectStoreScheme};
use url::Url;

use super::options::{StoreCache, store_base};
use super::StorageBackend;
use crate::credentials::StorageOptions;
use crate::error::{Result, TabError};
use crate::location::Location;

/// Any scheme `object_store` can parse on its own (`memory://`, `http(s)://`, ...).
///
/// Carries no credentials, so the engine is handed this backend's live client
/// instead of an options mapping.
pub struct GenericBackend {
    scheme: String,
    stores: StoreCache,
}

impl GenericBackend {
    /// Fails with `UnsupportedScheme` when `object_store` has no handler for `scheme`.
    pub fn new(scheme: &str) -> Result<Self> {
        // some schemes only parse with a host (http), others only without one (memory)
        let known = [format!("{scheme}:///"), format!("{scheme}://probe/")]
            .iter()
            .filter_map(|probe| Url::parse(probe).ok())
            .any(|probe| ObjectStoreScheme::parse(&probe).is_ok());
        if !known {
            return Err(TabError::UnsupportedScheme {
                scheme: scheme.to_string(),
            });
        }
        Ok(Self {
            scheme: scheme.to_string(),
            stores: StoreCache::default(),
        })
    }

    fn parse(&self, location: &str) -> Result<Location> {
        let loc = Location::parse(location)?;
        if loc.scheme != self.scheme {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: format!("not a {}:// location", self.scheme),
            });
        }
        Ok(loc)
    }
}

#[async_trait]
impl StorageBackend for GenericBackend {
    fn name(&self) -> &str {
        &self.scheme
    }

    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        let loc = self.parse(location)?;
        let base = store_base(&loc.scheme, &loc.authority)?;
        let store = self.stores.get_or_build(&base, &StorageOptions::new())?;
        Ok((store, ObjectPath::from(loc.path.as_str())))
    }

    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String> {
        let loc = self.parse(base)?;
        Ok(format!("{}://{}/{path}", loc.scheme, loc.authority))
    }
}
