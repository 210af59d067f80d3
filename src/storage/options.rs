//! Building `object_store` clients from serializable option maps.
//!
//! Backends and the query engine both go through [`build_object_store`], so a
//! live client and the engine's client for the same location are configured
//! from one and the same [`StorageOptions`].

use std::collections::HashMap;
use std::sync::Arc;

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder, GoogleConfigKey};
use object_store::local::LocalFileSystem;
use object_store::{ObjectStore, StaticCredentialProvider};
use parking_lot::Mutex;
use url::Url;

use crate::credentials::StorageOptions;
use crate::credentials::gcp::BEARER_TOKEN_KEY;
use crate::error::{Result, TabError};
use crate::location::Scheme;

/// Create a client for the bucket or container named by `base`
/// (`scheme://authority`), configured from `options`.
pub fn build_object_store(base: &Url, options: &StorageOptions) -> Result<Arc<dyn ObjectStore>> {
    let authority = base.host_str().unwrap_or_default();
    let store: Arc<dyn ObjectStore> = match Scheme::from_token(base.scheme()) {
        Scheme::Local => Arc::new(LocalFileSystem::new()),
        Scheme::S3 => {
            let mut builder = AmazonS3Builder::new().with_bucket_name(authority);
            for (key, value) in options {
                let key: AmazonS3ConfigKey = key.parse().map_err(|e| unknown_key(base, key, e))?;
                builder = builder.with_config(key, value);
            }
            Arc::new(builder.build().map_err(|e| build_failed(base, e))?)
        }
        Scheme::Gcs => {
            let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(authority);
            for (key, value) in options {
                if key == BEARER_TOKEN_KEY {
                    let credential = GcpCredential {
                        bearer: value.clone(),
                    };
                    builder = builder.with_credentials(Arc::new(StaticCredentialProvider::new(credential)));
                    continue;
                }
                let key: GoogleConfigKey = key.parse().map_err(|e| unknown_key(base, key, e))?;
                builder = builder.with_config(key, value);
            }
            Arc::new(builder.build().map_err(|e| build_failed(base, e))?)
        }
        Scheme::Azure | Scheme::Abfs => {
            // abfs authorities look like container@account.dfs.core.windows.net
            let container = authority.split('@').next().unwrap_or(authority);
            let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);
            for (key, value) in options {
                let key: AzureConfigKey = key.parse().map_err(|e| unknown_key(base, key, e))?;
                builder = builder.with_config(key, value);
            }
            Arc::new(builder.build().map_err(|e| build_failed(base, e))?)
        }
        Scheme::Other(scheme) => {
            let (store, _) = object_store::parse_url_opts(base, options.iter())
                .map_err(|_| TabError::UnsupportedScheme { scheme })?;
            Arc::from(store)
        }
    };
    Ok(store)
}

fn unknown_key(base: &Url, key: &str, err: object_store::Error) -> TabError {
    TabError::config(format!("unsupported storage option '{key}' for {base}: {err}"))
}

fn build_failed(base: &Url, err: object_store::Error) -> TabError {
    TabError::Storage {
        message: format!("Failed to create client for {base}"),
        source: Some(Box::new(err)),
    }
}

/// `scheme://authority` of a URL-shaped location, `scheme:///` without an authority.
pub fn store_base(scheme: &str, authority: &str) -> Result<Url> {
    let base = if authority.is_empty() {
        format!("{scheme}:///")
    } else {
        format!("{scheme}://{authority}")
    };
    Url::parse(&base).map_err(|e| TabError::MalformedLocation {
        location: base,
        reason: e.to_string(),
    })
}

/// Clients of one backend, one per bucket or container.
#[derive(Default)]
pub struct StoreCache {
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl StoreCache {
    pub fn get_or_build(&self, base: &Url, options: &StorageOptions) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(base.as_str()) {
            return Ok(store.clone());
        }
        let store = build_object_store(base, options)?;
        stores.insert(base.as_str().to_string(), store.clone());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for StoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCache").field("stores", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> StorageOptions {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_s3_store_from_static_keys() {
        let base = Url::parse("s3://bucket").unwrap();
        let opts = options(&[
            ("aws_access_key_id", "AKIA"),
            ("aws_secret_access_key", "secret"),
            ("aws_region", "eu-west-1"),
        ]);
        assert!(build_object_store(&base, &opts).is_ok());
    }

    #[test]
    fn test_azure_store_from_account_key() {
        let base = Url::parse("az://container").unwrap();
        let opts = options(&[
            ("azure_storage_account_name", "acct"),
            ("azure_storage_account_key", "a2V5"),
        ]);
        assert!(build_object_store(&base, &opts).is_ok());
    }

    #[test]
    fn test_gcs_store_from_bearer_token() {
        let base = Url::parse("gs://bucket").unwrap();
        let opts = options(&[(BEARER_TOKEN_KEY, "ya29.token")]);
        assert!(build_object_store(&base, &opts).is_ok());
    }

    #[test]
    fn test_unknown_option_is_config_error() {
        let base = Url::parse("s3://bucket").unwrap();
        let err = build_object_store(&base, &options(&[("no_such_option", "x")])).unwrap_err();
        assert!(matches!(err, TabError::Config { .. }));
    }

    #[test]
    fn test_unrecognised_scheme_is_unsupported() {
        let base = Url::parse("ftp://host").unwrap();
        let err = build_object_store(&base, &StorageOptions::new()).unwrap_err();
        assert!(matches!(err, TabError::UnsupportedScheme { ref scheme } if scheme == "ftp"));
    }

    #[test]
    fn test_cache_reuses_clients_per_base() {
        let cache = StoreCache::default();
        let a = store_base("memory", "").unwrap();
        let b = store_base("file", "").unwrap();
        let first = cache.get_or_build(&a, &StorageOptions::new()).unwrap();
        let again = cache.get_or_build(&a, &StorageOptions::new()).unwrap();
        cache.get_or_build(&b, &StorageOptions::new()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 2);
    }
}
