use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use url::Url;

use super::options::{StoreCache, build_object_store, store_base};
use super::StorageBackend;
use crate::credentials::{Credentials, EnvSource, StorageOptions};
use crate::error::{Result, TabError};
use crate::location::{Location, Scheme};

const ACCOUNT_VARS: [&str; 2] = ["AZURE_STORAGE_ACCOUNT", "AZURE_STORAGE_ACCOUNT_NAME"];
const ACCOUNT_NAME_KEY: &str = "azure_storage_account_name";

fn engine_host(target: &AzureTarget) -> String {
    format!("{}.{}", target.container, target.account)
}

/// Account, container and blob path an Azure location points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureTarget {
    pub account: String,
    pub container: String,
    pub path: String,
}

impl AzureTarget {
    /// Interpret an `az://`, `azure://`, `abfs://` or `abfss://` location.
    ///
    /// For `az://` the authority is the account when `authority_is_account`
    /// is set and the container otherwise. Whenever the URL does not name the
    /// account it comes from `AZURE_STORAGE_ACCOUNT`.
    pub fn parse(location: &str, authority_is_account: bool, env: &dyn EnvSource) -> Result<Self> {
        let loc = Location::parse(location)?;
        let malformed = |reason: &str| TabError::MalformedLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        let (account, container, path) = match loc.kind() {
            Scheme::Abfs => {
                let Some((container, host)) = loc.authority.split_once('@') else {
                    return Err(malformed("expected container@account.dfs.core.windows.net"));
                };
                let account = host.split('.').next().unwrap_or_default();
                (Some(account.to_string()), container.to_string(), loc.path)
            }
            Scheme::Azure => {
                let in_path = || {
                    let (container, rest) = loc.path.split_once('/').unwrap_or((&loc.path, ""));
                    (container.to_string(), rest.to_string())
                };
                if loc.authority.is_empty() {
                    let (container, path) = in_path();
                    (None, container, path)
                } else if authority_is_account {
                    let (container, path) = in_path();
                    (Some(loc.authority.clone()), container, path)
                } else {
                    (None, loc.authority.clone(), loc.path.clone())
                }
            }
            _ => return Err(malformed("not an Azure location")),
        };

        let account = account
            .filter(|a| !a.is_empty())
            .or_else(|| ACCOUNT_VARS.iter().find_map(|key| env.var(key)))
            .ok_or_else(|| {
                malformed(
                    "no storage account: set AZURE_STORAGE_ACCOUNT, or name it in the URL \
                     (az://account/container/path with --az-url-authority-is-account)",
                )
            })?;
        if container.is_empty() {
            return Err(malformed("no container in location"));
        }
        Ok(Self {
            account,
            container,
            path,
        })
    }
}

/// Azure Blob Storage and ADLS Gen2 for one storage account.
pub struct AzureBackend {
    account: String,
    authority_is_account: bool,
    env: Arc<dyn EnvSource>,
    credentials: Credentials,
    stores: StoreCache,
}

impl AzureBackend {
    pub fn new(
        account: impl Into<String>,
        authority_is_account: bool,
        env: Arc<dyn EnvSource>,
        credentials: Credentials,
    ) -> Self {
        Self {
            account: account.into(),
            authority_is_account,
            env,
            credentials,
            stores: StoreCache::default(),
        }
    }

    fn target(&self, location: &str) -> Result<AzureTarget> {
        let target = AzureTarget::parse(location, self.authority_is_account, self.env.as_ref())?;
        if target.account != self.account {
            return Err(TabError::storage_msg(format!(
                "{location} belongs to account '{}', not '{}'",
                target.account, self.account
            )));
        }
        Ok(target)
    }
}

#[async_trait]
impl StorageBackend for AzureBackend {
    fn name(&self) -> &str {
        "azure"
    }

    async fn resolve_path(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        let target = self.target(location)?;
        let base = store_base("az", &target.container)?;
        let store = self.stores.get_or_build(&base, &self.credentials.options)?;
        Ok((store, ObjectPath::from(target.path.as_str())))
    }

    fn to_uri(&self, base: &str, path: &ObjectPath) -> Result<String> {
        let target = self.target(base)?;
        let loc = Location::parse(base)?;
        Ok(match loc.kind() {
            Scheme::Abfs => format!("{}://{}/{path}", loc.scheme, loc.authority),
            _ if self.authority_is_account => {
                format!("az://{}/{}/{path}", target.account, target.container)
            }
            _ => format!("az://{}/{path}", target.container),
        })
    }

    fn storage_options(&self) -> Option<StorageOptions> {
        Some(self.credentials.options.clone())
    }

    /// `az://container.account/path`. The engine keys stores by host, so
    /// the host names both; container names cannot contain dots.
    fn engine_url(&self, location: &str) -> Result<String> {
        let target = self.target(location)?;
        Ok(Location {
            scheme: "az".to_string(),
            authority: engine_host(&target),
            path: target.path,
        }
        .to_url())
    }

    async fn engine_store(&self, _base: &Url, location: &str) -> Result<Arc<dyn ObjectStore>> {
        let target = self.target(location)?;
        let mut options = self.credentials.options.clone();
        options.insert(ACCOUNT_NAME_KEY.to_string(), target.account);
        build_object_store(&store_base("az", &target.container)?, &options)
    }
}
