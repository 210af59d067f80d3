use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AzureBackend, AzureTarget, GcsBackend, GenericBackend, LocalBackend, S3Backend, StorageBackend};
use crate::config::StorageConfig;
use crate::credentials::{
    AwsCredentialResolver, AzureCredentialResolver, CredentialContext, CredentialResolver,
    GcpCredentialResolver,
};
use crate::error::Result;
use crate::location::{Location, Scheme};

/// Maps location strings to storage backends.
///
/// Backends are created on first use and kept for the life of the resolver.
/// S3 and GCS credentials come from process-wide identity (environment,
/// profile, login), so those backends are keyed by scheme; Azure backends are
/// keyed by the resolved storage account, so `az://acct/c/x` and `az:///c/x`
/// with `AZURE_STORAGE_ACCOUNT=acct` share one authenticated backend.
pub struct BackendResolver {
    config: StorageConfig,
    credentials: CredentialContext,
    backends: Mutex<HashMap<String, Arc<dyn StorageBackend>>>,
}

impl BackendResolver {
    pub fn new(config: StorageConfig, credentials: CredentialContext) -> Self {
        Self {
            config,
            credentials,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Real environment, real provider CLIs.
    pub fn from_config(config: &StorageConfig) -> Self {
        let credentials = CredentialContext::system(config.credentials.command_timeout());
        Self::new(config.clone(), credentials)
    }

    pub async fn resolve(&self, location: &str) -> Result<Arc<dyn StorageBackend>> {
        let loc = Location::parse(location)?;
        let kind = loc.kind();
        let azure = match kind {
            Scheme::Azure | Scheme::Abfs => Some(AzureTarget::parse(
                location,
                self.config.azure.url_authority_is_account,
                self.credentials.env.as_ref(),
            )?),
            _ => None,
        };
        let key = match &kind {
            Scheme::Local => "file".to_string(),
            Scheme::S3 => "s3".to_string(),
            Scheme::Gcs => "gs".to_string(),
            Scheme::Azure | Scheme::Abfs => {
                format!("az:{}", azure.as_ref().map(|t| t.account.as_str()).unwrap_or_default())
            }
            Scheme::Other(scheme) => scheme.clone(),
        };

        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(&key) {
            return Ok(backend.clone());
        }

        debug!(key = %key, "creating storage backend");
        let backend: Arc<dyn StorageBackend> = match kind {
            Scheme::Local => Arc::new(LocalBackend::new()),
            Scheme::S3 => {
                let resolver = AwsCredentialResolver::new(self.credentials.clone(), self.config.s3.clone());
                let creds = resolver.resolve(Some(&loc.authority)).await?;
                info!(source = ?creds.source, "authenticated to s3");
                Arc::new(S3Backend::new(creds))
            }
            Scheme::Gcs => {
                let resolver = GcpCredentialResolver::new(self.credentials.clone());
                let creds = resolver.resolve(Some(&loc.authority)).await?;
                info!(source = ?creds.source, "authenticated to gs");
                Arc::new(GcsBackend::new(creds))
            }
            Scheme::Azure | Scheme::Abfs => {
                let account = azure.map(|t| t.account).unwrap_or_default();
                let resolver = AzureCredentialResolver::new(self.credentials.clone());
                let creds = resolver.resolve(Some(&account)).await?;
                info!(source = ?creds.source, account = %account, "authenticated to azure");
                Arc::new(AzureBackend::new(
                    account,
                    self.config.azure.url_authority_is_account,
                    self.credentials.env.clone(),
                    creds,
                ))
            }
            Scheme::Other(scheme) => Arc::new(GenericBackend::new(&scheme)?),
        };
        backends.insert(key, backend.clone());
        Ok(backend)
    }

    /// Number of backends created so far.
    pub async fn len(&self) -> usize {
        self.backends.lock().await.len()
    }
}

impl std::fmt::Debug for BackendResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
