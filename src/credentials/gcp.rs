use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{CredentialContext, CredentialResolver, CredentialSource, Credentials, StorageOptions};
use crate::error::{Result, TabError};

const REMEDIATION: &str = "Set GOOGLE_APPLICATION_CREDENTIALS, \
    run 'gcloud auth application-default login', or run 'gcloud auth login'.";

const ADC_FILE: &str = "application_default_credentials.json";

/// Option key carrying a short-lived OAuth token from `gcloud auth print-access-token`.
pub const BEARER_TOKEN_KEY: &str = "google_bearer_token";

/// Credential chain for `gs://` locations.
///
/// Order: `GOOGLE_APPLICATION_CREDENTIALS`, the application default credentials
/// file, a `gcloud` access token, the GCE metadata server.
#[derive(Debug, Clone)]
pub struct GcpCredentialResolver {
    ctx: CredentialContext,
    dmi_product_name: PathBuf,
}

impl GcpCredentialResolver {
    pub fn new(ctx: CredentialContext) -> Self {
        Self {
            ctx,
            dmi_product_name: PathBuf::from("/sys/class/dmi/id/product_name"),
        }
    }

    /// Override the DMI file used to detect Google Compute Engine.
    pub fn with_dmi_product_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.dmi_product_name = path.into();
        self
    }

    /// Where `gcloud auth application-default login` leaves its credentials.
    fn adc_path(&self) -> Option<PathBuf> {
        if let Some(dir) = self.ctx.var("CLOUDSDK_CONFIG") {
            return Some(Path::new(&dir).join(ADC_FILE));
        }
        if cfg!(windows) {
            let appdata = self.ctx.var("APPDATA")?;
            return Some(Path::new(&appdata).join("gcloud").join(ADC_FILE));
        }
        let home = self.ctx.var("HOME")?;
        Some(Path::new(&home).join(".config").join("gcloud").join(ADC_FILE))
    }

    fn credentials_file(path: &Path) -> StorageOptions {
        let mut options = StorageOptions::new();
        options.insert(
            "google_application_credentials".to_string(),
            path.to_string_lossy().into_owned(),
        );
        options
    }

    fn from_env(&self) -> Option<StorageOptions> {
        let path = PathBuf::from(self.ctx.var("GOOGLE_APPLICATION_CREDENTIALS")?);
        if !path.exists() {
            debug!(path = %path.display(), "GOOGLE_APPLICATION_CREDENTIALS points at a missing file");
            return None;
        }
        Some(Self::credentials_file(&path))
    }

    fn from_adc_file(&self) -> Option<StorageOptions> {
        let path = self.adc_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "no application default credentials file");
            return None;
        }
        Some(Self::credentials_file(&path))
    }

    async fn from_cli(&self) -> Option<StorageOptions> {
        let token = self
            .ctx
            .run_cli("gcloud", ["auth", "print-access-token"])
            .await?;
        let mut options = StorageOptions::new();
        options.insert(BEARER_TOKEN_KEY.to_string(), token);
        Some(options)
    }

    /// On GCE, GKE and Cloud Run the store reaches the metadata server on its own.
    fn from_metadata_server(&self) -> Option<StorageOptions> {
        if self.ctx.var("GCE_METADATA_HOST").is_some() {
            return Some(StorageOptions::new());
        }
        let product = std::fs::read_to_string(&self.dmi_product_name).ok()?;
        product.contains("Google").then(StorageOptions::new)
    }
}

#[async_trait]
impl CredentialResolver for GcpCredentialResolver {
    fn scheme(&self) -> &'static str {
        "gs"
    }

    async fn resolve(&self, authority_hint: Option<&str>) -> Result<Credentials> {
        let (source, options) = if let Some(options) = self.from_env() {
            (CredentialSource::Environment, options)
        } else if let Some(options) = self.from_adc_file() {
            (CredentialSource::CachedLogin, options)
        } else if let Some(options) = self.from_cli().await {
            (CredentialSource::Cli, options)
        } else if let Some(options) = self.from_metadata_server() {
            (CredentialSource::ProviderDefault, options)
        } else {
            return Err(TabError::Authentication {
                scheme: self.scheme().to_string(),
                account: authority_hint.unwrap_or("default project").to_string(),
                remediation: REMEDIATION.to_string(),
            });
        };
        debug!(?source, bucket = ?authority_hint, "resolved Google Cloud credentials");
        Ok(Credentials::new(source, options))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::credentials::CommandOutcome;
    use crate::credentials::testing::{ScriptedRunner, context};

    const PRINT_TOKEN: &str = "gcloud auth print-access-token";

    fn resolver(env: &[(&str, &str)], runner: ScriptedRunner, dir: &TempDir) -> GcpCredentialResolver {
        GcpCredentialResolver::new(context(env, Arc::new(runner)))
            .with_dmi_product_name(dir.path().join("product_name"))
    }

    #[tokio::test]
    async fn test_service_account_file_from_env() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("sa.json");
        std::fs::write(&key, "{}").unwrap();
        let key_str = key.to_string_lossy().into_owned();

        let resolver = resolver(
            &[("GOOGLE_APPLICATION_CREDENTIALS", key_str.as_str())],
            ScriptedRunner::default(),
            &dir,
        );
        let creds = resolver.resolve(None).await.unwrap();
        assert_eq!(creds.source, CredentialSource::Environment);
        assert_eq!(creds.options["google_application_credentials"], key_str);
    }

    #[tokio::test]
    async fn test_adc_file_under_cloudsdk_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ADC_FILE), "{}").unwrap();
        let config_dir = dir.path().to_string_lossy().into_owned();

        let resolver = resolver(
            &[
                ("GOOGLE_APPLICATION_CREDENTIALS", "/does/not/exist.json"),
                ("CLOUDSDK_CONFIG", config_dir.as_str()),
            ],
            ScriptedRunner::default(),
            &dir,
        );
        let creds = resolver.resolve(None).await.unwrap();
        assert_eq!(creds.source, CredentialSource::CachedLogin);
    }

    #[tokio::test]
    async fn test_gcloud_token_fallback() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let resolver = resolver(
            &[("HOME", home.as_str())],
            ScriptedRunner::default().with(PRINT_TOKEN, CommandOutcome::Success("ya29.token".to_string())),
            &dir,
        );
        let creds = resolver.resolve(None).await.unwrap();
        assert_eq!(creds.source, CredentialSource::Cli);
        assert_eq!(creds.options[BEARER_TOKEN_KEY], "ya29.token");
    }

    #[tokio::test]
    async fn test_metadata_server_detected_from_dmi() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("product_name"), "Google Compute Engine\n").unwrap();
        let resolver = resolver(
            &[],
            ScriptedRunner::default().with(PRINT_TOKEN, CommandOutcome::TimedOut),
            &dir,
        );
        let creds = resolver.resolve(None).await.unwrap();
        assert_eq!(creds.source, CredentialSource::ProviderDefault);
        assert!(creds.options.is_empty());
    }

    #[tokio::test]
    async fn test_no_fallback_is_authentication_error() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&[], ScriptedRunner::default(), &dir);
        let err = resolver.resolve(Some("bucket")).await.unwrap_err();
        assert!(matches!(err, TabError::Authentication { ref scheme, .. } if scheme == "gs"));
        assert!(err.to_string().contains("gcloud auth application-default login"));
    }
}
