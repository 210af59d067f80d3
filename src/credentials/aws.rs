use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CredentialContext, CredentialResolver, CredentialSource, Credentials, StorageOptions};
use crate::config::S3Config;
use crate::error::{Result, TabError};

const REMEDIATION: &str = "Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, \
    run 'aws sso login' (or 'aws configure'), or run with a web identity / container role.";

/// Credential chain for `s3://` locations.
///
/// Order: access keys from the environment, `aws configure export-credentials`,
/// web identity or container credentials.
#[derive(Debug, Clone)]
pub struct AwsCredentialResolver {
    ctx: CredentialContext,
    config: S3Config,
}

/// Output of `aws configure export-credentials --format process`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentialResolver {
    pub fn new(ctx: CredentialContext, config: S3Config) -> Self {
        Self { ctx, config }
    }

    /// Region and endpoint options shared by every step.
    fn base_options(&self) -> StorageOptions {
        let mut options = StorageOptions::new();
        let region = self
            .ctx
            .first_var(&["AWS_REGION", "AWS_DEFAULT_REGION"])
            .unwrap_or_else(|| self.config.region.clone());
        options.insert("aws_region".to_string(), region);

        let endpoint = self
            .ctx
            .var("AWS_ENDPOINT_URL")
            .or_else(|| self.config.endpoint.clone());
        if let Some(endpoint) = endpoint {
            options.insert("aws_endpoint".to_string(), endpoint);
        }
        if self.config.allow_http {
            options.insert("allow_http".to_string(), "true".to_string());
        }
        options
    }

    fn from_env(&self) -> Option<StorageOptions> {
        let key_id = self.ctx.var("AWS_ACCESS_KEY_ID")?;
        let Some(secret) = self.ctx.var("AWS_SECRET_ACCESS_KEY") else {
            debug!("AWS_ACCESS_KEY_ID is set but AWS_SECRET_ACCESS_KEY is not");
            return None;
        };
        let mut options = StorageOptions::new();
        options.insert("aws_access_key_id".to_string(), key_id);
        options.insert("aws_secret_access_key".to_string(), secret);
        if let Some(token) = self.ctx.var("AWS_SESSION_TOKEN") {
            options.insert("aws_session_token".to_string(), token);
        }
        Some(options)
    }

    async fn from_cli(&self) -> Option<StorageOptions> {
        let mut args = vec![
            "configure".to_string(),
            "export-credentials".to_string(),
            "--format".to_string(),
            "process".to_string(),
        ];
        if let Some(profile) = self.ctx.var("AWS_PROFILE") {
            args.push("--profile".to_string());
            args.push(profile);
        }
        let stdout = self.ctx.run_cli("aws", args).await?;
        let creds: ProcessCredentials = match serde_json::from_str(&stdout) {
            Ok(creds) => creds,
            Err(e) => {
                debug!(error = %e, "could not parse aws export-credentials output");
                return None;
            }
        };
        let mut options = StorageOptions::new();
        options.insert("aws_access_key_id".to_string(), creds.access_key_id);
        options.insert("aws_secret_access_key".to_string(), creds.secret_access_key);
        if let Some(token) = creds.session_token {
            options.insert("aws_session_token".to_string(), token);
        }
        Some(options)
    }

    /// Web identity and ECS container credentials, refreshed by the store itself.
    fn from_default(&self) -> Option<StorageOptions> {
        if self.ctx.var("AWS_WEB_IDENTITY_TOKEN_FILE").is_some()
            && self.ctx.var("AWS_ROLE_ARN").is_some()
        {
            return Some(StorageOptions::new());
        }
        let uri = self.ctx.var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI")?;
        let mut options = StorageOptions::new();
        options.insert("aws_container_credentials_relative_uri".to_string(), uri);
        Some(options)
    }
}

#[async_trait]
impl CredentialResolver for AwsCredentialResolver {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    async fn resolve(&self, authority_hint: Option<&str>) -> Result<Credentials> {
        let (source, found) = if let Some(options) = self.from_env() {
            (CredentialSource::Environment, options)
        } else if let Some(options) = self.from_cli().await {
            (CredentialSource::Cli, options)
        } else if let Some(options) = self.from_default() {
            (CredentialSource::ProviderDefault, options)
        } else {
            return Err(TabError::Authentication {
                scheme: self.scheme().to_string(),
                account: authority_hint.unwrap_or("default profile").to_string(),
                remediation: REMEDIATION.to_string(),
            });
        };

        debug!(?source, bucket = ?authority_hint, "resolved AWS credentials");
        let mut options = self.base_options();
        options.extend(found);
        Ok(Credentials::new(source, options))
    }
}
