use async_trait::async_trait;
use tracing::debug;

use super::{CredentialContext, CredentialResolver, CredentialSource, Credentials, StorageOptions};
use crate::error::{Result, TabError};

/// Credential chain for `az://`, `abfs://` and `abfss://` locations.
///
/// Order: account key or SAS token from the environment, an account key
/// fetched with `az storage account keys list`, then service principal /
/// workload identity variables or an Azure CLI login (RBAC).
#[derive(Debug, Clone)]
pub struct AzureCredentialResolver {
    ctx: CredentialContext,
}

impl AzureCredentialResolver {
    pub fn new(ctx: CredentialContext) -> Self {
        Self { ctx }
    }

    fn from_env(&self) -> Option<StorageOptions> {
        let mut options = StorageOptions::new();
        if let Some(key) = self
            .ctx
            .first_var(&["AZURE_STORAGE_KEY", "AZURE_STORAGE_ACCOUNT_KEY"])
        {
            options.insert("azure_storage_account_key".to_string(), key);
        } else if let Some(sas) = self.ctx.var("AZURE_STORAGE_SAS_TOKEN") {
            options.insert(
                "azure_storage_sas_key".to_string(),
                sas.trim_start_matches('?').to_string(),
            );
        } else {
            return None;
        }
        Some(options)
    }

    /// Works when the login has ARM access to the account's keys.
    async fn from_cli(&self, account: &str) -> Option<StorageOptions> {
        let key = self
            .ctx
            .run_cli(
                "az",
                [
                    "storage",
                    "account",
                    "keys",
                    "list",
                    "--account-name",
                    account,
                    "--query",
                    "[0].value",
                    "-o",
                    "tsv",
                ]
                .map(String::from),
            )
            .await?;
        let mut options = StorageOptions::new();
        options.insert("azure_storage_account_key".to_string(), key);
        Some(options)
    }

    /// Token-based access; needs a data-plane role such as Storage Blob Data Reader.
    async fn from_default(&self) -> Option<StorageOptions> {
        let mut options = StorageOptions::new();
        if let (Some(client_id), Some(tenant_id)) = (
            self.ctx.var("AZURE_CLIENT_ID"),
            self.ctx.var("AZURE_TENANT_ID"),
        ) {
            if let Some(secret) = self.ctx.var("AZURE_CLIENT_SECRET") {
                options.insert("azure_client_secret".to_string(), secret);
            } else if let Some(token_file) = self.ctx.var("AZURE_FEDERATED_TOKEN_FILE") {
                options.insert("azure_federated_token_file".to_string(), token_file);
            } else {
                debug!("AZURE_CLIENT_ID set without a secret or federated token file");
            }
            if !options.is_empty() {
                options.insert("azure_client_id".to_string(), client_id);
                options.insert("azure_tenant_id".to_string(), tenant_id);
                return Some(options);
            }
        }

        self.ctx
            .run_cli("az", ["account", "show", "--query", "id", "-o", "tsv"])
            .await?;
        options.insert("azure_use_azure_cli".to_string(), "true".to_string());
        Some(options)
    }
}

#[async_trait]
impl CredentialResolver for AzureCredentialResolver {
    fn scheme(&self) -> &'static str {
        "az"
    }

    /// `authority_hint` is the resolved storage account name.
    async fn resolve(&self, authority_hint: Option<&str>) -> Result<Credentials> {
        let Some(account) = authority_hint else {
            return Err(TabError::Authentication {
                scheme: self.scheme().to_string(),
                account: "<unknown account>".to_string(),
                remediation: "Name the storage account in the URL with \
                    --az-url-authority-is-account, or set AZURE_STORAGE_ACCOUNT."
                    .to_string(),
            });
        };

        let (source, found) = if let Some(options) = self.from_env() {
            (CredentialSource::Environment, options)
        } else if let Some(options) = self.from_cli(account).await {
            (CredentialSource::Cli, options)
        } else if let Some(options) = self.from_default().await {
            (CredentialSource::ProviderDefault, options)
        } else {
            return Err(TabError::Authentication {
                scheme: self.scheme().to_string(),
                account: account.to_string(),
                remediation: "Set AZURE_STORAGE_KEY, run 'az login', or configure Azure AD RBAC \
                    (AZURE_CLIENT_ID / AZURE_TENANT_ID)."
                    .to_string(),
            });
        };

        debug!(?source, account, "resolved Azure credentials");
        let mut options = StorageOptions::new();
        options.insert("azure_storage_account_name".to_string(), account.to_string());
        options.extend(found);
        Ok(Credentials::new(source, options))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::credentials::CommandOutcome;
    use crate::credentials::testing::{ScriptedRunner, context};

    const KEYS_LIST: &str =
        "az storage account keys list --account-name acct --query [0].value -o tsv";
    const ACCOUNT_SHOW: &str = "az account show --query id -o tsv";

    fn resolver(env: &[(&str, &str)], runner: ScriptedRunner) -> (AzureCredentialResolver, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (AzureCredentialResolver::new(context(env, runner.clone())), runner)
    }

    #[tokio::test]
    async fn test_account_key_from_env() {
        let (resolver, runner) = resolver(&[("AZURE_STORAGE_KEY", "a2V5")], ScriptedRunner::default());
        let creds = resolver.resolve(Some("acct")).await.unwrap();
        assert_eq!(creds.source, CredentialSource::Environment);
        assert_eq!(creds.options["azure_storage_account_name"], "acct");
        assert_eq!(creds.options["azure_storage_account_key"], "a2V5");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sas_token_strips_question_mark() {
        let (resolver, _) = resolver(&[("AZURE_STORAGE_SAS_TOKEN", "?sv=2024&sig=x")], ScriptedRunner::default());
        let creds = resolver.resolve(Some("acct")).await.unwrap();
        assert_eq!(creds.options["azure_storage_sas_key"], "sv=2024&sig=x");
    }

    #[tokio::test]
    async fn test_key_from_cli() {
        let (resolver, runner) = resolver(
            &[],
            ScriptedRunner::default().with(KEYS_LIST, CommandOutcome::Success("clikey".to_string())),
        );
        let creds = resolver.resolve(Some("acct")).await.unwrap();
        assert_eq!(creds.source, CredentialSource::Cli);
        assert_eq!(creds.options["azure_storage_account_key"], "clikey");
        assert_eq!(runner.calls(), vec![KEYS_LIST.to_string()]);
    }

    #[tokio::test]
    async fn test_service_principal_after_cli_failure() {
        let (resolver, _) = resolver(
            &[
                ("AZURE_CLIENT_ID", "cid"),
                ("AZURE_TENANT_ID", "tid"),
                ("AZURE_CLIENT_SECRET", "secret"),
            ],
            ScriptedRunner::default().with(
                KEYS_LIST,
                CommandOutcome::Failed {
                    code: Some(1),
                    stderr: "AuthorizationFailed".to_string(),
                },
            ),
        );
        let creds = resolver.resolve(Some("acct")).await.unwrap();
        assert_eq!(creds.source, CredentialSource::ProviderDefault);
        assert_eq!(creds.options["azure_client_id"], "cid");
        assert_eq!(creds.options["azure_tenant_id"], "tid");
        assert!(!creds.options.contains_key("azure_storage_account_key"));
    }

    #[tokio::test]
    async fn test_cli_login_enables_token_auth() {
        let (resolver, runner) = resolver(
            &[],
            ScriptedRunner::default()
                .with(KEYS_LIST, CommandOutcome::TimedOut)
                .with(ACCOUNT_SHOW, CommandOutcome::Success("sub-id".to_string())),
        );
        let creds = resolver.resolve(Some("acct")).await.unwrap();
        assert_eq!(creds.source, CredentialSource::ProviderDefault);
        assert_eq!(creds.options["azure_use_azure_cli"], "true");
        assert_eq!(runner.calls(), vec![KEYS_LIST.to_string(), ACCOUNT_SHOW.to_string()]);
    }

    #[tokio::test]
    async fn test_no_fallback_names_account_and_remediation() {
        let (resolver, _) = resolver(&[], ScriptedRunner::default());
        let err = resolver.resolve(Some("acct")).await.unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, TabError::Authentication { .. }));
        assert!(text.contains("acct"));
        assert!(text.contains("az login"));
    }
}
