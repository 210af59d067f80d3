//! Per-provider credential resolution.
//!
//! Each resolver walks an ordered fallback chain and stops at the first step
//! that yields usable material:
//!
//! 1. explicit credentials in environment variables,
//! 2. a credential obtained from the provider's login tool (time-bounded),
//! 3. the provider's default discovery mechanism (workload identity, metadata
//!    server, CLI token auth),
//! 4. otherwise [`TabError::Authentication`] with the remediation spelled out.
//!
//! Failing steps are logged at debug level and never abort the chain.
//!
//! The result is always a [`StorageOptions`] mapping. Backends build their
//! live `ObjectStore` client from it and the query engine builds its own
//! client from the very same mapping, so both views of a credential agree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod aws;
pub mod azure;
pub mod command;
pub mod gcp;

pub use aws::AwsCredentialResolver;
pub use azure::AzureCredentialResolver;
pub use command::{CliCommand, CommandOutcome, CommandRunner, SystemCommandRunner};
pub use gcp::GcpCredentialResolver;

/// String-keyed credential and identity options, in `object_store` config-key form.
pub type StorageOptions = BTreeMap<String, String>;

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    /// A credentials file left behind by a provider login (e.g. gcloud ADC).
    CachedLogin,
    Cli,
    ProviderDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub source: CredentialSource,
    pub options: StorageOptions,
}

impl Credentials {
    pub fn new(source: CredentialSource, options: StorageOptions) -> Self {
        Self { source, options }
    }
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Scheme token this resolver serves, used in error messages.
    fn scheme(&self) -> &'static str;

    /// Walk the fallback chain. `authority_hint` is the bucket or account the
    /// caller is about to access, when known.
    async fn resolve(&self, authority_hint: Option<&str>) -> Result<Credentials>;
}

/// Read access to environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment. Empty values count as unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Shared inputs of every credential chain.
#[derive(Clone)]
pub struct CredentialContext {
    pub env: Arc<dyn EnvSource>,
    pub commands: Arc<dyn CommandRunner>,
    pub command_timeout: Duration,
}

impl CredentialContext {
    /// Real environment and real subprocesses.
    pub fn system(command_timeout: Duration) -> Self {
        Self {
            env: Arc::new(ProcessEnv),
            commands: Arc::new(SystemCommandRunner),
            command_timeout,
        }
    }

    pub fn var(&self, key: &str) -> Option<String> {
        self.env.var(key)
    }

    /// First set variable among `keys`.
    pub fn first_var(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.env.var(key))
    }

    /// Run a provider CLI and return its stdout on success.
    pub async fn run_cli<I, S>(&self, program: &str, args: I) -> Option<String>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String> + Send,
    {
        let command = CliCommand::new(program, args, self.command_timeout);
        self.commands.run(&command).await.into_stdout()
    }
}

impl std::fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialContext")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}
