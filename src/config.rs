use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabError};

/// Global configuration, resolved once at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Format-specific configurations
    pub formats: FormatConfig,
    /// Storage and credential configuration
    pub storage: StorageConfig,
    /// Processing configuration
    pub processing: ProcessingConfig,
    /// Interactive output configuration
    pub output: OutputConfig,
}

/// Configuration for the tabular formats
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// CSV format configuration (TSV shares it with a tab delimiter)
    pub csv: CsvConfig,
    /// Parquet format configuration
    pub parquet: ParquetConfig,
}

/// CSV format specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Whether the first row is a header
    pub has_header: bool,
    /// Number of rows to sample for schema inference
    pub schema_sample_size: usize,
    /// CSV delimiter
    pub delimiter: char,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            has_header: true,
            schema_sample_size: 1000,
            delimiter: ',',
        }
    }
}

/// Parquet format specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParquetConfig {
    /// Compression codec used when writing (uncompressed, snappy, gzip, brotli, lz4, zstd)
    pub compression: String,
}

impl Default for ParquetConfig {
    fn default() -> Self {
        Self {
            compression: "snappy".to_string(),
        }
    }
}

/// Storage system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Azure blob configuration
    pub azure: AzureConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Credential chain configuration
    pub credentials: CredentialConfig,
}

/// Azure blob configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Interpret the authority of `az://` locations as the storage account
    /// instead of the container.
    pub url_authority_is_account: bool,
}

/// S3 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// AWS region used when the environment does not name one
    pub region: String,
    /// S3 endpoint URL (optional, for S3-compatible services)
    pub endpoint: Option<String>,
    /// Allow plain HTTP endpoints
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            allow_http: false,
        }
    }
}

/// Credential chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Upper bound for provider CLI invocations, in seconds
    pub command_timeout_secs: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
        }
    }
}

impl CredentialConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Data processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Rows per record batch when streaming
    pub batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { batch_size: 8192 }
    }
}

/// Interactive output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Rows shown by `view` and `sql` when no limit is given
    pub default_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

impl Config {
    /// Load configuration from a JSON or YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if is_yaml(path) {
            serde_yaml::from_str(&content)
                .map_err(|e| TabError::config(format!("{}: {e}", path.display())))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| TabError::config(format!("{}: {e}", path.display())))
        }
    }

    /// Save configuration to a JSON or YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self).map_err(|e| TabError::config(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| TabError::config(e.to_string()))?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
