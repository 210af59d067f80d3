//! Error types for tabkit.
//!
//! Every fallible library operation returns [`Result`], whose error side is
//! [`TabError`]. User-facing variants always name the location, scheme or
//! format that caused them.

use thiserror::Error;

pub type Result<T, E = TabError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum TabError {
    /// The location string could not be split into scheme, authority and path.
    #[error("Malformed location '{location}': {reason}")]
    MalformedLocation { location: String, reason: String },

    /// No storage handler is available for the scheme.
    #[error("Unsupported scheme '{scheme}://': no storage handler is registered for it")]
    UnsupportedScheme { scheme: String },

    /// An explicit format name did not match any registered format.
    #[error("Unknown format: {format}. Supported: {supported}")]
    UnknownFormat { format: String, supported: String },

    /// The extension inferred from a location did not match any registered format.
    #[error("Unknown extension: '{extension}' in {location}. Supported: {supported}")]
    UnknownExtension {
        extension: String,
        location: String,
        supported: String,
    },

    /// Every step of a provider's credential chain failed.
    #[error("Could not authenticate to {scheme}:// for '{account}'. {remediation}")]
    Authentication {
        scheme: String,
        account: String,
        remediation: String,
    },

    #[error("Not found: {location}")]
    NotFound { location: String },

    #[error("Permission denied: {location}: {message}")]
    PermissionDenied { location: String, message: String },

    /// A directory contained no files with the expected extension.
    #[error("No {extension} files found in {location}")]
    EmptyDataset { location: String, extension: String },

    /// Partition files of one dataset disagree on their columns.
    #[error("Schema mismatch in {location}: {message}")]
    SchemaMismatch { location: String, message: String },

    /// Partition files of one dataset disagree on their column count.
    #[error("Inconsistent column counts in {location}: expected {expected}, found {found} in {file}")]
    InconsistentSchema {
        location: String,
        file: String,
        expected: usize,
        found: usize,
    },

    /// Any other storage failure.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Query engine error: {0}")]
    Engine(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TabError {
    /// Map an `object_store` failure for `location` onto the taxonomy.
    pub fn from_store(location: impl Into<String>, err: object_store::Error) -> Self {
        let location = location.into();
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound { location },
            object_store::Error::PermissionDenied { source, .. }
            | object_store::Error::Unauthenticated { source, .. } => Self::PermissionDenied {
                location,
                message: source.to_string(),
            },
            other => Self::Storage {
                message: format!("operation on {location} failed"),
                source: Some(Box::new(other)),
            },
        }
    }

    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True when the error means "nothing at this location".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
