use crate::config::*;
use crate::error::{Result, TabError};

/// Validates the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_formats(&config.formats)?;
    validate_storage(&config.storage)?;
    validate_processing(&config.processing)?;
    validate_output(&config.output)?;
    Ok(())
}

/// Validates format-specific configurations
fn validate_formats(config: &FormatConfig) -> Result<()> {
    if !config.csv.delimiter.is_ascii() {
        return Err(TabError::config(format!(
            "CSV delimiter must be a single ASCII character, got {:?}",
            config.csv.delimiter
        )));
    }
    if config.csv.schema_sample_size == 0 {
        return Err(TabError::config("CSV schema sample size cannot be zero"));
    }

    match config.parquet.compression.to_ascii_lowercase().as_str() {
        "uncompressed" | "snappy" | "gzip" | "brotli" | "lz4" | "zstd" => Ok(()),
        _ => Err(TabError::config(format!(
            "Invalid Parquet compression codec: {}",
            config.parquet.compression
        ))),
    }
}

/// Validates storage configuration
fn validate_storage(config: &StorageConfig) -> Result<()> {
    if config.credentials.command_timeout_secs == 0 {
        return Err(TabError::config("Credential command timeout cannot be zero"));
    }
    if config.s3.region.is_empty() {
        return Err(TabError::config("S3 region cannot be empty"));
    }
    if let Some(endpoint) = &config.s3.endpoint {
        url::Url::parse(endpoint)
            .map_err(|e| TabError::config(format!("Invalid S3 endpoint '{endpoint}': {e}")))?;
    }
    Ok(())
}

/// Validates processing configuration
fn validate_processing(config: &ProcessingConfig) -> Result<()> {
    if config.batch_size == 0 {
        return Err(TabError::config("Batch size cannot be zero"));
    }
    Ok(())
}

fn validate_output(config: &OutputConfig) -> Result<()> {
    if config.default_limit == 0 {
        return Err(TabError::config("Default display limit cannot be zero"));
    }
    Ok(())
}
