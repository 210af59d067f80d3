use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use datafusion::dataframe::DataFrame;
use datafusion::prelude::SessionContext;
use futures::StreamExt;
use once_cell::sync::Lazy;

use crate::config::FormatConfig;
use crate::error::{Result, TabError};
use crate::location::{extension_of, is_data_file};
use crate::storage::{ByteStream, StorageBackend};
use crate::streaming::{BatchEncoder, encode_batches, write_stream};
use crate::table::{ExtraMetadata, TableSchema};

mod avro_format;
mod csv_format;
mod json_format;
mod parquet_format;

pub use avro_format::AvroFormat;
pub use csv_format::CsvFormat;
pub use json_format::JsonFormat;
pub use parquet_format::ParquetFormat;

/// One tabular file encoding.
///
/// Paths handed to `scan`, `schema`, `row_count` and `write_single` are the
/// engine-facing form returned by [`crate::engine::Engine::attach`].
#[async_trait]
pub trait DataFormat: Send + Sync {
    /// Registry name, e.g. `csv`.
    fn name(&self) -> &'static str;

    /// File extension including the dot, used for partition file names.
    fn extension(&self) -> &'static str;

    /// Scan `paths` into one lazy plan whose rows follow the order of `paths`.
    async fn scan(&self, ctx: &SessionContext, paths: Vec<String>) -> Result<DataFrame>;

    async fn schema(&self, ctx: &SessionContext, path: &str) -> Result<TableSchema> {
        let plan = self.scan(ctx, vec![path.to_string()]).await?;
        Ok(TableSchema::from_arrow(plan.schema().as_arrow()))
    }

    async fn row_count(&self, ctx: &SessionContext, path: &str) -> Result<usize> {
        Ok(self.scan(ctx, vec![path.to_string()]).await?.count().await?)
    }

    /// Facts stored in the file itself; `None` for formats that carry none.
    async fn extra_metadata(
        &self,
        _backend: &dyn StorageBackend,
        _location: &str,
    ) -> Result<Option<ExtraMetadata>> {
        Ok(None)
    }

    /// Streaming encoder for batches of `schema`.
    fn encoder(&self, schema: SchemaRef) -> Result<Box<dyn BatchEncoder>>;

    /// Encode `plan` as a lazy sequence of byte chunks, one per engine batch.
    async fn write(&self, plan: DataFrame) -> Result<ByteStream> {
        let encoder = self.encoder(plan.schema().inner().clone())?;
        let batches = plan.execute_stream().await?.map(|batch| batch.map_err(TabError::from));
        Ok(encode_batches(batches.boxed(), encoder))
    }

    /// Write all of `plan` to one file at `path`.
    ///
    /// The default streams [`write`](Self::write) into the engine's store for
    /// `path`; formats the engine can sink natively override it.
    async fn write_single(&self, ctx: &SessionContext, plan: DataFrame, path: &str) -> Result<()> {
        let bytes = self.write(plan).await?;
        write_stream(ctx, path, bytes).await
    }
}

type FormatFactory = fn(&FormatConfig) -> Arc<dyn DataFormat>;

static FORMAT_REGISTRY: Lazy<BTreeMap<&'static str, FormatFactory>> = Lazy::new(|| {
    let mut m: BTreeMap<&'static str, FormatFactory> = BTreeMap::new();
    m.insert("csv", |config| Arc::new(CsvFormat::csv(&config.csv)));
    m.insert("tsv", |config| Arc::new(CsvFormat::tsv(&config.csv)));
    m.insert("parquet", |config| Arc::new(ParquetFormat::new(&config.parquet)));
    m.insert("jsonl", |_| Arc::new(JsonFormat));
    m.insert("avro", |_| Arc::new(AvroFormat));
    m
});

/// File extensions accepted for each format besides its own name.
const EXTENSION_ALIASES: &[(&str, &str)] = &[("ndjson", "jsonl"), ("json", "jsonl"), ("pq", "parquet")];

pub fn supported_formats() -> String {
    FORMAT_REGISTRY.keys().copied().collect::<Vec<_>>().join(", ")
}

/// Look a format up by name, case-insensitively.
pub fn get_format(name: &str, config: &FormatConfig) -> Result<Arc<dyn DataFormat>> {
    FORMAT_REGISTRY
        .get(name.to_ascii_lowercase().as_str())
        .map(|factory| factory(config))
        .ok_or_else(|| TabError::UnknownFormat {
            format: name.to_string(),
            supported: supported_formats(),
        })
}

/// Registry name of the format files ending in `.{extension}` hold.
pub fn format_name_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    EXTENSION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == extension)
        .map(|(_, name)| *name)
        .or_else(|| FORMAT_REGISTRY.get_key_value(extension.as_str()).map(|(name, _)| *name))
}

/// Format for the extension of `location`.
pub fn get_format_for_extension(location: &str, config: &FormatConfig) -> Result<Arc<dyn DataFormat>> {
    let extension = extension_of(location);
    format_name_for_extension(&extension)
        .and_then(|name| FORMAT_REGISTRY.get(name))
        .map(|factory| factory(config))
        .ok_or_else(|| TabError::UnknownExtension {
            extension,
            location: location.to_string(),
            supported: supported_formats(),
        })
}

/// Pick the format of `location`: the explicit override, else the extension of
/// the file, else (for a directory) that of its first data file.
pub async fn infer_format(
    backend: &dyn StorageBackend,
    location: &str,
    is_directory: bool,
    override_name: Option<&str>,
    config: &FormatConfig,
) -> Result<Arc<dyn DataFormat>> {
    if let Some(name) = override_name {
        return get_format(name, config);
    }
    if !is_directory {
        return get_format_for_extension(location, config);
    }
    let mut files = backend.list(location, "").await?;
    while let Some(file) = files.next().await {
        let file = file?;
        if is_data_file(&file.url) {
            return get_format_for_extension(&file.url, config);
        }
    }
    Err(TabError::EmptyDataset {
        location: location.to_string(),
        extension: "data".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_ignores_case() {
        let config = FormatConfig::default();
        assert_eq!(get_format("CSV", &config).unwrap().name(), "csv");
        assert_eq!(get_format("tsv", &config).unwrap().extension(), ".tsv");
        let err = get_format("xlsx", &config).err().unwrap();
        assert_eq!(err.to_string(), "Unknown format: xlsx. Supported: avro, csv, jsonl, parquet, tsv");
    }

    #[test]
    fn test_lookup_by_extension() {
        let config = FormatConfig::default();
        assert_eq!(get_format_for_extension("data/events.csv", &config).unwrap().name(), "csv");
        assert_eq!(get_format_for_extension("s3://b/x.PARQUET", &config).unwrap().name(), "parquet");
        assert_eq!(get_format_for_extension("logs.ndjson", &config).unwrap().name(), "jsonl");
        let err = get_format_for_extension("notes.txt", &config).err().unwrap();
        assert!(matches!(err, TabError::UnknownExtension { ref extension, .. } if extension == "txt"));
        assert!(err.to_string().contains("notes.txt"));
    }

    #[test]
    fn test_extension_aliases() {
        assert_eq!(format_name_for_extension(".PQ"), Some("parquet"));
        assert_eq!(format_name_for_extension("json"), Some("jsonl"));
        assert_eq!(format_name_for_extension("tsv"), Some("tsv"));
        assert_eq!(format_name_for_extension(""), None);
    }
}
