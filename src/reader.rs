//! Readers over one file or a directory of partition files.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::dataframe::DataFrame;
use tracing::debug;

use crate::config::FormatConfig;
use crate::engine::Engine;
use crate::error::{Result, TabError};
use crate::formats::{DataFormat, format_name_for_extension, infer_format};
use crate::location::{extension_of, is_data_file};
use crate::storage::{BackendResolver, FileInfo, StorageBackend, list_files};
use crate::table::{ExtraMetadata, SummaryValue, TableSchema, TableSummary};

/// Key under which directory summaries report the file count.
pub const PARTITIONS_KEY: &str = "Partitions";

#[async_trait]
pub trait TableReader: Send + Sync {
    /// The location this reader was opened on.
    fn location(&self) -> &str;

    fn format(&self) -> &Arc<dyn DataFormat>;

    /// Lazy plan over every row.
    async fn read(&self) -> Result<DataFrame>;

    async fn schema(&self) -> Result<TableSchema>;

    async fn summary(&self) -> Result<TableSummary>;
}

/// A single file.
pub struct FileReader {
    engine: Engine,
    backend: Arc<dyn StorageBackend>,
    format: Arc<dyn DataFormat>,
    location: String,
}

impl FileReader {
    pub fn new(
        engine: Engine,
        backend: Arc<dyn StorageBackend>,
        format: Arc<dyn DataFormat>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            backend,
            format,
            location: location.into(),
        }
    }

    async fn engine_path(&self) -> Result<String> {
        self.engine.attach(self.backend.as_ref(), &self.location).await
    }
}

#[async_trait]
impl TableReader for FileReader {
    fn location(&self) -> &str {
        &self.location
    }

    fn format(&self) -> &Arc<dyn DataFormat> {
        &self.format
    }

    async fn read(&self) -> Result<DataFrame> {
        let path = self.engine_path().await?;
        self.format.scan(self.engine.context(), vec![path]).await
    }

    async fn schema(&self) -> Result<TableSchema> {
        let path = self.engine_path().await?;
        self.format.schema(self.engine.context(), &path).await
    }

    async fn summary(&self) -> Result<TableSummary> {
        let path = self.engine_path().await?;
        let ctx = self.engine.context();
        Ok(TableSummary {
            file_size: self.backend.stat_size(&self.location).await?,
            num_rows: self.format.row_count(ctx, &path).await?,
            num_columns: self.format.schema(ctx, &path).await?.len(),
            extra: self.format.extra_metadata(self.backend.as_ref(), &self.location).await?,
        })
    }
}

/// A directory of same-format files read as one table, in listing order.
pub struct DirectoryReader {
    engine: Engine,
    backend: Arc<dyn StorageBackend>,
    format: Arc<dyn DataFormat>,
    location: String,
}

impl DirectoryReader {
    pub fn new(
        engine: Engine,
        backend: Arc<dyn StorageBackend>,
        format: Arc<dyn DataFormat>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            backend,
            format,
            location: location.into(),
        }
    }

    /// Data files of this reader's format, sorted; `EmptyDataset` when none.
    pub async fn files(&self) -> Result<Vec<FileInfo>> {
        let files: Vec<FileInfo> = list_files(self.backend.as_ref(), &self.location, "")
            .await?
            .into_iter()
            .filter(|file| is_data_file(&file.url))
            .filter(|file| format_name_for_extension(&extension_of(&file.url)) == Some(self.format.name()))
            .collect();
        if files.is_empty() {
            return Err(TabError::EmptyDataset {
                location: self.location.clone(),
                extension: self.format.extension().to_string(),
            });
        }
        debug!(location = %self.location, files = files.len(), "listed partition files");
        Ok(files)
    }

    /// One file's reader, sharing this reader's engine and backend.
    fn part(&self, file: &FileInfo) -> FileReader {
        FileReader::new(
            self.engine.clone(),
            self.backend.clone(),
            self.format.clone(),
            file.url.clone(),
        )
    }
}

#[async_trait]
impl TableReader for DirectoryReader {
    fn location(&self) -> &str {
        &self.location
    }

    fn format(&self) -> &Arc<dyn DataFormat> {
        &self.format
    }

    /// Every file must have the first file's columns, names and types in
    /// order; the first one that differs fails the read.
    async fn read(&self) -> Result<DataFrame> {
        let files = self.files().await?;
        let mut paths = Vec::with_capacity(files.len());
        let mut expected: Option<TableSchema> = None;
        for file in &files {
            let path = self.engine.attach(self.backend.as_ref(), &file.url).await?;
            let schema = self.format.schema(self.engine.context(), &path).await?;
            match &expected {
                None => expected = Some(schema),
                Some(first) => {
                    if let Some(difference) = first.difference(&schema) {
                        return Err(TabError::SchemaMismatch {
                            location: self.location.clone(),
                            message: format!("{}: {difference}", file.url),
                        });
                    }
                }
            }
            paths.push(path);
        }
        self.format.scan(self.engine.context(), paths).await
    }

    /// Schema of the first file; the others are not consulted.
    async fn schema(&self) -> Result<TableSchema> {
        let files = self.files().await?;
        self.part(&files[0]).schema().await
    }

    async fn summary(&self) -> Result<TableSummary> {
        let files = self.files().await?;
        let mut num_rows = 0;
        let mut num_columns = None;
        let mut extras = Vec::with_capacity(files.len());

        for file in &files {
            let summary = self.part(file).summary().await?;
            match num_columns {
                None => num_columns = Some(summary.num_columns),
                Some(expected) if expected != summary.num_columns => {
                    return Err(TabError::InconsistentSchema {
                        location: self.location.clone(),
                        file: file.url.clone(),
                        expected,
                        found: summary.num_columns,
                    });
                }
                Some(_) => {}
            }
            num_rows += summary.num_rows;
            extras.extend(summary.extra);
        }

        let mut extra = merge_extra(&extras);
        extra.insert(PARTITIONS_KEY.to_string(), SummaryValue::Int(files.len() as i64));
        Ok(TableSummary {
            file_size: files.iter().map(|f| f.size).sum(),
            num_rows,
            num_columns: num_columns.unwrap_or_default(),
            extra: Some(extra),
        })
    }
}

/// Numeric values are summed. Text values collapse to the single value when
/// every file agrees, else to the sorted distinct values joined by `, `.
fn merge_extra(extras: &[ExtraMetadata]) -> ExtraMetadata {
    let keys: BTreeSet<&String> = extras.iter().flat_map(|e| e.keys()).collect();
    let mut merged = ExtraMetadata::new();
    for key in keys {
        let values: Vec<&SummaryValue> = extras.iter().filter_map(|e| e.get(key)).collect();
        let value = if values.iter().all(|v| v.is_numeric()) {
            values.iter().skip(1).try_fold(values[0].clone(), |acc, v| acc.add(v))
        } else {
            let distinct: BTreeSet<String> = values.iter().map(|v| v.to_string()).collect();
            Some(SummaryValue::Text(distinct.into_iter().collect::<Vec<_>>().join(", ")))
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

/// Open `location` with the right backend, format and reader shape.
///
/// `format_override` wins over the extension; directories are read as
/// partitioned datasets.
pub async fn open_reader(
    engine: &Engine,
    resolver: &BackendResolver,
    location: &str,
    format_override: Option<&str>,
    config: &FormatConfig,
) -> Result<Box<dyn TableReader>> {
    let backend = resolver.resolve(location).await?;
    let is_directory = backend.is_directory(location).await?;
    let format = infer_format(backend.as_ref(), location, is_directory, format_override, config).await?;
    debug!(location, format = format.name(), is_directory, backend = backend.name(), "opening reader");

    Ok(if is_directory {
        Box::new(DirectoryReader::new(engine.clone(), backend, format, location))
    } else {
        Box::new(FileReader::new(engine.clone(), backend, format, location))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra(pairs: &[(&str, SummaryValue)]) -> ExtraMetadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_merge_sums_numbers() {
        let merged = merge_extra(&[
            extra(&[("Row groups", SummaryValue::Int(2))]),
            extra(&[("Row groups", SummaryValue::Int(3))]),
        ]);
        assert_eq!(merged["Row groups"], SummaryValue::Int(5));
    }

    #[test]
    fn test_merge_collapses_unanimous_text() {
        let merged = merge_extra(&[
            extra(&[("Compression", SummaryValue::from("SNAPPY".to_string()))]),
            extra(&[("Compression", SummaryValue::from("SNAPPY".to_string()))]),
        ]);
        assert_eq!(merged["Compression"].to_string(), "SNAPPY");
    }

    #[test]
    fn test_merge_joins_distinct_text_sorted() {
        let merged = merge_extra(&[
            extra(&[("Compression", SummaryValue::from("ZSTD".to_string()))]),
            extra(&[("Compression", SummaryValue::from("GZIP".to_string()))]),
            extra(&[("Compression", SummaryValue::from("ZSTD".to_string()))]),
        ]);
        assert_eq!(merged["Compression"].to_string(), "GZIP, ZSTD");
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert!(merge_extra(&[]).is_empty());
    }
}
