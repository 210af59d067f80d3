use std::collections::BTreeSet;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use datafusion::config::TableParquetOptions;
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::arrow::async_reader::{AsyncFileReader, ParquetObjectReader};
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;

use super::DataFormat;
use crate::config::ParquetConfig;
use crate::error::{Result, TabError};
use crate::storage::StorageBackend;
use crate::streaming::{BatchEncoder, SharedBuffer};
use crate::table::{ExtraMetadata, SummaryValue};

#[derive(Debug, Clone)]
pub struct ParquetFormat {
    compression: String,
}

impl ParquetFormat {
    pub fn new(config: &ParquetConfig) -> Self {
        Self {
            compression: config.compression.to_ascii_lowercase(),
        }
    }

    /// Codec for the streaming writer.
    fn writer_compression(&self) -> Result<Compression> {
        Ok(match self.compression.as_str() {
            "uncompressed" => Compression::UNCOMPRESSED,
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "brotli" => Compression::BROTLI(BrotliLevel::default()),
            "lz4" => Compression::LZ4_RAW,
            "zstd" => Compression::ZSTD(ZstdLevel::default()),
            other => return Err(TabError::config(format!("unknown parquet compression '{other}'"))),
        })
    }

    /// The same codec spelled the way the engine's sink options expect it.
    fn engine_compression(&self) -> Result<String> {
        Ok(match self.writer_compression()? {
            Compression::GZIP(_) => "gzip(6)".to_string(),
            Compression::BROTLI(_) => "brotli(1)".to_string(),
            Compression::ZSTD(_) => "zstd(3)".to_string(),
            Compression::LZ4_RAW => "lz4_raw".to_string(),
            _ => self.compression.clone(),
        })
    }
}

fn codec_name(codec: Compression) -> &'static str {
    match codec {
        Compression::UNCOMPRESSED => "UNCOMPRESSED",
        Compression::SNAPPY => "SNAPPY",
        Compression::GZIP(_) => "GZIP",
        Compression::LZO => "LZO",
        Compression::BROTLI(_) => "BROTLI",
        Compression::LZ4 => "LZ4",
        Compression::ZSTD(_) => "ZSTD",
        Compression::LZ4_RAW => "LZ4_RAW",
    }
}

#[async_trait]
impl DataFormat for ParquetFormat {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn extension(&self) -> &'static str {
        ".parquet"
    }

    async fn scan(&self, ctx: &SessionContext, paths: Vec<String>) -> Result<DataFrame> {
        let options = ParquetReadOptions {
            file_extension: "",
            ..Default::default()
        };
        Ok(ctx.read_parquet(paths, options).await?)
    }

    /// Row group count and the set of column chunk codecs, from the footer alone.
    async fn extra_metadata(
        &self,
        backend: &dyn StorageBackend,
        location: &str,
    ) -> Result<Option<ExtraMetadata>> {
        let meta = backend.head(location).await?;
        let (store, _) = backend.resolve_path(location).await?;
        let mut reader = ParquetObjectReader::new(store, meta);
        let metadata = reader.get_metadata().await?;

        let codecs: BTreeSet<&str> = metadata
            .row_groups()
            .iter()
            .flat_map(|rg| rg.columns().iter().map(|c| codec_name(c.compression())))
            .collect();

        let mut extra = ExtraMetadata::new();
        extra.insert(
            "Row groups".to_string(),
            SummaryValue::Int(metadata.num_row_groups() as i64),
        );
        if !codecs.is_empty() {
            extra.insert(
                "Compression".to_string(),
                SummaryValue::Text(codecs.into_iter().collect::<Vec<_>>().join(", ")),
            );
        }
        Ok(Some(extra))
    }

    fn encoder(&self, schema: SchemaRef) -> Result<Box<dyn BatchEncoder>> {
        let props = WriterProperties::builder()
            .set_compression(self.writer_compression()?)
            .build();
        let buffer = SharedBuffer::default();
        let writer = ArrowWriter::try_new(buffer.clone(), schema, Some(props))?;
        Ok(Box::new(ParquetEncoder {
            buffer,
            writer: Some(writer),
        }))
    }

    async fn write_single(&self, _ctx: &SessionContext, plan: DataFrame, path: &str) -> Result<()> {
        let mut options = TableParquetOptions::default();
        options.global.compression = Some(self.engine_compression()?);
        plan.write_parquet(
            path,
            DataFrameWriteOptions::new().with_single_file_output(true),
            Some(options),
        )
        .await?;
        Ok(())
    }
}

/// One row group per batch; bytes are handed out as soon as the writer
/// releases them and the footer comes with `finish`.
struct ParquetEncoder {
    buffer: SharedBuffer,
    writer: Option<ArrowWriter<SharedBuffer>>,
}

impl BatchEncoder for ParquetEncoder {
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write(batch)?;
            writer.flush()?;
        }
        Ok(self.buffer.drain())
    }

    fn finish(&mut self) -> Result<Bytes> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(self.buffer.drain())
    }
}
