use arrow::csv::WriterBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use datafusion::config::CsvOptions;
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::prelude::{CsvReadOptions, SessionContext};

use super::DataFormat;
use crate::config::CsvConfig;
use crate::error::Result;
use crate::streaming::BatchEncoder;

/// Delimited text: `csv` and `tsv` differ only in the separator.
#[derive(Debug, Clone)]
pub struct CsvFormat {
    name: &'static str,
    extension: &'static str,
    delimiter: u8,
    has_header: bool,
    schema_sample_size: usize,
}

impl CsvFormat {
    pub fn csv(config: &CsvConfig) -> Self {
        Self {
            name: "csv",
            extension: ".csv",
            delimiter: config.delimiter as u8,
            has_header: config.has_header,
            schema_sample_size: config.schema_sample_size,
        }
    }

    pub fn tsv(config: &CsvConfig) -> Self {
        Self {
            name: "tsv",
            extension: ".tsv",
            delimiter: b'\t',
            ..Self::csv(config)
        }
    }
}

#[async_trait]
impl DataFormat for CsvFormat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extension(&self) -> &'static str {
        self.extension
    }

    async fn scan(&self, ctx: &SessionContext, paths: Vec<String>) -> Result<DataFrame> {
        let options = CsvReadOptions::new()
            .has_header(self.has_header)
            .delimiter(self.delimiter)
            .schema_infer_max_records(self.schema_sample_size)
            .file_extension("");
        Ok(ctx.read_csv(paths, options).await?)
    }

    fn encoder(&self, schema: SchemaRef) -> Result<Box<dyn BatchEncoder>> {
        Ok(Box::new(CsvEncoder {
            schema,
            delimiter: self.delimiter,
            has_header: self.has_header,
            started: false,
        }))
    }

    async fn write_single(&self, _ctx: &SessionContext, plan: DataFrame, path: &str) -> Result<()> {
        let options = CsvOptions {
            has_header: Some(self.has_header),
            delimiter: self.delimiter,
            ..Default::default()
        };
        plan.write_csv(
            path,
            DataFrameWriteOptions::new().with_single_file_output(true),
            Some(options),
        )
        .await?;
        Ok(())
    }
}

/// Header goes out with the first batch only.
struct CsvEncoder {
    schema: SchemaRef,
    delimiter: u8,
    has_header: bool,
    started: bool,
}

impl BatchEncoder for CsvEncoder {
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes> {
        let mut buf = Vec::new();
        {
            let mut writer = WriterBuilder::new()
                .with_header(self.has_header && !self.started)
                .with_delimiter(self.delimiter)
                .build(&mut buf);
            writer.write(batch)?;
        }
        self.started = true;
        Ok(Bytes::from(buf))
    }

    fn finish(&mut self) -> Result<Bytes> {
        if self.started {
            return Ok(Bytes::new());
        }
        // no rows at all: still emit the header line
        self.encode(&RecordBatch::new_empty(self.schema.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn batch(ids: Vec<i64>, names: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(ids)), Arc::new(StringArray::from(names))],
        )
        .unwrap()
    }

    #[test]
    fn test_header_only_on_first_batch() {
        let format = CsvFormat::csv(&CsvConfig::default());
        let first = batch(vec![1, 2], vec!["a", "b"]);
        let mut encoder = format.encoder(first.schema()).unwrap();
        let a = encoder.encode(&first).unwrap();
        let b = encoder.encode(&batch(vec![3], vec!["c"])).unwrap();
        assert_eq!(a, Bytes::from("id,name\n1,a\n2,b\n"));
        assert_eq!(b, Bytes::from("3,c\n"));
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_tsv_separator_and_empty_output_header() {
        let format = CsvFormat::tsv(&CsvConfig::default());
        let mut encoder = format.encoder(batch(vec![], vec![]).schema()).unwrap();
        assert_eq!(encoder.finish().unwrap(), Bytes::from("id\tname\n"));
    }
}
