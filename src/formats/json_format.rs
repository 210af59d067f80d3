use arrow::datatypes::SchemaRef;
use arrow::json::LineDelimitedWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::prelude::{NdJsonReadOptions, SessionContext};

use super::DataFormat;
use crate::error::Result;
use crate::streaming::BatchEncoder;

/// Newline-delimited JSON, one object per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

#[async_trait]
impl DataFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn extension(&self) -> &'static str {
        ".jsonl"
    }

    async fn scan(&self, ctx: &SessionContext, paths: Vec<String>) -> Result<DataFrame> {
        let options = NdJsonReadOptions {
            file_extension: "",
            ..Default::default()
        };
        Ok(ctx.read_json(paths, options).await?)
    }

    fn encoder(&self, _schema: SchemaRef) -> Result<Box<dyn BatchEncoder>> {
        Ok(Box::new(JsonEncoder))
    }

    async fn write_single(&self, _ctx: &SessionContext, plan: DataFrame, path: &str) -> Result<()> {
        plan.write_json(
            path,
            DataFrameWriteOptions::new().with_single_file_output(true),
            None,
        )
        .await?;
        Ok(())
    }
}

struct JsonEncoder;

impl BatchEncoder for JsonEncoder {
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes> {
        let mut writer = LineDelimitedWriter::new(Vec::new());
        writer.write(batch)?;
        writer.finish()?;
        Ok(Bytes::from(writer.into_inner()))
    }

    fn finish(&mut self) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}
