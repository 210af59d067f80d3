//! Output pipeline: windowing, streaming encoders and partitioned writes.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::dataframe::DataFrame;
use datafusion::execution::object_store::ObjectStoreUrl;
use datafusion::prelude::SessionContext;
use futures::stream;
use futures::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, TabError};
use crate::location::Location;
use crate::storage::ByteStream;
use crate::storage::options::store_base;
use crate::table::TableSchema;

mod encode;
mod partition;
mod window;

pub use encode::{BatchEncoder, BatchStream, SharedBuffer, encode_batches};
pub use partition::{
    NoProgress, PartitionLayout, PartitionProgress, partition_file_name, write_partitioned,
};
pub use window::{Window, WindowedRows};

/// Store registered with the engine for `path`, and the object path within it.
fn engine_store(ctx: &SessionContext, path: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
    let loc = Location::parse(path)?;
    let malformed = |reason: String| TabError::MalformedLocation {
        location: path.to_string(),
        reason,
    };
    if loc.is_local() {
        let store = ctx.runtime_env().object_store(ObjectStoreUrl::local_filesystem())?;
        let absolute = std::path::absolute(&loc.path)?;
        let object = ObjectPath::from_absolute_path(absolute).map_err(|e| malformed(e.to_string()))?;
        return Ok((store, object));
    }
    let url = ObjectStoreUrl::parse(store_base(&loc.scheme, &loc.authority)?)?;
    let store = ctx.runtime_env().object_store(url)?;
    Ok((store, ObjectPath::from(loc.path.as_str())))
}

/// Write a byte stream to `path` through the engine's object store, chunk by
/// chunk, without holding the whole output in memory.
pub async fn write_stream(ctx: &SessionContext, path: &str, mut bytes: ByteStream) -> Result<()> {
    let (store, object) = engine_store(ctx, path)?;
    let mut writer = BufWriter::new(store, object);
    while let Some(chunk) = bytes.next().await {
        writer.write_all(&chunk?).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

/// Rows of every plan, one plan after the other.
///
/// Each input is `(location, plan)`. Every plan must have the first plan's
/// columns; the first that does not is reported as a `SchemaMismatch`.
pub fn concat_plans(inputs: Vec<(String, DataFrame)>) -> Result<(SchemaRef, BatchStream)> {
    let Some((_, first)) = inputs.first() else {
        return Err(TabError::config("nothing to concatenate"));
    };
    let schema: SchemaRef = first.schema().inner().clone();
    let expected = TableSchema::from_arrow(&schema);
    for (location, plan) in &inputs[1..] {
        if let Some(difference) = expected.difference(&TableSchema::from_arrow(plan.schema().as_arrow())) {
            return Err(TabError::SchemaMismatch {
                location: location.clone(),
                message: difference,
            });
        }
    }

    let target = schema.clone();
    let batches = stream::iter(inputs.into_iter().map(|(_, plan)| plan))
        .then(|plan| async move { plan.execute_stream().await.map_err(TabError::from) })
        .map_ok(|batches| batches.map_err(TabError::from))
        .try_flatten()
        .map(move |batch| {
            batch.and_then(|b| Ok(RecordBatch::try_new(target.clone(), b.columns().to_vec())?))
        })
        .boxed();
    Ok((schema, batches))
}
