use datafusion::dataframe::DataFrame;
use indicatif::ProgressBar;
use tracing::info;

use crate::engine::Engine;
use crate::error::{Result, TabError};
use crate::formats::DataFormat;
use crate::location::Location;
use crate::storage::StorageBackend;

/// Receives one tick per partition attempted, written or not.
pub trait PartitionProgress: Send + Sync {
    fn begin(&self, _partitions: usize) {}
    fn advance(&self) {}
    fn finish(&self) {}
}

/// Progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl PartitionProgress for NoProgress {}

impl PartitionProgress for ProgressBar {
    fn begin(&self, partitions: usize) {
        self.set_length(partitions as u64);
    }

    fn advance(&self) {
        self.inc(1);
    }

    fn finish(&self) {
        self.finish_and_clear();
    }
}

/// Contiguous row ranges of a partitioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub total_rows: usize,
    pub partitions: usize,
    pub rows_per_partition: usize,
}

impl PartitionLayout {
    pub fn new(total_rows: usize, partitions: usize) -> Result<Self> {
        if partitions == 0 {
            return Err(TabError::config("partition count must be at least 1"));
        }
        Ok(Self {
            total_rows,
            partitions,
            rows_per_partition: total_rows.div_ceil(partitions),
        })
    }

    /// `(offset, rows)` of partition `index`, `None` when it starts past the end.
    pub fn slice(&self, index: usize) -> Option<(usize, usize)> {
        let start = index * self.rows_per_partition;
        (start < self.total_rows).then(|| (start, self.rows_per_partition.min(self.total_rows - start)))
    }
}

/// `part-00003.parquet`
pub fn partition_file_name(index: usize, extension: &str) -> String {
    format!("part-{index:05}{extension}")
}

/// Split `plan` into `partitions` contiguous slices and write each to its own
/// file inside `destination`. Returns the locations written, in order.
pub async fn write_partitioned(
    engine: &Engine,
    backend: &dyn StorageBackend,
    format: &dyn DataFormat,
    plan: DataFrame,
    destination: &str,
    partitions: usize,
    progress: &dyn PartitionProgress,
) -> Result<Vec<String>> {
    let total_rows = plan.clone().count().await?;
    let layout = PartitionLayout::new(total_rows, partitions)?;
    let dir = Location::parse(destination)?;
    if dir.is_local() {
        tokio::fs::create_dir_all(&dir.path).await?;
    }

    progress.begin(partitions);
    let mut written = Vec::new();
    for index in 0..partitions {
        if let Some((offset, rows)) = layout.slice(index) {
            let file = dir.join(&partition_file_name(index, format.extension())).to_url();
            let path = engine.attach(backend, &file).await?;
            let part = plan.clone().limit(offset, Some(rows))?;
            format.write_single(engine.context(), part, &path).await?;
            info!(file = %file, offset, rows, "wrote partition");
            written.push(file);
        }
        progress.advance();
    }
    progress.finish();
    Ok(written)
}
