use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::dataframe::DataFrame;

use crate::error::Result;

/// Row window requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub skip: usize,
    /// `None` means "up to the display cap, and tell me if there was more".
    pub limit: Option<usize>,
}

/// Materialized rows of a window.
#[derive(Debug, Clone)]
pub struct WindowedRows {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    /// Rows beyond the display cap exist. Never set for explicit limits.
    pub truncated: bool,
}

impl WindowedRows {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

impl Window {
    pub fn new(skip: usize, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    /// Lazily slice `plan` to `[skip, skip + limit)`. No truncation reporting;
    /// used for non-interactive output.
    pub fn apply(&self, plan: DataFrame) -> Result<DataFrame> {
        if self.skip == 0 && self.limit.is_none() {
            return Ok(plan);
        }
        Ok(plan.limit(self.skip, self.limit)?)
    }

    /// Materialize the window for display.
    ///
    /// Without an explicit limit, one row more than `default_limit` is
    /// fetched; getting it back means the output is truncated.
    pub async fn collect(&self, plan: DataFrame, default_limit: usize) -> Result<WindowedRows> {
        let schema = plan.schema().inner().clone();
        let (fetch, cap) = match self.limit {
            Some(limit) => (limit, None),
            None => (default_limit + 1, Some(default_limit)),
        };
        let batches = plan.limit(self.skip, Some(fetch))?.collect().await?;
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();

        Ok(match cap {
            Some(cap) if total > cap => WindowedRows {
                schema,
                batches: truncate_batches(batches, cap),
                truncated: true,
            },
            _ => WindowedRows {
                schema,
                batches,
                truncated: false,
            },
        })
    }
}

/// Keep the first `rows` rows.
fn truncate_batches(batches: Vec<RecordBatch>, rows: usize) -> Vec<RecordBatch> {
    let mut remaining = rows;
    let mut kept = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.num_rows());
        kept.push(batch.slice(0, take));
        remaining -= take;
    }
    kept
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    use super::*;
    use crate::config::ProcessingConfig;
    use crate::engine::Engine;

    /// `rows` rows numbered from 1, split into batches of three.
    fn plan(rows: i64) -> DataFrame {
        let engine = Engine::new(&ProcessingConfig::default());
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let batches = (1..=rows)
            .collect::<Vec<_>>()
            .chunks(3)
            .map(|chunk| {
                RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(chunk.to_vec()))])
                    .unwrap()
            })
            .collect();
        engine.from_batches(schema, batches).unwrap()
    }

    fn values(rows: &WindowedRows) -> Vec<i64> {
        rows.batches
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_short_table_is_not_truncated() {
        let rows = Window::default().collect(plan(8), 20).await.unwrap();
        assert_eq!(rows.num_rows(), 8);
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_exactly_the_cap_is_not_truncated() {
        let rows = Window::default().collect(plan(20), 20).await.unwrap();
        assert_eq!(rows.num_rows(), 20);
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_one_more_than_cap_is_truncated() {
        let rows = Window::new(2, None).collect(plan(30), 10).await.unwrap();
        assert!(rows.truncated);
        assert_eq!(values(&rows), (3..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_skip_shrinks_remaining_rows() {
        let rows = Window::new(15, None).collect(plan(30), 20).await.unwrap();
        assert_eq!(rows.num_rows(), 15);
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_explicit_limit_never_reports_truncation() {
        let rows = Window::new(6, Some(10)).collect(plan(8), 20).await.unwrap();
        assert_eq!(values(&rows), vec![7, 8]);
        assert!(!rows.truncated);

        let rows = Window::new(0, Some(5)).collect(plan(100), 20).await.unwrap();
        assert_eq!(rows.num_rows(), 5);
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_apply_is_lazy_slice() {
        let sliced = Window::new(3, Some(2)).apply(plan(10)).unwrap();
        assert_eq!(sliced.count().await.unwrap(), 2);
        let all = Window::default().apply(plan(10)).unwrap();
        assert_eq!(all.count().await.unwrap(), 10);
    }
}
