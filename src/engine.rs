//! The query engine session every reader and writer shares.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::dataframe::DataFrame;
use datafusion::datasource::MemTable;
use datafusion::prelude::{SessionConfig, SessionContext};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::location::Location;
use crate::storage::options::store_base;
use crate::storage::StorageBackend;

/// Name under which `sql` exposes its input plan.
pub const TABLE_NAME: &str = "t";

/// A DataFusion session configured for deterministic row order.
///
/// One partition and no file-scan repartitioning mean rows come out in
/// listing order, which windowing and partitioned writes rely on.
#[derive(Clone)]
pub struct Engine {
    ctx: SessionContext,
    attached: Arc<Mutex<HashSet<String>>>,
}

impl Engine {
    pub fn new(config: &ProcessingConfig) -> Self {
        let mut session = SessionConfig::new()
            .with_target_partitions(1)
            .with_repartition_file_scans(false)
            .with_batch_size(config.batch_size);
        // parquet strings read back as Utf8, like every other format
        session.options_mut().execution.parquet.schema_force_view_types = false;
        Self {
            ctx: SessionContext::new_with_config(session),
            attached: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Make `location` readable and writable by the engine and return the
    /// path to hand to it.
    ///
    /// Remote stores get their own client built from the backend's options
    /// mapping; backends without options share their live client.
    pub async fn attach(&self, backend: &dyn StorageBackend, location: &str) -> Result<String> {
        let url = backend.engine_url(location)?;
        let loc = Location::parse(&url)?;
        if loc.is_local() {
            return Ok(url);
        }

        let base = store_base(&loc.scheme, &loc.authority)?;
        if self.attached.lock().contains(base.as_str()) {
            return Ok(url);
        }
        let store = backend.engine_store(&base, location).await?;
        self.ctx.register_object_store(&base, store);
        self.attached.lock().insert(base.as_str().to_string());
        debug!(base = %base, backend = backend.name(), "registered object store with engine");
        Ok(url)
    }

    /// Run `query` with `plan` registered as table `t`.
    pub async fn sql(&self, plan: DataFrame, query: &str) -> Result<DataFrame> {
        self.ctx.deregister_table(TABLE_NAME)?;
        self.ctx.register_table(TABLE_NAME, plan.into_view())?;
        Ok(self.ctx.sql(query).await?)
    }

    /// Lazy plan over batches already in memory.
    pub fn from_batches(&self, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<DataFrame> {
        let table = MemTable::try_new(schema, vec![batches])?;
        Ok(self.ctx.read_table(Arc::new(table))?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_id", &self.ctx.session_id())
            .finish_non_exhaustive()
    }
}
