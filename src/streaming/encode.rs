use std::io::Write;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::ByteStream;

pub type BatchStream = BoxStream<'static, Result<RecordBatch>>;

/// Turns record batches into bytes of one output encoding, one batch at a time.
pub trait BatchEncoder: Send {
    /// Bytes for `batch`, plus any header that has not been emitted yet.
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes>;

    /// Trailing bytes (footers), and the header if no batch was ever encoded.
    fn finish(&mut self) -> Result<Bytes>;
}

/// In-memory sink that writers can own while we drain it between batches.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Take everything written so far.
    pub fn drain(&self) -> Bytes {
        Bytes::from(std::mem::take(&mut *self.inner.lock()))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

enum EncodeState {
    Running(BatchStream, Box<dyn BatchEncoder>),
    Done,
}

/// Encode a batch stream lazily: one chunk per input batch, then the trailer.
///
/// Empty chunks are skipped. Memory use is bounded by the largest batch.
pub fn encode_batches(batches: BatchStream, encoder: Box<dyn BatchEncoder>) -> ByteStream {
    stream::try_unfold(EncodeState::Running(batches, encoder), next_chunk).boxed()
}

async fn next_chunk(state: EncodeState) -> Result<Option<(Bytes, EncodeState)>> {
    let EncodeState::Running(mut batches, mut encoder) = state else {
        return Ok(None);
    };
    while let Some(batch) = batches.next().await {
        let chunk = encoder.encode(&batch?)?;
        if !chunk.is_empty() {
            return Ok(Some((chunk, EncodeState::Running(batches, encoder))));
        }
    }
    let tail = encoder.finish()?;
    if tail.is_empty() {
        Ok(None)
    } else {
        Ok(Some((tail, EncodeState::Done)))
    }
}
