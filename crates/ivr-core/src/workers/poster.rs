use crate::cdr::{CdrPool, CdrQueue, CdrSink, CallDetailRecord};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Writes queued call-detail records and returns them to the pool
///
/// A failed write is logged and the record dropped; call processing is
/// never held up by the sink.
pub struct CdrPoster {
    pool: Arc<CdrPool>,
    sink: Arc<dyn CdrSink>,
}

impl CdrPoster {
    pub fn new(pool: Arc<CdrPool>, sink: Arc<dyn CdrSink>) -> Self {
        Self { pool, sink }
    }

    async fn post(&self, record: Box<CallDetailRecord>) {
        if let Err(e) = self.sink.write(&record).await {
            warn!(
                "Dropping {:?} record for slot {} sequence {}: {}",
                record.kind, record.slot, record.sequence, e
            );
            self.pool.note_dropped();
        }
        self.pool.recycle(record);
    }

    pub async fn run(self, mut queue: CdrQueue, cancel: CancellationToken) {
        debug!("Call detail poster started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                record = queue.recv() => record,
            };
            match next {
                Some(record) => self.post(record).await,
                None => break,
            }
        }

        let mut flushed = 0;
        while let Ok(record) = queue.try_recv() {
            self.post(record).await;
            flushed += 1;
        }
        if let Err(e) = self.sink.flush().await {
            warn!("Call detail flush failed: {}", e);
        }
        debug!("Call detail poster stopped, {} records written on the way out", flushed);
    }
}
