// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batcher workers: framed records in, finished batches out.
//!
//! Each worker pulls records from the shared ingestion queue and packs them
//! into pool batches, flushing when a batch is full or when the wait
//! duration elapses with at least one record on hand. Pushing a finished
//! batch to the delivery queue may block - that is the pipeline's
//! backpressure point: when outlets fall behind, batchers stall instead of
//! growing memory.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error};

use crate::batch::{Batch, BatchPool};
use crate::config::ShuttleConfig;

/// Shared end of a bounded queue drained by a pool of workers. Workers take
/// the lock only for the duration of one `recv`, so records still hand off
/// one at a time.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Spawns the batcher pool. Workers exit once the ingestion queue is closed
/// and drained, flushing any partial batch on the way out.
pub fn start_batchers(
    config: &ShuttleConfig,
    pool: Arc<BatchPool>,
    inbox: SharedReceiver<Bytes>,
    outbox: mpsc::Sender<Batch>,
) -> Vec<JoinHandle<()>> {
    (0..config.num_batchers)
        .map(|_| {
            let batcher = Batcher {
                inbox: Arc::clone(&inbox),
                outbox: outbox.clone(),
                pool: Arc::clone(&pool),
                wait: config.wait_duration,
            };
            tokio::spawn(batcher.run())
        })
        .collect()
}

struct Batcher {
    inbox: SharedReceiver<Bytes>,
    outbox: mpsc::Sender<Batch>,
    pool: Arc<BatchPool>,
    wait: Duration,
}

impl Batcher {
    async fn run(self) {
        debug!("batcher started");
        let mut batch = self.pool.take();

        loop {
            match timeout(self.wait, self.next_record()).await {
                Ok(Some(record)) => {
                    if batch.append(&record).is_err() {
                        batch = match self.flush(batch).await {
                            Some(fresh) => fresh,
                            None => return,
                        };
                        if batch.append(&record).is_err() {
                            // a fresh batch accepts any single record
                            error!(
                                "record of {} bytes refused by an empty batch, discarding",
                                record.len()
                            );
                        }
                    }
                }
                Ok(None) => {
                    if batch.msg_count() > 0 {
                        if let Some(fresh) = self.flush(batch).await {
                            self.pool.put(fresh);
                        }
                    } else {
                        self.pool.put(batch);
                    }
                    debug!("batcher stopped: ingestion closed");
                    return;
                }
                Err(_elapsed) => {
                    // Partial batches ship after the wait; empty ones never do
                    if batch.msg_count() > 0 {
                        batch = match self.flush(batch).await {
                            Some(fresh) => fresh,
                            None => return,
                        };
                    }
                }
            }
        }
    }

    async fn next_record(&self) -> Option<Bytes> {
        self.inbox.lock().await.recv().await
    }

    /// Hands the batch to the delivery queue, blocking while it is full,
    /// and claims a fresh batch. Returns `None` when the outlets are gone.
    async fn flush(&self, batch: Batch) -> Option<Batch> {
        match self.outbox.send(batch).await {
            Ok(()) => Some(self.pool.take()),
            Err(mpsc::error::SendError(batch)) => {
                self.pool.put(batch);
                debug!("batcher stopped: delivery queue closed");
                None
            }
        }
    }
}
