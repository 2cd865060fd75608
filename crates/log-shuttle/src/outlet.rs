// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outlet workers: finished batches in, HTTP deliveries out.
//!
//! Each worker drains the delivery queue, posts batches to the destination
//! with bounded retry, and accounts every record of a batch that could not
//! be delivered into the `lost` counter. Whatever the outcome, the batch
//! object goes back to the reuse pool.
//!
//! Loss reporting rides along with the data: before a delivery the drop and
//! lost counters are read and reset, and a nonzero total is appended to the
//! batch as a synthetic record so the destination can see the gap.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error};

use crate::batch::{Batch, BatchPool};
use crate::batcher::SharedReceiver;
use crate::config::ShuttleConfig;
use crate::counter::Counter;
use crate::errors::{ConfigError, DeliveryError};
use crate::http::build_client;
use crate::stats::{NamedValue, StatsHandle};

const RETRY_BACKOFF_BASE_MS: u64 = 100;

/// Delivery seam: one attempt to hand a finished batch to the destination.
#[async_trait]
pub trait DeliverBatch {
    /// Posts the batch once. `drops` and `lost` are the loss counts read
    /// for this delivery window; they ride along as headers.
    async fn post(&self, batch: &Batch, drops: u64, lost: u64) -> Result<(), DeliveryError>;
}

/// Posts batches as `application/logplex-1` bodies to the configured URL.
pub struct HttpOutlet {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpOutlet {
    pub fn new(config: &ShuttleConfig) -> Result<Self, ConfigError> {
        Ok(HttpOutlet {
            client: build_client(config),
            url: config.outlet_url()?,
        })
    }
}

#[async_trait]
impl DeliverBatch for HttpOutlet {
    async fn post(&self, batch: &Batch, drops: u64, lost: u64) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/logplex-1")
            .header("Logplex-Msg-Count", batch.msg_count().to_string())
            .header("Logshuttle-Drops", drops.to_string())
            .header("Logshuttle-Lost", lost.to_string())
            .body(batch.payload().to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }
        debug!("at=post status={status}");
        Ok(())
    }
}

/// Spawns the outlet pool against the configured destination. Workers exit
/// once the delivery queue is closed and drained.
pub fn start_outlets(
    config: &ShuttleConfig,
    drops: Arc<Counter>,
    lost: Arc<Counter>,
    stats: StatsHandle,
    inbox: SharedReceiver<Batch>,
    pool: Arc<BatchPool>,
) -> Result<Vec<JoinHandle<()>>, ConfigError> {
    let mut handles = Vec::with_capacity(config.num_outlets);
    for _ in 0..config.num_outlets {
        let outlet = Outlet {
            inbox: Arc::clone(&inbox),
            pool: Arc::clone(&pool),
            stats: stats.clone(),
            drops: Arc::clone(&drops),
            lost: Arc::clone(&lost),
            deliverer: HttpOutlet::new(config)?,
            max_attempts: config.max_attempts,
        };
        handles.push(tokio::spawn(outlet.run()));
    }
    Ok(handles)
}

struct Outlet<D> {
    inbox: SharedReceiver<Batch>,
    pool: Arc<BatchPool>,
    stats: StatsHandle,
    drops: Arc<Counter>,
    lost: Arc<Counter>,
    deliverer: D,
    max_attempts: u32,
}

impl<D: DeliverBatch + Send + Sync + 'static> Outlet<D> {
    async fn run(self) {
        debug!("outlet started");
        loop {
            let pulled = { self.inbox.lock().await.recv().await };
            let Some(mut batch) = pulled else { break };

            self.deliver(&mut batch).await;
            self.pool.put(batch);
        }
        debug!("outlet stopped: delivery queue closed");
    }

    /// One batch, all the way to resolution: loss marker injection, bounded
    /// retry, and final accounting.
    async fn deliver(&self, batch: &mut Batch) {
        let drops = self.drops.read_and_reset();
        let lost = self.lost.read_and_reset();
        if drops + lost > 0 {
            batch.write_drops(drops + lost);
            if drops > 0 {
                self.stats.emit(NamedValue::count("drops", drops));
            }
            if lost > 0 {
                self.stats.emit(NamedValue::count("lost", lost));
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let time = Instant::now();
            let result = self.deliverer.post(batch, drops, lost).await;
            let elapsed = time.elapsed();

            match result {
                Ok(()) => {
                    self.stats
                        .emit(NamedValue::elapsed("outlet.post.success", elapsed));
                    return;
                }
                Err(e) => {
                    error!("post-error={e} attempt={attempts}");
                    if attempts >= self.max_attempts {
                        // The whole batch is gone; account every record
                        self.lost.add(batch.msg_count() as u64);
                        self.stats
                            .emit(NamedValue::elapsed("outlet.post.failure", elapsed));
                        return;
                    }
                }
            }

            let backoff_ms = RETRY_BACKOFF_BASE_MS * (2_u64.pow(attempts - 1));
            sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stats::{MetricValue, ProgramStats};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::{mpsc, Mutex};

    struct FailingDeliverer {
        succeed_after: u32,
        attempts: AtomicU32,
    }

    impl FailingDeliverer {
        fn failing() -> Self {
            FailingDeliverer {
                succeed_after: u32::MAX,
                attempts: AtomicU32::new(0),
            }
        }

        fn flaky(succeed_after: u32) -> Self {
            FailingDeliverer {
                succeed_after,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliverBatch for Arc<FailingDeliverer> {
        async fn post(&self, _batch: &Batch, _drops: u64, _lost: u64) -> Result<(), DeliveryError> {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.succeed_after {
                Ok(())
            } else {
                Err(DeliveryError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ))
            }
        }
    }

    struct TestOutlet {
        outlet: Outlet<Arc<FailingDeliverer>>,
        delivery: mpsc::Sender<Batch>,
        drops: Arc<Counter>,
        lost: Arc<Counter>,
        stats: StatsHandle,
        deliverer: Arc<FailingDeliverer>,
    }

    fn test_outlet(deliverer: FailingDeliverer, max_attempts: u32) -> TestOutlet {
        let (delivery, delivery_rx) = mpsc::channel(4);
        let (stats_service, stats) = ProgramStats::new(64, std::time::Duration::ZERO);
        tokio::spawn(stats_service.run());
        let drops = Arc::new(Counter::new());
        let lost = Arc::new(Counter::new());
        let deliverer = Arc::new(deliverer);
        let outlet = Outlet {
            inbox: Arc::new(Mutex::new(delivery_rx)),
            pool: Arc::new(BatchPool::new(10, 1024, 4)),
            stats: stats.clone(),
            drops: Arc::clone(&drops),
            lost: Arc::clone(&lost),
            deliverer: Arc::clone(&deliverer),
            max_attempts,
        };
        TestOutlet {
            outlet,
            delivery,
            drops,
            lost,
            stats,
            deliverer,
        }
    }

    fn filled_batch(records: &[&[u8]]) -> Batch {
        let mut batch = Batch::new(10, 1024);
        for record in records {
            batch.append(record).unwrap();
        }
        batch
    }

    #[tokio::test]
    async fn test_failed_batch_counts_records_lost() {
        let fixture = test_outlet(FailingDeliverer::failing(), 1);
        let worker = tokio::spawn(fixture.outlet.run());

        fixture
            .delivery
            .send(filled_batch(&[b"a", b"b", b"c"]))
            .await
            .unwrap();
        drop(fixture.delivery);
        worker.await.unwrap();

        assert_eq!(fixture.lost.read_and_reset(), 3);

        let snapshot = fixture.stats.snapshot(false).await.unwrap();
        assert_eq!(
            snapshot.get("outlet.post.failure.count"),
            Some(&MetricValue::Count(1))
        );
        assert_eq!(snapshot.get("outlet.post.success.count"), None);
    }

    #[tokio::test]
    async fn test_retry_until_success_within_attempts() {
        let fixture = test_outlet(FailingDeliverer::flaky(1), 3);
        let worker = tokio::spawn(fixture.outlet.run());

        fixture.delivery.send(filled_batch(&[b"a"])).await.unwrap();
        drop(fixture.delivery);
        worker.await.unwrap();

        // One failure, then success on the second attempt: nothing lost
        assert_eq!(fixture.lost.read_and_reset(), 0);
        assert_eq!(fixture.deliverer.attempts.load(Ordering::Relaxed), 2);

        let snapshot = fixture.stats.snapshot(false).await.unwrap();
        assert_eq!(
            snapshot.get("outlet.post.success.count"),
            Some(&MetricValue::Count(1))
        );
    }

    #[tokio::test]
    async fn test_retries_capped_by_max_attempts() {
        let fixture = test_outlet(FailingDeliverer::failing(), 3);
        let worker = tokio::spawn(fixture.outlet.run());

        fixture.delivery.send(filled_batch(&[b"a"])).await.unwrap();
        drop(fixture.delivery);
        worker.await.unwrap();

        assert_eq!(fixture.deliverer.attempts.load(Ordering::Relaxed), 3);
        assert_eq!(fixture.lost.read_and_reset(), 1);
    }

    #[tokio::test]
    async fn test_pending_loss_is_written_into_next_batch() {
        let fixture = test_outlet(FailingDeliverer::flaky(0), 1);
        fixture.drops.add(2);
        fixture.lost.add(1);

        let worker = tokio::spawn(fixture.outlet.run());
        fixture
            .delivery
            .send(filled_batch(&[b"payload"]))
            .await
            .unwrap();
        drop(fixture.delivery);
        worker.await.unwrap();

        // Counters were flushed into the delivery window
        assert_eq!(fixture.drops.read_and_reset(), 0);
        assert_eq!(fixture.lost.read_and_reset(), 0);

        let snapshot = fixture.stats.snapshot(false).await.unwrap();
        assert_eq!(
            snapshot.get("alltime.drops.count"),
            Some(&MetricValue::Count(2))
        );
        assert_eq!(
            snapshot.get("alltime.lost.count"),
            Some(&MetricValue::Count(1))
        );
    }

    #[tokio::test]
    async fn test_batch_returns_to_pool_after_delivery() {
        let fixture = test_outlet(FailingDeliverer::flaky(0), 1);
        let pool = Arc::clone(&fixture.outlet.pool);
        let worker = tokio::spawn(fixture.outlet.run());

        fixture.delivery.send(filled_batch(&[b"a"])).await.unwrap();
        drop(fixture.delivery);
        worker.await.unwrap();

        // The recycled batch comes back reset
        let batch = pool.take();
        assert!(batch.is_empty());
        assert_eq!(batch.msg_count(), 0);
    }
}
