// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline assembly and lifecycle.
//!
//! [`Shuttle::start`] builds the queues, counters, and reuse pool, then
//! spawns the stats service, the batcher pool, and the outlet pool.
//! [`Shuttle::shutdown`] drains everything in dependency order: closing
//! ingestion lets batchers flush and exit, which closes the delivery queue,
//! which lets outlets exit, after which the stats service is stopped.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch::BatchPool;
use crate::batcher::{self, SharedReceiver};
use crate::config::ShuttleConfig;
use crate::counter::Counter;
use crate::errors::ConfigError;
use crate::outlet;
use crate::stats::{render, serve_stats, ProgramStats, StatsHandle};

/// A running pipeline.
///
/// Producers push framed records into `ingest`; admission control is theirs
/// to decide - a producer that will not block should `try_send` and count a
/// refusal into `drops`.
pub struct Shuttle {
    pub ingest: mpsc::Sender<Bytes>,
    pub drops: Arc<Counter>,
    pub lost: Arc<Counter>,
    pub stats: StatsHandle,
    batchers: Vec<JoinHandle<()>>,
    outlets: Vec<JoinHandle<()>>,
    stats_task: JoinHandle<()>,
    listener: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Shuttle {
    /// Validates the config and spawns the whole pipeline.
    pub fn start(config: &ShuttleConfig) -> Result<Shuttle, ConfigError> {
        config.validate()?;

        let drops = Arc::new(Counter::new());
        let lost = Arc::new(Counter::new());

        let (stats_service, stats) = ProgramStats::new(config.stats_buff, config.stats_interval);
        let stats_task = tokio::spawn(stats_service.run());

        let cancel = CancellationToken::new();
        let listener = config.stats_addr.clone().map(|addr| {
            tokio::spawn(serve_stats(addr, stats.clone(), cancel.clone()))
        });

        let pool = Arc::new(BatchPool::new(
            config.batch_size,
            config.max_batch_bytes,
            config.num_batchers + config.num_outlets + 1,
        ));

        let (ingest, ingest_rx) = mpsc::channel(config.front_buff);
        let ingest_rx: SharedReceiver<Bytes> = Arc::new(Mutex::new(ingest_rx));

        // One in-flight batch per outlet worker of slack before batchers stall
        let (delivery_tx, delivery_rx) = mpsc::channel(config.num_outlets);
        let delivery_rx = Arc::new(Mutex::new(delivery_rx));

        let outlets = outlet::start_outlets(
            config,
            Arc::clone(&drops),
            Arc::clone(&lost),
            stats.clone(),
            delivery_rx,
            Arc::clone(&pool),
        )?;
        let batchers = batcher::start_batchers(config, pool, ingest_rx, delivery_tx);

        Ok(Shuttle {
            ingest,
            drops,
            lost,
            stats,
            batchers,
            outlets,
            stats_task,
            listener,
            cancel,
        })
    }

    /// Drains the pipeline and waits for every worker to finish. Closing
    /// ingestion is the only shutdown signal the workers need.
    pub async fn shutdown(self) {
        let Shuttle {
            ingest,
            stats,
            batchers,
            outlets,
            stats_task,
            listener,
            cancel,
            ..
        } = self;

        drop(ingest);
        for handle in batchers {
            if let Err(e) = handle.await {
                error!("batcher task failed: {e}");
            }
        }
        for handle in outlets {
            if let Err(e) = handle.await {
                error!("outlet task failed: {e}");
            }
        }

        match stats.snapshot(false).await {
            Ok(snapshot) => info!("final stats: {}", render(&snapshot)),
            Err(e) => error!("Unable to read final stats snapshot: {e}"),
        }

        cancel.cancel();
        if let Some(handle) = listener {
            let _ = handle.await;
        }

        // The last sample sender goes away here, letting the service drain
        // and stop
        drop(stats);
        if let Err(e) = stats_task.await {
            error!("stats task failed: {e}");
        }
    }
}
