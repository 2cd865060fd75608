// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operational statistics for the pipeline.
//!
//! Workers emit [`NamedValue`] samples - delivery timings, drop counts -
//! onto a bounded queue. A single [`ProgramStats`] actor owns all statistic
//! state: cumulative all-time counters that survive forever, and windowed
//! percentile statistics that reset whenever a snapshot asks for it.
//!
//! The actor pattern keeps the state lock-free: producers hold a cloneable
//! [`StatsHandle`], snapshot requests travel over a command channel and are
//! answered on a oneshot, and the service task is the only code that ever
//! touches the maps.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One statistics sample: a metric name plus either an elapsed duration or
/// an event count.
#[derive(Debug, Clone)]
pub struct NamedValue {
    pub name: String,
    pub value: SampleValue,
}

#[derive(Debug, Clone, Copy)]
pub enum SampleValue {
    Elapsed(Duration),
    Count(u64),
}

impl NamedValue {
    #[must_use]
    pub fn elapsed(name: impl Into<String>, elapsed: Duration) -> Self {
        NamedValue {
            name: name.into(),
            value: SampleValue::Elapsed(elapsed),
        }
    }

    #[must_use]
    pub fn count(name: impl Into<String>, count: u64) -> Self {
        NamedValue {
            name: name.into(),
            value: SampleValue::Count(count),
        }
    }
}

/// A single value in a snapshot: either a counter or a duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Seconds(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{n}"),
            MetricValue::Seconds(s) => write!(f, "{s:.6}"),
        }
    }
}

/// Point-in-time copy of every metric, keyed `alltime.<name>.count` for the
/// cumulative counters and `<name>.{count,min,max,p50,p95,p99}.*` for the
/// current window. Safe to read without synchronization.
pub type Snapshot = BTreeMap<String, MetricValue>;

/// Formats a snapshot as one `key=value` line for emission.
#[must_use]
pub fn render(snapshot: &Snapshot) -> String {
    let mut parts = Vec::with_capacity(snapshot.len());
    for (key, value) in snapshot {
        parts.push(format!("{key}={value}"));
    }
    parts.join(" ")
}

#[derive(Debug)]
pub enum StatsCommand {
    Snapshot {
        reset: bool,
        response_tx: oneshot::Sender<Snapshot>,
    },
}

/// Handle for feeding samples to and requesting snapshots from the stats
/// service. Cheap to clone; one lives in every outlet worker.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    samples: mpsc::Sender<NamedValue>,
    commands: mpsc::UnboundedSender<StatsCommand>,
}

impl StatsHandle {
    /// Queues a sample without blocking. A full stats buffer drops the
    /// sample: a slow aggregator must not stall delivery.
    pub fn emit(&self, value: NamedValue) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.samples.try_send(value) {
            debug!("stats buffer full, dropping sample {}", dropped.name);
        }
    }

    /// Requests a snapshot of every metric; `reset` clears the windowed
    /// statistics after the read. All-time counters are never cleared.
    pub async fn snapshot(&self, reset: bool) -> Result<Snapshot, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(StatsCommand::Snapshot { reset, response_tx })
            .map_err(|e| format!("Failed to send snapshot command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive snapshot response: {e}"))
    }
}

/// Stats service that owns all statistic state and processes samples and
/// snapshot requests until the sample queue closes.
pub struct ProgramStats {
    input: mpsc::Receiver<NamedValue>,
    commands: mpsc::UnboundedReceiver<StatsCommand>,
    windows: BTreeMap<String, Vec<f64>>,
    alltime: BTreeMap<String, u64>,
    emit_interval: Duration,
}

impl ProgramStats {
    /// Creates the service and its handle. `stats_buff` bounds the sample
    /// queue; a nonzero `emit_interval` logs and resets a snapshot on that
    /// period.
    #[must_use]
    pub fn new(stats_buff: usize, emit_interval: Duration) -> (Self, StatsHandle) {
        let (samples_tx, input) = mpsc::channel(stats_buff);
        let (commands_tx, commands) = mpsc::unbounded_channel();

        // The loss counters are visible from the first snapshot on, even
        // before anything is dropped
        let mut alltime = BTreeMap::new();
        alltime.insert("drops".to_string(), 0);
        alltime.insert("lost".to_string(), 0);

        let service = ProgramStats {
            input,
            commands,
            windows: BTreeMap::new(),
            alltime,
            emit_interval,
        };
        let handle = StatsHandle {
            samples: samples_tx,
            commands: commands_tx,
        };

        (service, handle)
    }

    /// Runs the service until the sample queue is closed and drained.
    pub async fn run(mut self) {
        debug!("stats aggregator started");

        let mut emit = if self.emit_interval.is_zero() {
            None
        } else {
            Some(interval(self.emit_interval))
        };
        if let Some(ticker) = emit.as_mut() {
            ticker.tick().await; // discard first tick, which is instantaneous
        }

        let mut commands_open = true;
        loop {
            tokio::select! {
                // Samples first: a snapshot must reflect every sample queued
                // before the request
                biased;
                sample = self.input.recv() => match sample {
                    Some(value) => self.absorb(value),
                    None => break,
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(StatsCommand::Snapshot { reset, response_tx }) => {
                        if response_tx.send(self.snapshot(reset)).is_err() {
                            error!("Failed to send stats snapshot - receiver dropped");
                        }
                    }
                    None => commands_open = false,
                },
                _ = next_tick(&mut emit) => {
                    let snapshot = self.snapshot(true);
                    info!("{}", render(&snapshot));
                }
            }
        }

        debug!("stats aggregator stopped");
    }

    fn absorb(&mut self, sample: NamedValue) {
        match sample.value {
            SampleValue::Elapsed(elapsed) => {
                *self.alltime.entry(sample.name.clone()).or_insert(0) += 1;
                self.windows
                    .entry(sample.name)
                    .or_default()
                    .push(elapsed.as_secs_f64());
            }
            SampleValue::Count(n) => {
                *self.alltime.entry(sample.name).or_insert(0) += n;
            }
        }
    }

    fn snapshot(&mut self, reset: bool) -> Snapshot {
        let mut snapshot = Snapshot::new();

        for (name, total) in &self.alltime {
            snapshot.insert(
                format!("alltime.{name}.count"),
                MetricValue::Count(*total),
            );
        }

        for (name, samples) in &self.windows {
            if samples.is_empty() {
                continue;
            }
            let mut sorted = samples.clone();
            sorted.sort_by(f64::total_cmp);

            snapshot.insert(
                format!("{name}.count"),
                MetricValue::Count(sorted.len() as u64),
            );
            snapshot.insert(
                format!("{name}.min.seconds"),
                MetricValue::Seconds(sorted[0]),
            );
            snapshot.insert(
                format!("{name}.max.seconds"),
                MetricValue::Seconds(sorted[sorted.len() - 1]),
            );
            for (label, p) in [("p50", 0.50), ("p95", 0.95), ("p99", 0.99)] {
                snapshot.insert(
                    format!("{name}.{label}.seconds"),
                    MetricValue::Seconds(percentile(&sorted, p)),
                );
            }
        }

        if reset {
            self.windows.clear();
        }
        snapshot
    }
}

async fn next_tick(emit: &mut Option<Interval>) {
    match emit {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// Nearest-rank percentile over a sorted, non-empty window.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p * sorted.len() as f64).ceil() as usize).max(1);
    sorted[rank - 1]
}

/// Serves the latest snapshot to network clients: each accepted connection
/// receives the JSON-serialized snapshot and is closed. Runs until the
/// token is cancelled.
pub async fn serve_stats(addr: String, handle: StatsHandle, cancel: CancellationToken) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind stats listener on {addr}: {e}");
            return;
        }
    };
    info!("stats: listening on {addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (mut socket, peer) = match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("stats accept error: {e}");
                        continue;
                    }
                };
                let snapshot = match handle.snapshot(false).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!("Unable to read stats snapshot: {e}");
                        continue;
                    }
                };
                match serde_json::to_vec(&snapshot) {
                    Ok(body) => {
                        if let Err(e) = socket.write_all(&body).await {
                            debug!("stats write to {peer} failed: {e}");
                        }
                    }
                    Err(e) => error!("Unable to serialize stats snapshot: {e}"),
                }
            }
        }
    }

    debug!("stats listener stopped");
}
