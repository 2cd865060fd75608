// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use log_shuttle::counter::Counter;
use log_shuttle::frame::Framer;

/// Reads lines until EOF, frames them, and offers them to the ingestion
/// queue. Admission never blocks: a full queue counts the line into `drops`
/// and discards it, so a stalled destination cannot wedge the producer.
pub async fn read_records<R>(
    input: R,
    framer: Framer,
    ingest: mpsc::Sender<Bytes>,
    drops: Arc<Counter>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match ingest.try_send(framer.frame(&line)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    drops.add(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("reader stopped: ingestion closed");
                    return;
                }
            },
            Ok(None) => {
                debug!("reader stopped: input exhausted");
                return;
            }
            Err(e) => {
                warn!("error reading input: {e}");
                return;
            }
        }
    }
}
