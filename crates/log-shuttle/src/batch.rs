// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reusable batches of framed log records.
//!
//! A [`Batch`] accumulates wire-ready records until it hits its record or
//! byte budget, then ships as the body of a single HTTP request. Batches are
//! recycled through a [`BatchPool`] so steady-state forwarding allocates
//! nothing per request.
//!
//! Ownership of a batch is exclusive at every stage: a batcher fills it, the
//! delivery queue transfers it to exactly one outlet, and the outlet returns
//! it to the pool once the delivery attempt is resolved.

use std::sync::Mutex;

use tracing::warn;

use crate::errors::BatchError;
use crate::frame;

/// Accumulator for framed records destined for one HTTP delivery.
///
/// The serialized form is byte-identical to the concatenation of the
/// appended records, in append order, plus at most one trailing drop-summary
/// record injected by [`Batch::write_drops`].
#[derive(Debug)]
pub struct Batch {
    buf: Vec<u8>,
    msg_count: usize,
    max_msgs: usize,
    max_bytes: usize,
}

impl Batch {
    #[must_use]
    pub fn new(max_msgs: usize, max_bytes: usize) -> Self {
        Batch {
            buf: Vec::with_capacity(max_bytes),
            msg_count: 0,
            max_msgs,
            max_bytes,
        }
    }

    /// Appends one record, or reports `CapacityExceeded` when the record or
    /// byte budget is spent. The record is never partially written.
    ///
    /// A record larger than the whole byte budget is still accepted into an
    /// empty batch: it ships alone, with a warning, since no future batch
    /// could ever hold it either.
    pub fn append(&mut self, record: &[u8]) -> Result<(), BatchError> {
        if self.msg_count >= self.max_msgs {
            return Err(BatchError::CapacityExceeded);
        }
        if self.buf.len() + record.len() > self.max_bytes {
            if self.msg_count > 0 {
                return Err(BatchError::CapacityExceeded);
            }
            warn!(
                "record of {} bytes exceeds the {} byte batch budget, shipping it alone",
                record.len(),
                self.max_bytes
            );
        }
        self.buf.extend_from_slice(record);
        self.msg_count += 1;
        Ok(())
    }

    /// Appends a synthetic record telling the destination that `n` messages
    /// were discarded before this batch. Metadata, not payload: it bypasses
    /// the capacity budgets and is not counted in [`Batch::msg_count`].
    pub fn write_drops(&mut self, n: u64) {
        self.buf.extend_from_slice(&frame::drop_record(n));
    }

    /// Number of appended records, excluding any drop-summary record.
    #[must_use]
    pub fn msg_count(&self) -> usize {
        self.msg_count
    }

    /// Total serialized byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The exact bytes sent as the HTTP request body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// Truncates the buffer and zeroes the record count, keeping the
    /// allocation for reuse.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.msg_count = 0;
    }
}

/// Concurrency-safe free list of idle batches.
///
/// `take` hands out a reset batch (allocating when the list is empty) and
/// `put` returns one after delivery. The idle list is bounded so a burst of
/// allocations does not pin memory forever.
#[derive(Debug)]
pub struct BatchPool {
    free: Mutex<Vec<Batch>>,
    max_msgs: usize,
    max_bytes: usize,
    max_idle: usize,
}

impl BatchPool {
    #[must_use]
    pub fn new(max_msgs: usize, max_bytes: usize, max_idle: usize) -> Self {
        BatchPool {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_msgs,
            max_bytes,
            max_idle,
        }
    }

    /// Claims an empty batch, reusing an idle one when available.
    pub fn take(&self) -> Batch {
        #[allow(clippy::expect_used)]
        let recycled = self.free.lock().expect("lock poisoned").pop();
        match recycled {
            Some(mut batch) => {
                batch.reset();
                batch
            }
            None => Batch::new(self.max_msgs, self.max_bytes),
        }
    }

    /// Returns a batch to the pool. Batches beyond the idle bound are
    /// discarded instead of retained.
    pub fn put(&self, batch: Batch) {
        #[allow(clippy::expect_used)]
        let mut free = self.free.lock().expect("lock poisoned");
        if free.len() < self.max_idle {
            free.push(batch);
        }
    }
}
