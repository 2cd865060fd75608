// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Batching log forwarder.
//!
//! Moves framed log records from a local source to a logplex-style HTTP
//! intake, trading delivery guarantees for bounded memory: under sustained
//! overload or destination failure, records are discarded and the loss is
//! accounted, never buffered without bound.
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐
//!    │   Producer   │  (framed records, non-blocking admission)
//!    └──────┬───────┘
//!           │ ingestion queue (bounded)
//!           v
//!    ┌──────────────┐       ┌──────────────┐
//!    │ Batcher pool │ <──── │  Batch pool  │  (reused batch objects)
//!    └──────┬───────┘       └──────▲───────┘
//!           │ delivery queue       │
//!           v                      │
//!    ┌──────────────┐ ─────────────┘
//!    │ Outlet pool  │ ────> HTTP destination
//!    └──────┬───────┘
//!           │ samples
//!           v
//!    ┌──────────────┐
//!    │ ProgramStats │  (counters, percentiles, snapshots)
//!    └──────────────┘
//! ```
//!
//! Backpressure runs upstream: a full delivery queue stalls batchers, a
//! full ingestion queue makes the producer drop records into the `drops`
//! counter. Records that reach an outlet but cannot be delivered within the
//! attempt budget land in the `lost` counter. Both totals are reported to
//! the destination as synthetic drop records and to operators through the
//! stats snapshots.

pub mod batch;
pub mod batcher;
pub mod config;
pub mod counter;
pub mod errors;
pub mod frame;
pub mod http;
pub mod outlet;
pub mod shuttle;
pub mod stats;
