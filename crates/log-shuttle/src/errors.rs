// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while assembling a batch.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    /// The batch is at its record or byte budget; the caller must flush and
    /// start a new batch before appending this record.
    #[error("batch capacity exceeded")]
    CapacityExceeded,
}

/// Fatal configuration problems, surfaced before the pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no logs destination configured: set LOGPLEX_URL")]
    MissingLogsUrl,

    #[error("unable to parse logs destination url: {0}")]
    InvalidLogsUrl(String),

    #[error("{key} must be >= 1")]
    NonPositive { key: &'static str },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnvValue { key: &'static str, value: String },
}

/// A single delivery attempt that did not land a 2xx response.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("destination returned {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
