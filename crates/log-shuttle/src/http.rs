// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::error;

use crate::config::ShuttleConfig;

/// Builds the delivery client: bounded response and dial timeouts, rustls
/// TLS, and an optional certificate-verification bypass for destinations
/// with self-signed certificates.
pub fn build_client(config: &ShuttleConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .danger_accept_invalid_certs(config.skip_verify)
        .build()
        .unwrap_or_else(|e| {
            error!("Unable to build HTTP client: {e}, falling back to defaults");
            reqwest::Client::new()
        })
}
