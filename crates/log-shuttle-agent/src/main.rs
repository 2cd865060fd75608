// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use tokio::io::{stdin, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_shuttle::config::ShuttleConfig;
use log_shuttle::frame::Framer;
use log_shuttle::shuttle::Shuttle;

mod reader;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_SHUTTLE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("hyper=off,reqwest=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ShuttleConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on log shuttle startup: {e}");
            return;
        }
    };

    let shuttle = match Shuttle::start(&config) {
        Ok(shuttle) => shuttle,
        Err(e) => {
            error!("Error starting the shuttle pipeline: {e}");
            return;
        }
    };

    info!("shuttle: forwarding stdin to {}", config.logs_url);

    let framer = Framer::new(&config);
    reader::read_records(
        BufReader::new(stdin()),
        framer,
        shuttle.ingest.clone(),
        Arc::clone(&shuttle.drops),
    )
    .await;

    shuttle.shutdown().await;
}
