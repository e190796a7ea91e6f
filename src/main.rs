// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial bridge daemon.
//!
//! Speaks line-delimited JSON on stdin/stdout and drives the local BlueZ
//! adapter. Logs go to stderr.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use serial_bridge::bluetooth::{Adapter, BluezAdapter};
use serial_bridge::bridge::{self, Bridge};
use serial_bridge::config::Config;
use serial_bridge::frontend;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("serial_bridge=info".parse()?),
        )
        .init();

    info!("Starting serial bridge v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let (notifier, inbox) = bridge::inbox();
    let adapter: Option<Arc<dyn Adapter>> =
        match BluezAdapter::open(notifier.clone(), config.bluetooth.clone()).await {
            Ok(adapter) => adapter.map(|a| Arc::new(a) as Arc<dyn Adapter>),
            Err(e) => {
                warn!("Bluetooth unavailable: {:#}", e);
                None
            }
        };

    let bridge = Bridge::new(adapter, notifier, inbox);
    let handle = bridge.handle();
    let bridge_task = tokio::spawn(bridge.run());

    info!("Ready. Reading requests from stdin.");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        result = frontend::serve(handle.clone(), stdin, stdout) => {
            if let Err(e) = result {
                warn!("Front-end stopped: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    handle.shutdown();
    bridge_task.await?;

    info!("Serial bridge stopped");
    Ok(())
}
