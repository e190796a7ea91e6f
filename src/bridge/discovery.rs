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

//! Device discovery session.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::stream::{Subscriber, SubscriberSlot};
use crate::bluetooth::{Adapter, DeviceRecord, Notification};
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Discovering,
}

/// Drives a scan and forwards what it finds to one subscriber.
pub(crate) struct DiscoverySession {
    state: Mutex<DiscoveryState>,
    subscriber: SubscriberSlot<DeviceRecord>,
}

impl DiscoverySession {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DiscoveryState::Idle),
            subscriber: SubscriberSlot::new(),
        }
    }

    pub(crate) fn state(&self) -> DiscoveryState {
        *self.state.lock()
    }

    pub(crate) fn listen(&self, subscriber: Subscriber<DeviceRecord>) {
        self.subscriber.attach(subscriber);
    }

    /// Register for notifications, then start scanning.
    ///
    /// Starting while a scan is running is a no-op.
    pub(crate) async fn start(&self, adapter: &dyn Adapter) -> Result<(), BridgeError> {
        if self.state() == DiscoveryState::Discovering {
            debug!("Discovery already running");
            return Ok(());
        }

        info!("Starting discovery");
        adapter
            .register(Notification::Discovery)
            .map_err(BridgeError::platform)?;
        *self.state.lock() = DiscoveryState::Discovering;

        if let Err(e) = adapter.start_discovery().await {
            let _ = adapter.unregister(Notification::Discovery);
            *self.state.lock() = DiscoveryState::Idle;
            return Err(BridgeError::platform(e));
        }
        Ok(())
    }

    pub(crate) fn device_found(&self, record: DeviceRecord) {
        if self.state() != DiscoveryState::Discovering {
            return;
        }
        debug!("Discovered {}", record.address);
        self.subscriber.deliver(record);
    }

    /// The OS reported the end of the scan.
    pub(crate) async fn finish(&self, adapter: &dyn Adapter) {
        if self.state() != DiscoveryState::Discovering {
            debug!("Ignoring scan-finished without a running discovery");
            return;
        }
        info!("Discovery finished");
        self.stop(adapter).await;
    }

    /// Cancel the scan. Safe to call when nothing is running.
    pub(crate) async fn cancel(&self, adapter: &dyn Adapter) {
        info!("Canceling discovery");
        self.stop(adapter).await;
    }

    /// The consumer dropped its stream.
    pub(crate) async fn cancel_subscription(&self, adapter: Option<&dyn Adapter>, token: u64) {
        if !self.subscriber.holds(token) {
            return;
        }
        debug!("Canceling discovery (stream closed)");
        match adapter {
            Some(adapter) => self.stop(adapter).await,
            None => {
                self.subscriber.close();
            }
        }
    }

    async fn stop(&self, adapter: &dyn Adapter) {
        if let Err(e) = adapter.unregister(Notification::Discovery) {
            debug!("{}", e);
        }
        if let Err(e) = adapter.cancel_discovery().await {
            warn!("Failed to cancel discovery: {:#}", e);
        }
        *self.state.lock() = DiscoveryState::Idle;
        self.subscriber.close();
    }
}
