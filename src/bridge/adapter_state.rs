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

//! Adapter power-state monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use super::stream::{Subscriber, SubscriberSlot};
use crate::bluetooth::{Adapter, AdapterState, Notification};

pub(crate) struct AdapterStateMonitor {
    subscriber: SubscriberSlot<AdapterState>,
    registered: AtomicBool,
}

impl AdapterStateMonitor {
    pub(crate) fn new() -> Self {
        Self {
            subscriber: SubscriberSlot::new(),
            registered: AtomicBool::new(false),
        }
    }

    /// Attach a subscriber and make sure the OS notification is installed.
    pub(crate) fn listen(&self, adapter: Option<&dyn Adapter>, subscriber: Subscriber<AdapterState>) {
        self.subscriber.attach(subscriber);

        let Some(adapter) = adapter else {
            return;
        };
        if self.registered.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = adapter.register(Notification::AdapterState) {
            warn!("Failed to watch adapter state: {:#}", e);
            self.registered.store(false, Ordering::SeqCst);
        }
    }

    /// A power-state change: every live connection is invalid now.
    pub(crate) fn state_changed(&self, registry: &ConnectionRegistry, state: AdapterState) {
        let removed = registry.remove_all();
        for connection in &removed {
            connection.close();
        }
        if !removed.is_empty() {
            info!(
                "Adapter state changed to {:?}, dropped {} connection(s)",
                state,
                removed.len()
            );
        }

        self.subscriber.deliver(state);
    }

    /// The consumer dropped its stream.
    pub(crate) fn cancel_subscription(&self, adapter: Option<&dyn Adapter>, token: u64) {
        if !self.subscriber.holds(token) {
            return;
        }
        self.subscriber.close();
        self.unregister(adapter);
    }

    pub(crate) fn shutdown(&self, adapter: Option<&dyn Adapter>) {
        self.subscriber.close();
        self.unregister(adapter);
    }

    fn unregister(&self, adapter: Option<&dyn Adapter>) {
        self.registered.store(false, Ordering::SeqCst);
        if let Some(adapter) = adapter {
            if let Err(e) = adapter.unregister(Notification::AdapterState) {
                debug!("{}", e);
            }
        }
    }
}
