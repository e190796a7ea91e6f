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

//! Per-connection wrapper around a transport.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::registry::ConnectionId;
use super::stream::{Subscriber, SubscriberSlot};
use crate::bluetooth::{HardwareAddress, Transport};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, transport connect in flight.
    Connecting,
    /// Transport connected.
    Connected,
    /// Teardown requested.
    Disconnecting,
    /// Gone from the registry; its stream is closed for good.
    Removed,
}

/// Bridges one transport to its inbound-data stream.
pub struct ConnectionWrapper {
    id: ConnectionId,
    address: HardwareAddress,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    reader: SubscriberSlot<Vec<u8>>,
    remote_closed: AtomicBool,
}

impl ConnectionWrapper {
    pub fn new(id: ConnectionId, address: HardwareAddress, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            address,
            transport,
            state: Mutex::new(ConnectionState::Connecting),
            reader: SubscriberSlot::new(),
            remote_closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> HardwareAddress {
        self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Record a successful connect. Returns `false` if teardown already began.
    pub(crate) fn mark_connected(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    /// Install the inbound-data subscriber.
    ///
    /// Once the link is gone the stream is ended right away, but the
    /// subscriber still takes ownership so cancelling it tears down.
    pub(crate) fn attach_reader(&self, subscriber: Subscriber<Vec<u8>>) {
        self.reader.attach(subscriber);
        if self.state() == ConnectionState::Removed || self.remote_closed.load(Ordering::SeqCst) {
            self.reader.close();
        }
    }

    pub(crate) fn reader(&self) -> &SubscriberSlot<Vec<u8>> {
        &self.reader
    }

    /// Inbound bytes from the transport. Dropped when nobody listens.
    pub(crate) fn on_inbound_data(&self, bytes: Vec<u8>) {
        if !self.reader.deliver(bytes) {
            debug!("Dropping inbound data without reader (id: {})", self.id);
        }
    }

    /// The transport reported that the link went down.
    pub(crate) fn on_disconnected(&self, by_remote: bool) {
        if by_remote {
            debug!("Connection onDisconnected by remote (id: {})", self.id);
            self.remote_closed.store(true, Ordering::SeqCst);
            self.reader.close();
        } else {
            debug!("Connection onDisconnected by local (id: {})", self.id);
        }
    }

    /// Ask the transport to disconnect.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Removed {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }
        self.transport.disconnect();
    }

    /// Final step of teardown: close the stream permanently.
    pub(crate) fn close(&self) {
        *self.state.lock() = ConnectionState::Removed;
        self.reader.close();
    }
}
