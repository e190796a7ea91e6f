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

//! Test doubles for the OS seam.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use serial_bridge::bluetooth::{
    Adapter, AdapterState, DeviceRecord, HardwareAddress, NotRegistered, Notification, Transport,
};
use serial_bridge::bridge::{self, Bridge, BridgeHandle, EventStream, Notifier, TransportSink};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

const WAIT: Duration = Duration::from_secs(2);

/// How the next transports handle `connect`.
#[derive(Clone, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    Fail(String),
    Panic,
    /// Wait until the gate is notified, then succeed.
    Hold(Arc<Notify>),
}

pub struct MockTransport {
    pub sink: TransportSink,
    behavior: ConnectBehavior,
    pub fail_writes: AtomicBool,
    pub written: Mutex<Vec<u8>>,
    pub disconnects: AtomicUsize,
}

impl MockTransport {
    /// Simulate bytes arriving from the remote device.
    pub fn receive(&self, bytes: &[u8]) {
        self.sink.on_inbound_data(bytes.to_vec());
    }

    /// Simulate the remote end closing the link.
    pub fn remote_close(&self) {
        self.sink.on_disconnected(true);
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: HardwareAddress) -> Result<()> {
        match &self.behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::Fail(message) => bail!("{} ({})", message, address),
            ConnectBehavior::Panic => panic!("transport exploded"),
            ConnectBehavior::Hold(gate) => {
                gate.notified().await;
                Ok(())
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("broken pipe");
        }
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.sink.on_disconnected(false);
    }
}

pub struct MockAdapter {
    pub notifier: Notifier,
    pub enabled: AtomicBool,
    pub permission: AtomicBool,
    pub permission_requests: AtomicUsize,
    pub enable_requests: AtomicUsize,
    pub disables: AtomicUsize,
    pub discovery_starts: AtomicUsize,
    pub discovery_cancels: AtomicUsize,
    pub fail_discovery: AtomicBool,
    pub registered: Mutex<HashSet<Notification>>,
    pub bonded: Mutex<Vec<DeviceRecord>>,
    pub transports: Mutex<Vec<Arc<MockTransport>>>,
    pub connect_behavior: Mutex<ConnectBehavior>,
}

impl MockAdapter {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            enabled: AtomicBool::new(true),
            permission: AtomicBool::new(true),
            permission_requests: AtomicUsize::new(0),
            enable_requests: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
            discovery_starts: AtomicUsize::new(0),
            discovery_cancels: AtomicUsize::new(0),
            fail_discovery: AtomicBool::new(false),
            registered: Mutex::new(HashSet::new()),
            bonded: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
            connect_behavior: Mutex::new(ConnectBehavior::Succeed),
        }
    }

    pub fn is_registered(&self, notification: Notification) -> bool {
        self.registered.lock().contains(&notification)
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.transports.lock()[index].clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn state(&self) -> Result<AdapterState> {
        Ok(AdapterState::from_powered(self.enabled.load(Ordering::SeqCst)))
    }

    async fn open_settings(&self) -> Result<()> {
        Ok(())
    }

    async fn request_enable(&self) -> Result<()> {
        self.enable_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.bonded.lock().clone())
    }

    async fn is_discovering(&self) -> Result<bool> {
        Ok(Self::count(&self.discovery_starts) > Self::count(&self.discovery_cancels))
    }

    async fn start_discovery(&self) -> Result<()> {
        if self.fail_discovery.load(Ordering::SeqCst) {
            bail!("adapter busy");
        }
        self.discovery_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register(&self, notification: Notification) -> Result<()> {
        self.registered.lock().insert(notification);
        Ok(())
    }

    fn unregister(&self, notification: Notification) -> Result<(), NotRegistered> {
        if self.registered.lock().remove(&notification) {
            Ok(())
        } else {
            Err(NotRegistered(notification))
        }
    }

    fn open_transport(&self, sink: TransportSink) -> Arc<dyn Transport> {
        let transport = Arc::new(MockTransport {
            sink,
            behavior: self.connect_behavior.lock().clone(),
            fail_writes: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        });
        self.transports.lock().push(transport.clone());
        transport
    }
}

/// A running bridge wired to a mock adapter.
pub struct Harness {
    pub adapter: Arc<MockAdapter>,
    pub handle: BridgeHandle,
    task: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        let (notifier, inbox) = bridge::inbox();
        let adapter = Arc::new(MockAdapter::new(notifier.clone()));
        let bridge = Bridge::new(Some(adapter.clone() as Arc<dyn Adapter>), notifier, inbox);
        let handle = bridge.handle();
        let task = tokio::spawn(bridge.run());
        Self {
            adapter,
            handle,
            task,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.adapter.notifier
    }

    /// Wait until everything queued before this call has been handled.
    pub async fn settle(&self) {
        self.handle.invoke("isAvailable", &serde_json::Value::Null).await;
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        within(self.task).await.unwrap();
    }
}

/// Start a bridge for a host without Bluetooth.
pub fn start_without_adapter() -> BridgeHandle {
    let (notifier, inbox) = bridge::inbox();
    let bridge = Bridge::new(None, notifier, inbox);
    let handle = bridge.handle();
    tokio::spawn(bridge.run());
    handle
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}

/// Next event, failing the test if nothing arrives in time.
pub async fn next<T>(stream: &EventStream<T>) -> Option<T> {
    within(stream.recv()).await
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
