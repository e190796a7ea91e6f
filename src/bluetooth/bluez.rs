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

//! BlueZ backend.
//!
//! Implements [`Adapter`] and [`Transport`] on top of `bluer`. BlueZ has no
//! runtime permission model, so permission is always held. Discovery has no
//! natural end on Linux; a scan is bounded by the configured timeout and then
//! reported as finished.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{AdapterEvent, AdapterProperty, Address, AddressType};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::address::HardwareAddress;
use super::device::{AdapterState, DeviceRecord, DeviceType};
use super::platform::{Adapter, NotRegistered, Notification, Transport};
use crate::bridge::{Notifier, TransportSink};
use crate::config::BluetoothConfig;

/// The default BlueZ adapter.
pub struct BluezAdapter {
    adapter: bluer::Adapter,
    notifier: Notifier,
    config: BluetoothConfig,
    forward_devices: Arc<AtomicBool>,
    scan: Mutex<Option<JoinHandle<()>>>,
    state_watch: Mutex<Option<JoinHandle<()>>>,
    // Keeps the D-Bus connection alive.
    _session: bluer::Session,
}

impl BluezAdapter {
    /// Connect to BlueZ and pick the default adapter.
    ///
    /// Returns `Ok(None)` when the host has no Bluetooth controller.
    pub async fn open(notifier: Notifier, config: BluetoothConfig) -> Result<Option<Self>> {
        let session = bluer::Session::new()
            .await
            .context("connecting to bluetoothd")?;
        info!("BlueZ session created");

        let adapter = match session.default_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("No Bluetooth adapter: {}", e);
                return Ok(None);
            }
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Some(Self {
            adapter,
            notifier,
            config,
            forward_devices: Arc::new(AtomicBool::new(false)),
            scan: Mutex::new(None),
            state_watch: Mutex::new(None),
            _session: session,
        }))
    }

    fn watch_state(&self) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Cannot watch adapter events: {}", e);
                    return;
                }
            };
            futures::pin_mut!(events);

            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    debug!("Adapter powered: {}", powered);
                    notifier.adapter_state_changed(AdapterState::from_powered(powered));
                }
            }
        })
    }
}

async fn device_record(device: &bluer::Device) -> bluer::Result<DeviceRecord> {
    let kind = match device.address_type().await? {
        AddressType::BrEdr => DeviceType::Classic,
        _ => DeviceType::Le,
    };
    let mut record = DeviceRecord::new(
        HardwareAddress::new(device.address().0),
        device.name().await?,
        kind,
    );
    record.bonded = device.is_paired().await?;
    record.rssi = device.rssi().await?;
    record.device_class = device.class().await?;
    Ok(record)
}

#[async_trait]
impl Adapter for BluezAdapter {
    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn state(&self) -> Result<AdapterState> {
        Ok(AdapterState::from_powered(self.adapter.is_powered().await?))
    }

    async fn open_settings(&self) -> Result<()> {
        let (program, args) = self
            .config
            .settings_command
            .split_first()
            .ok_or_else(|| anyhow!("no settings command configured"))?;

        tokio::process::Command::new(program)
            .args(args)
            .spawn()
            .with_context(|| format!("launching {}", program))?;
        Ok(())
    }

    async fn request_enable(&self) -> Result<()> {
        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await?;
        self.notifier.enable_result(self.adapter.is_powered().await?);
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.adapter.set_powered(false).await?;
        Ok(())
    }

    fn has_permission(&self) -> bool {
        true
    }

    fn request_permission(&self) {
        self.notifier.permission_result(vec![true]);
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                devices.push(device_record(&device).await?);
            }
        }

        Ok(devices)
    }

    async fn is_discovering(&self) -> Result<bool> {
        Ok(self.adapter.is_discovering().await?)
    }

    async fn start_discovery(&self) -> Result<()> {
        let events = self
            .adapter
            .discover_devices()
            .await
            .context("starting discovery")?;

        let adapter = self.adapter.clone();
        let notifier = self.notifier.clone();
        let forward = self.forward_devices.clone();
        let timeout = self.config.discovery_timeout();

        let scan = tokio::spawn(async move {
            let found = notifier.clone();
            let forward_events = async move {
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(addr) = event else {
                        continue;
                    };
                    if !forward.load(Ordering::SeqCst) {
                        continue;
                    }
                    let record = match adapter.device(addr) {
                        Ok(device) => device_record(&device).await,
                        Err(e) => Err(e),
                    };
                    match record {
                        Ok(record) => found.device_found(record),
                        Err(e) => debug!("Skipping {}: {}", addr, e),
                    }
                }
            };

            if tokio::time::timeout(timeout, forward_events).await.is_ok() {
                debug!("Discovery event stream ended");
            }
            notifier.discovery_finished();
        });

        if let Some(previous) = self.scan.lock().replace(scan) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        // Dropping the discovery stream stops the scan.
        if let Some(scan) = self.scan.lock().take() {
            scan.abort();
        }
        Ok(())
    }

    fn register(&self, notification: Notification) -> Result<()> {
        match notification {
            Notification::Discovery => self.forward_devices.store(true, Ordering::SeqCst),
            Notification::AdapterState => {
                let mut watch = self.state_watch.lock();
                if watch.is_none() {
                    *watch = Some(self.watch_state());
                }
            }
        }
        Ok(())
    }

    fn unregister(&self, notification: Notification) -> Result<(), NotRegistered> {
        let was_registered = match notification {
            Notification::Discovery => self.forward_devices.swap(false, Ordering::SeqCst),
            Notification::AdapterState => match self.state_watch.lock().take() {
                Some(watch) => {
                    watch.abort();
                    true
                }
                None => false,
            },
        };

        if was_registered {
            Ok(())
        } else {
            Err(NotRegistered(notification))
        }
    }

    fn open_transport(&self, sink: TransportSink) -> Arc<dyn Transport> {
        Arc::new(RfcommTransport::new(
            sink,
            self.config.rfcomm_channel,
            self.config.read_buffer_size,
        ))
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Client-side RFCOMM socket for one connection.
pub struct RfcommTransport {
    sink: TransportSink,
    channel: u8,
    buffer_size: usize,
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RfcommTransport {
    pub fn new(sink: TransportSink, channel: u8, buffer_size: usize) -> Self {
        Self {
            sink,
            channel,
            buffer_size: buffer_size.max(1),
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn spawn_reader<R>(&self, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let sink = self.sink.clone();
        let mut buf = vec![0u8; self.buffer_size];

        tokio::spawn(async move {
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        info!("Connection closed by remote (id: {})", sink.id());
                        break;
                    }
                    Ok(n) => sink.on_inbound_data(buf[..n].to_vec()),
                    Err(e) => {
                        warn!("Read error (id: {}): {}", sink.id(), e);
                        break;
                    }
                }
            }
            sink.on_disconnected(true);
        })
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn connect(&self, address: HardwareAddress) -> Result<()> {
        let target = SocketAddr::new(Address::new(address.octets()), self.channel);
        let stream = Stream::connect(target)
            .await
            .with_context(|| format!("RFCOMM connect to {} failed", address))?;

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(Box::new(writer));
        *self.reader.lock() = Some(self.spawn_reader(reader));

        // disconnect() may have run while the socket was connecting.
        if self.closed.load(Ordering::SeqCst) {
            self.shutdown();
        }
        Ok(())
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            writer.take();
            bail!("connection is closed");
        }
        let stream = writer.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown();
        self.sink.on_disconnected(false);
    }
}

impl RfcommTransport {
    fn shutdown(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // A write in flight drops the writer itself once it sees `closed`.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{self, ConnectionId, Inbound, Inbox, TransportEvent};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn transport(id: ConnectionId) -> (RfcommTransport, Inbox) {
        let (notifier, inbox) = bridge::inbox();
        (RfcommTransport::new(notifier.transport_sink(id), 1, 16), inbox)
    }

    fn attach(transport: &RfcommTransport) -> DuplexStream {
        let (local, peer) = tokio::io::duplex(64);
        *transport.reader.lock() = Some(transport.spawn_reader(local));
        peer
    }

    async fn next_event(inbox: &mut Inbox) -> (ConnectionId, TransportEvent) {
        let message = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .expect("timed out waiting for a transport event")
            .expect("inbox closed");
        match message {
            Inbound::Transport { id, event } => (id, event),
            _ => panic!("expected a transport event"),
        }
    }

    #[tokio::test]
    async fn test_reader_forwards_chunks_in_order() {
        let (transport, mut inbox) = transport(3);
        let mut peer = attach(&transport);

        for chunk in [&b"AT\r\n"[..], &b"OK"[..], &b"\r\n"[..]] {
            peer.write_all(chunk).await.unwrap();
            match next_event(&mut inbox).await {
                (3, TransportEvent::Data(bytes)) => assert_eq!(bytes, chunk),
                (id, event) => panic!("unexpected event {:?} for {}", event, id),
            }
        }

        drop(peer);
        assert!(matches!(
            next_event(&mut inbox).await,
            (3, TransportEvent::Disconnected { by_remote: true })
        ));
    }

    #[tokio::test]
    async fn test_reader_splits_large_reads_by_buffer_size() {
        let (transport, mut inbox) = transport(1);
        let mut peer = attach(&transport);

        let payload: Vec<u8> = (0u8..40).collect();
        peer.write_all(&payload).await.unwrap();
        drop(peer);

        let mut received = Vec::new();
        loop {
            match next_event(&mut inbox).await {
                (1, TransportEvent::Data(bytes)) => {
                    assert!(bytes.len() <= 16);
                    received.extend(bytes);
                }
                (1, TransportEvent::Disconnected { by_remote }) => {
                    assert!(by_remote);
                    break;
                }
                (id, event) => panic!("unexpected event {:?} for {}", event, id),
            }
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_disconnect_reports_once() {
        let (transport, mut inbox) = transport(5);
        let peer = attach(&transport);

        transport.disconnect();
        transport.disconnect();

        assert!(matches!(
            next_event(&mut inbox).await,
            (5, TransportEvent::Disconnected { by_remote: false })
        ));

        // The aborted reader must not report the peer going away.
        drop(peer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inbox.try_recv().is_none());
        assert!(transport.reader.lock().is_none());
    }

    #[tokio::test]
    async fn test_write_after_disconnect_fails() {
        let (transport, _inbox) = transport(2);
        let (local, _peer) = tokio::io::duplex(64);
        *transport.writer.lock().await = Some(Box::new(local));

        transport.write(b"hello").await.unwrap();
        transport.disconnect();

        let err = transport.write(b"again").await.unwrap_err();
        assert_eq!(err.to_string(), "connection is closed");
        assert!(transport.writer.lock().await.is_none());
    }
}
