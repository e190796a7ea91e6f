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

//! The bridge session.
//!
//! A [`Bridge`] owns all session state and runs as a single task: the main
//! thread. Commands, stream subscriptions, OS notifications, transport
//! callbacks and worker completions all arrive as messages in one inbox and
//! are handled in order. Blocking transport work runs on spawned worker tasks
//! which post their result back into the inbox; nothing is ever completed
//! or delivered from a worker directly.

mod adapter_state;
mod command;
mod connection;
mod discovery;
mod permission;
mod registry;
mod stream;

pub use command::{Command, DecodeError, Outcome, Payload, Reply};
pub use connection::{ConnectionState, ConnectionWrapper};
pub use discovery::DiscoveryState;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use stream::{EventStream, StreamChannel};

use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bluetooth::{Adapter, AdapterState, DeviceRecord, HardwareAddress};
use crate::error::{panic_error, trace, BridgeError};
use adapter_state::AdapterStateMonitor;
use discovery::DiscoverySession;
use permission::{Continuations, Ensure, PermissionGate};
use stream::Subscriber;

type Responder = oneshot::Sender<Outcome>;

fn respond(responder: Responder, result: Result<Reply, BridgeError>) {
    let _ = responder.send(result.into());
}

/// Notifications produced by the operating system.
#[derive(Debug)]
pub(crate) enum OsEvent {
    AdapterStateChanged(AdapterState),
    DeviceFound(DeviceRecord),
    DiscoveryFinished,
    PermissionResult(Vec<bool>),
    EnableResult(bool),
}

/// Callbacks from a connection's transport.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Data(Vec<u8>),
    Disconnected { by_remote: bool },
}

/// Messages handled by the bridge loop.
pub(crate) enum Inbound {
    Command {
        request: Result<Command, DecodeError>,
        responder: Responder,
    },
    ListenState(Subscriber<AdapterState>),
    ListenDiscovery(Subscriber<DeviceRecord>),
    ListenRead(ConnectionId, Subscriber<Vec<u8>>),
    Cancel {
        channel: StreamChannel,
        token: u64,
    },
    Os(OsEvent),
    Transport {
        id: ConnectionId,
        event: TransportEvent,
    },
    ConnectDone {
        connection: Arc<ConnectionWrapper>,
        result: Result<(), BridgeError>,
        responder: Responder,
    },
    WriteDone {
        result: Result<(), BridgeError>,
        responder: Responder,
    },
    Shutdown,
}

/// Create the inbox shared by a bridge and its OS-side handles.
pub fn inbox() -> (Notifier, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { inbox: tx }, Inbox { rx })
}

/// Receiving end of the bridge inbox.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[cfg(test)]
impl Inbox {
    pub(crate) async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }
}

/// Posts OS notifications into the bridge.
#[derive(Clone)]
pub struct Notifier {
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl Notifier {
    pub fn adapter_state_changed(&self, state: AdapterState) {
        self.post(OsEvent::AdapterStateChanged(state));
    }

    pub fn device_found(&self, record: DeviceRecord) {
        self.post(OsEvent::DeviceFound(record));
    }

    pub fn discovery_finished(&self) {
        self.post(OsEvent::DiscoveryFinished);
    }

    /// Answer to `Adapter::request_permission`, one entry per permission.
    pub fn permission_result(&self, grant_results: Vec<bool>) {
        self.post(OsEvent::PermissionResult(grant_results));
    }

    /// Answer to `Adapter::request_enable`.
    pub fn enable_result(&self, enabled: bool) {
        self.post(OsEvent::EnableResult(enabled));
    }

    pub(crate) fn transport_sink(&self, id: ConnectionId) -> TransportSink {
        TransportSink {
            id,
            inbox: self.inbox.clone(),
        }
    }

    fn post(&self, event: OsEvent) {
        let _ = self.inbox.send(Inbound::Os(event));
    }
}

/// Callbacks a transport uses to report inbound data and disconnects.
#[derive(Clone)]
pub struct TransportSink {
    id: ConnectionId,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl TransportSink {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn on_inbound_data(&self, bytes: Vec<u8>) {
        self.post(TransportEvent::Data(bytes));
    }

    pub fn on_disconnected(&self, by_remote: bool) {
        self.post(TransportEvent::Disconnected { by_remote });
    }

    fn post(&self, event: TransportEvent) {
        let _ = self.inbox.send(Inbound::Transport { id: self.id, event });
    }
}

/// Application-facing handle to a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    inbox: mpsc::UnboundedSender<Inbound>,
    registry: Arc<ConnectionRegistry>,
    tokens: Arc<AtomicU64>,
}

impl BridgeHandle {
    /// Run a typed command.
    pub async fn call(&self, command: Command) -> Outcome {
        self.submit(Ok(command)).await
    }

    /// Decode a named command and run it.
    pub async fn invoke(&self, method: &str, args: &Value) -> Outcome {
        self.submit(Command::decode(method, args)).await
    }

    async fn submit(&self, request: Result<Command, DecodeError>) -> Outcome {
        let (responder, rx) = oneshot::channel();
        if self
            .inbox
            .send(Inbound::Command { request, responder })
            .is_err()
        {
            return Outcome::Failure(BridgeError::Closed);
        }
        rx.await.unwrap_or(Outcome::Failure(BridgeError::Closed))
    }

    /// Adapter power-state changes.
    pub fn state_events(&self) -> EventStream<AdapterState> {
        let (stream, subscriber) = self.open(StreamChannel::AdapterState);
        let _ = self.inbox.send(Inbound::ListenState(subscriber));
        stream
    }

    /// Devices found by the current discovery.
    pub fn discovery_events(&self) -> EventStream<DeviceRecord> {
        let (stream, subscriber) = self.open(StreamChannel::Discovery);
        let _ = self.inbox.send(Inbound::ListenDiscovery(subscriber));
        stream
    }

    /// Bytes received on connection `id`.
    pub fn read_events(&self, id: ConnectionId) -> EventStream<Vec<u8>> {
        let (stream, subscriber) = self.open(StreamChannel::Read(id));
        let _ = self.inbox.send(Inbound::ListenRead(id, subscriber));
        stream
    }

    /// Identifiers currently in the registry.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    pub fn is_connection_alive(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Stop the bridge loop, tearing down every connection.
    pub fn shutdown(&self) {
        let _ = self.inbox.send(Inbound::Shutdown);
    }

    fn open<T>(&self, channel: StreamChannel) -> (EventStream<T>, Subscriber<T>) {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed) + 1;
        EventStream::open(self.inbox.clone(), channel, token)
    }
}

/// Permission-gated commands waiting for a decision.
enum Gated {
    EnsurePermissions,
    GetBondedDevices,
    StartDiscovery,
}

struct PendingGated {
    gated: Gated,
    responder: Responder,
}

/// The bridge session and its main loop.
pub struct Bridge {
    adapter: Option<Arc<dyn Adapter>>,
    notifier: Notifier,
    inbox: Inbox,
    registry: Arc<ConnectionRegistry>,
    tokens: Arc<AtomicU64>,
    permissions: PermissionGate<PendingGated>,
    enable_waiters: Continuations<Responder>,
    discovery: DiscoverySession,
    monitor: AdapterStateMonitor,
}

impl Bridge {
    /// Create a bridge. `adapter` is `None` when the host has no radio.
    pub fn new(adapter: Option<Arc<dyn Adapter>>, notifier: Notifier, inbox: Inbox) -> Self {
        Self {
            adapter,
            notifier,
            inbox,
            registry: Arc::new(ConnectionRegistry::new()),
            tokens: Arc::new(AtomicU64::new(0)),
            permissions: PermissionGate::new(),
            enable_waiters: Continuations::new(),
            discovery: DiscoverySession::new(),
            monitor: AdapterStateMonitor::new(),
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            inbox: self.notifier.inbox.clone(),
            registry: self.registry.clone(),
            tokens: self.tokens.clone(),
        }
    }

    /// Run until [`BridgeHandle::shutdown`] is called.
    pub async fn run(mut self) {
        info!(
            "Bridge running ({})",
            if self.adapter.is_some() {
                "adapter present"
            } else {
                "no adapter"
            }
        );

        while let Some(message) = self.inbox.rx.recv().await {
            if let Inbound::Shutdown = message {
                break;
            }
            self.handle_message(message).await;
        }

        self.teardown().await;
        info!("Bridge stopped");
    }

    async fn handle_message(&mut self, message: Inbound) {
        match message {
            Inbound::Command { request, responder } => self.dispatch(request, responder).await,
            Inbound::ListenState(subscriber) => {
                self.monitor.listen(self.adapter.as_deref(), subscriber);
            }
            Inbound::ListenDiscovery(subscriber) => self.discovery.listen(subscriber),
            Inbound::ListenRead(id, subscriber) => match self.registry.get(id) {
                Some(connection) => connection.attach_reader(subscriber),
                None => debug!("No connection {} to read from", id),
            },
            Inbound::Cancel { channel, token } => self.cancel_stream(channel, token).await,
            Inbound::Os(event) => self.handle_os_event(event).await,
            Inbound::Transport { id, event } => self.handle_transport_event(id, event),
            Inbound::ConnectDone {
                connection,
                result,
                responder,
            } => self.connect_done(connection, result, responder),
            Inbound::WriteDone { result, responder } => {
                respond(responder, result.map(|()| Reply::Unit));
            }
            Inbound::Shutdown => {}
        }
    }

    async fn dispatch(&mut self, request: Result<Command, DecodeError>, responder: Responder) {
        let Some(adapter) = self.adapter.clone() else {
            let result = match request {
                Ok(Command::IsAvailable) => Ok(Reply::Bool(false)),
                _ => Err(BridgeError::AdapterUnavailable),
            };
            respond(responder, result);
            return;
        };

        let command = match request {
            Ok(command) => command,
            Err(DecodeError::UnknownMethod(method)) => {
                debug!("Method not implemented: {}", method);
                let _ = responder.send(Outcome::NotImplemented);
                return;
            }
            Err(DecodeError::Invalid(err)) => {
                respond(responder, Err(err));
                return;
            }
        };
        debug!("Dispatching {}", command.name());

        match command {
            Command::IsAvailable => respond(responder, Ok(Reply::Bool(true))),
            Command::IsEnabled => {
                let result = adapter.is_enabled().await;
                respond(responder, result.map(Reply::Bool).map_err(BridgeError::platform));
            }
            Command::OpenSettings => {
                let result = adapter.open_settings().await;
                respond(responder, result.map(|()| Reply::Unit).map_err(BridgeError::platform));
            }
            Command::RequestEnable => self.request_enable(adapter.as_ref(), responder).await,
            Command::RequestDisable => {
                let result = Self::request_disable(adapter.as_ref()).await;
                respond(responder, result.map(Reply::Bool).map_err(BridgeError::platform));
            }
            Command::GetState => {
                let result = adapter.state().await;
                respond(responder, result.map(Reply::State).map_err(BridgeError::platform));
            }
            Command::IsDiscovering => {
                let result = adapter.is_discovering().await;
                respond(responder, result.map(Reply::Bool).map_err(BridgeError::platform));
            }
            Command::CancelDiscovery => {
                self.discovery.cancel(adapter.as_ref()).await;
                respond(responder, Ok(Reply::Unit));
            }
            Command::EnsurePermissions => {
                self.gated(adapter.as_ref(), Gated::EnsurePermissions, responder)
                    .await
            }
            Command::GetBondedDevices => {
                self.gated(adapter.as_ref(), Gated::GetBondedDevices, responder)
                    .await
            }
            Command::StartDiscovery => {
                self.gated(adapter.as_ref(), Gated::StartDiscovery, responder)
                    .await
            }
            Command::Connect { address } => self.connect(adapter.as_ref(), address, responder),
            Command::Write { id, payload } => self.write(id, payload, responder),
        }
    }

    async fn request_enable(&self, adapter: &dyn Adapter, responder: Responder) {
        match adapter.is_enabled().await {
            Ok(true) => return respond(responder, Ok(Reply::Bool(true))),
            Ok(false) => {}
            Err(e) => return respond(responder, Err(BridgeError::platform(e))),
        }

        if !self.enable_waiters.park(responder) {
            debug!("Enable prompt already pending");
            return;
        }
        info!("Requesting adapter enable");
        if let Err(e) = adapter.request_enable().await {
            warn!("Enable request failed: {:#}", e);
            let (message, details) = (e.to_string(), trace(&e));
            for waiter in self.enable_waiters.take_all() {
                respond(
                    waiter,
                    Err(BridgeError::Platform {
                        message: message.clone(),
                        details: details.clone(),
                    }),
                );
            }
        }
    }

    async fn request_disable(adapter: &dyn Adapter) -> anyhow::Result<bool> {
        if !adapter.is_enabled().await? {
            return Ok(false);
        }
        info!("Disabling adapter");
        adapter.disable().await?;
        Ok(true)
    }

    async fn gated(&self, adapter: &dyn Adapter, gated: Gated, responder: Responder) {
        let pending = PendingGated { gated, responder };
        match self.permissions.ensure(adapter, pending) {
            Ensure::Granted(pending) => self.resume(adapter, pending, true).await,
            Ensure::Pending => {
                debug!("{} command(s) waiting on permission", self.permissions.pending());
            }
        }
    }

    async fn resume(&self, adapter: &dyn Adapter, pending: PendingGated, granted: bool) {
        let PendingGated { gated, responder } = pending;

        let result = match gated {
            Gated::EnsurePermissions => Ok(Reply::Bool(granted)),
            _ if !granted => Err(BridgeError::permission_denied()),
            Gated::GetBondedDevices => adapter
                .bonded_devices()
                .await
                .map(|devices| {
                    Reply::Devices(devices.into_iter().map(DeviceRecord::into_bonded).collect())
                })
                .map_err(BridgeError::platform),
            Gated::StartDiscovery => self.discovery.start(adapter).await.map(|()| Reply::Unit),
        };
        respond(responder, result);
    }

    fn connect(&self, adapter: &dyn Adapter, address: HardwareAddress, responder: Responder) {
        let Some(id) = self.registry.allocate_id() else {
            warn!("Refusing to connect to {}: connection ids exhausted", address);
            let err = anyhow::anyhow!("connection ids exhausted");
            respond(responder, Err(BridgeError::connect(&err)));
            return;
        };
        let transport = adapter.open_transport(self.notifier.transport_sink(id));
        let connection = Arc::new(ConnectionWrapper::new(id, address, transport));
        self.registry.insert(connection.clone());

        info!("Connecting to {} (id: {})", address, id);

        let inbox = self.notifier.inbox.clone();
        tokio::spawn(async move {
            let transport = connection.transport();
            let result = run_worker(async move { transport.connect(address).await })
                .await
                .map_err(|e| BridgeError::connect(&e));
            let _ = inbox.send(Inbound::ConnectDone {
                connection,
                result,
                responder,
            });
        });
    }

    /// Settle a connect attempt.
    ///
    /// If a cancel or shutdown tore the connection down while the transport
    /// was connecting, the freshly opened link is disconnected again. The
    /// caller still gets the id, but it is no longer registered, so every
    /// later command on it fails with `invalid_argument`.
    fn connect_done(
        &self,
        connection: Arc<ConnectionWrapper>,
        result: Result<(), BridgeError>,
        responder: Responder,
    ) {
        let id = connection.id();
        match result {
            Ok(()) => {
                if connection.mark_connected() {
                    info!("Connected to {} (id: {})", connection.address(), id);
                } else {
                    // Torn down while connecting.
                    connection.transport().disconnect();
                }
                respond(responder, Ok(Reply::ConnectionId(id)));
            }
            Err(err) => {
                warn!("Connecting to {} failed (id: {}): {}", connection.address(), id, err);
                connection.close();
                self.registry.remove(id);
                respond(responder, Err(err));
            }
        }
    }

    fn write(&self, id: ConnectionId, payload: Payload, responder: Responder) {
        let Some(connection) = self.registry.get(id) else {
            return respond(
                responder,
                Err(BridgeError::invalid_argument(
                    "there is no connection with provided id",
                )),
            );
        };

        let bytes = payload.into_bytes();
        let inbox = self.notifier.inbox.clone();
        tokio::spawn(async move {
            let transport = connection.transport();
            let result = run_worker(async move { transport.write(&bytes).await })
                .await
                .map_err(|e| BridgeError::write(&e));
            let _ = inbox.send(Inbound::WriteDone { result, responder });
        });
    }

    async fn cancel_stream(&self, channel: StreamChannel, token: u64) {
        match channel {
            StreamChannel::AdapterState => {
                self.monitor
                    .cancel_subscription(self.adapter.as_deref(), token);
            }
            StreamChannel::Discovery => {
                self.discovery
                    .cancel_subscription(self.adapter.as_deref(), token)
                    .await;
            }
            StreamChannel::Read(id) => self.cancel_reader(id, token),
        }
    }

    /// Consumer-side cancel of a connection stream: disconnect now, dispose
    /// on a worker.
    fn cancel_reader(&self, id: ConnectionId, token: u64) {
        let Some(connection) = self.registry.get(id) else {
            return;
        };
        if !connection.reader().owned_by(token) {
            debug!("Ignoring stale read cancellation (id: {})", id);
            return;
        }

        connection.reader().close();
        connection.disconnect();

        let registry = self.registry.clone();
        tokio::spawn(async move {
            connection.close();
            if registry.remove(id).is_some() {
                info!("Disconnected (id: {})", id);
            }
        });
    }

    async fn handle_os_event(&self, event: OsEvent) {
        match event {
            OsEvent::AdapterStateChanged(state) => {
                self.monitor.state_changed(&self.registry, state);
            }
            OsEvent::DeviceFound(record) => self.discovery.device_found(record),
            OsEvent::DiscoveryFinished => {
                if let Some(adapter) = self.adapter.as_deref() {
                    self.discovery.finish(adapter).await;
                }
            }
            OsEvent::PermissionResult(grant_results) => {
                let (granted, waiting) = self.permissions.resolve(&grant_results);
                info!(
                    "Permission {} ({} waiting)",
                    if granted { "granted" } else { "denied" },
                    waiting.len()
                );
                if let Some(adapter) = self.adapter.as_deref() {
                    for pending in waiting {
                        self.resume(adapter, pending, granted).await;
                    }
                }
            }
            OsEvent::EnableResult(enabled) => {
                for waiter in self.enable_waiters.take_all() {
                    respond(waiter, Ok(Reply::Bool(enabled)));
                }
            }
        }
    }

    fn handle_transport_event(&self, id: ConnectionId, event: TransportEvent) {
        let Some(connection) = self.registry.get(id) else {
            return;
        };
        match event {
            TransportEvent::Data(bytes) => connection.on_inbound_data(bytes),
            TransportEvent::Disconnected { by_remote } => connection.on_disconnected(by_remote),
        }
    }

    async fn teardown(&mut self) {
        for connection in self.registry.remove_all() {
            connection.close();
        }
        if let Some(adapter) = self.adapter.as_deref() {
            if self.discovery.state() == DiscoveryState::Discovering {
                self.discovery.cancel(adapter).await;
            }
        }
        self.monitor.shutdown(self.adapter.as_deref());
    }
}

/// Run transport work, converting a panic into an error.
async fn run_worker<F>(work: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_error(payload)),
    }
}
