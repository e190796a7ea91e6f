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

//! Seams to the operating system.
//!
//! The bridge never talks to the radio directly. An [`Adapter`] wraps the
//! local controller and the OS notifications it produces; a [`Transport`]
//! performs the socket work for a single connection. Results that the OS
//! delivers later (permission decisions, enable prompts, notifications,
//! inbound bytes) come back through the [`Notifier`] and [`TransportSink`]
//! handles the implementation was given.
//!
//! [`Notifier`]: crate::bridge::Notifier
//! [`TransportSink`]: crate::bridge::TransportSink

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::address::HardwareAddress;
use super::device::{AdapterState, DeviceRecord};
use crate::bridge::TransportSink;

/// OS notifications the bridge subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// Adapter power-state changes.
    AdapterState,
    /// Device-found and scan-finished during discovery.
    Discovery,
}

/// Unsubscribing from a notification that is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0:?} notification is not registered")]
pub struct NotRegistered(pub Notification);

/// The local Bluetooth controller.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn is_enabled(&self) -> Result<bool>;

    async fn state(&self) -> Result<AdapterState>;

    /// Show the system Bluetooth settings.
    async fn open_settings(&self) -> Result<()>;

    /// Ask the user to power the adapter on.
    ///
    /// The outcome arrives later through `Notifier::enable_result`.
    async fn request_enable(&self) -> Result<()>;

    async fn disable(&self) -> Result<()>;

    /// Whether the runtime permission needed for scanning is held.
    fn has_permission(&self) -> bool;

    /// Prompt for the runtime permission.
    ///
    /// The outcome arrives later through `Notifier::permission_result`.
    fn request_permission(&self);

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>>;

    async fn is_discovering(&self) -> Result<bool>;

    async fn start_discovery(&self) -> Result<()>;

    async fn cancel_discovery(&self) -> Result<()>;

    /// Start delivering a notification to the bridge.
    fn register(&self, notification: Notification) -> Result<()>;

    /// Stop delivering a notification.
    fn unregister(&self, notification: Notification) -> Result<(), NotRegistered>;

    /// Create the transport for a new connection.
    fn open_transport(&self, sink: TransportSink) -> Arc<dyn Transport>;
}

/// Socket-level work for one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: HardwareAddress) -> Result<()>;

    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Close the connection. Calling it more than once is harmless.
    fn disconnect(&self);
}
