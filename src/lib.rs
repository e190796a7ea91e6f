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

//! Orchestration layer for serial connections over Bluetooth RFCOMM.
//!
//! A [`bridge::Bridge`] accepts commands, exposes event streams for adapter
//! state, discovery and per-connection inbound data, and drives an
//! [`bluetooth::Adapter`] implementation. [`frontend`] serves the bridge as
//! line-delimited JSON.

pub mod bluetooth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod frontend;
pub mod protocol;

pub use bridge::{Bridge, BridgeHandle, Command, EventStream, Outcome, Reply};
pub use error::{BridgeError, ErrorReport};
