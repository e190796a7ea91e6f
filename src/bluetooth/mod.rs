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

//! Bluetooth types and the OS seam.
//!
//! Value types shared by the bridge and its front-ends, the [`Adapter`] and
//! [`Transport`] traits the bridge drives, and the BlueZ implementation used
//! on Linux.

mod address;
mod bluez;
mod device;
mod platform;

pub use address::{AddressParseError, HardwareAddress};
pub use bluez::{BluezAdapter, RfcommTransport};
pub use device::{AdapterState, DeviceRecord, DeviceType};
pub use platform::{Adapter, NotRegistered, Notification, Transport};
