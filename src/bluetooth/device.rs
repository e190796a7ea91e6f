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

//! Device records and adapter state codes.

use serde::{Serialize, Serializer};

use super::address::HardwareAddress;

/// Power state of the local adapter.
///
/// The integer codes are the ones applications already expect from the
/// platform, so they are sent on the wire unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl AdapterState {
    pub fn code(&self) -> i32 {
        match self {
            Self::Off => 10,
            Self::TurningOn => 11,
            Self::On => 12,
            Self::TurningOff => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(Self::Off),
            11 => Some(Self::TurningOn),
            12 => Some(Self::On),
            13 => Some(Self::TurningOff),
            _ => None,
        }
    }

    pub fn from_powered(powered: bool) -> Self {
        if powered {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl Serialize for AdapterState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Radio technology of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Unknown,
    Classic,
    Le,
    Dual,
}

impl DeviceType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Classic => 1,
            Self::Le => 2,
            Self::Dual => 3,
        }
    }
}

impl Serialize for DeviceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// A remote device, either bonded or found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub address: HardwareAddress,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    pub bonded: bool,
    /// Signal strength in dBm, only known for discovered devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(rename = "class", skip_serializing_if = "Option::is_none")]
    pub device_class: Option<u32>,
}

impl DeviceRecord {
    pub fn new(address: HardwareAddress, name: Option<String>, kind: DeviceType) -> Self {
        Self {
            address,
            name,
            kind,
            bonded: false,
            rssi: None,
            device_class: None,
        }
    }

    /// The record as listed among bonded devices.
    pub fn into_bonded(self) -> Self {
        Self {
            bonded: true,
            rssi: None,
            ..self
        }
    }
}
