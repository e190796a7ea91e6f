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

//! Commands accepted by the bridge and their results.

use serde::Serialize;
use serde_json::Value;

use super::registry::ConnectionId;
use crate::bluetooth::{AdapterState, DeviceRecord, HardwareAddress};
use crate::error::BridgeError;

/// Data handed to `write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Sent as UTF-8.
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// A decoded command with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    IsAvailable,
    /// `isOn` and `isEnabled`.
    IsEnabled,
    OpenSettings,
    RequestEnable,
    RequestDisable,
    EnsurePermissions,
    GetState,
    GetBondedDevices,
    IsDiscovering,
    StartDiscovery,
    CancelDiscovery,
    Connect { address: HardwareAddress },
    Write { id: ConnectionId, payload: Payload },
}

/// Why a method call could not become a [`Command`].
#[derive(Debug)]
pub enum DecodeError {
    /// No command with this name exists.
    UnknownMethod(String),
    /// The arguments are missing or malformed.
    Invalid(BridgeError),
}

impl Command {
    /// Decode a method name and its JSON arguments.
    pub fn decode(method: &str, args: &Value) -> Result<Self, DecodeError> {
        let command = match method {
            "isAvailable" => Self::IsAvailable,
            "isOn" | "isEnabled" => Self::IsEnabled,
            "openSettings" => Self::OpenSettings,
            "requestEnable" => Self::RequestEnable,
            "requestDisable" => Self::RequestDisable,
            "ensurePermissions" => Self::EnsurePermissions,
            "getState" => Self::GetState,
            "getBondedDevices" => Self::GetBondedDevices,
            "isDiscovering" => Self::IsDiscovering,
            "startDiscovery" => Self::StartDiscovery,
            "cancelDiscovery" => Self::CancelDiscovery,
            "connect" => decode_connect(args).map_err(DecodeError::Invalid)?,
            "write" => decode_write(args).map_err(DecodeError::Invalid)?,
            other => return Err(DecodeError::UnknownMethod(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IsAvailable => "isAvailable",
            Self::IsEnabled => "isEnabled",
            Self::OpenSettings => "openSettings",
            Self::RequestEnable => "requestEnable",
            Self::RequestDisable => "requestDisable",
            Self::EnsurePermissions => "ensurePermissions",
            Self::GetState => "getState",
            Self::GetBondedDevices => "getBondedDevices",
            Self::IsDiscovering => "isDiscovering",
            Self::StartDiscovery => "startDiscovery",
            Self::CancelDiscovery => "cancelDiscovery",
            Self::Connect { .. } => "connect",
            Self::Write { .. } => "write",
        }
    }
}

fn decode_connect(args: &Value) -> Result<Command, BridgeError> {
    let address = args
        .get("address")
        .ok_or_else(|| BridgeError::invalid_argument("argument 'address' not found"))?;

    address
        .as_str()
        .and_then(|s| s.parse().ok())
        .map(|address| Command::Connect { address })
        .ok_or_else(|| {
            BridgeError::invalid_argument(
                "'address' argument is required to be string containing remote MAC address",
            )
        })
}

fn decode_write(args: &Value) -> Result<Command, BridgeError> {
    let id = args
        .get("id")
        .ok_or_else(|| BridgeError::invalid_argument("argument 'id' not found"))?
        .as_u64()
        .and_then(|id| ConnectionId::try_from(id).ok())
        .ok_or_else(|| {
            BridgeError::invalid_argument("'id' argument is required to be integer id of connection")
        })?;

    let payload = if let Some(text) = args.get("string") {
        let text = text.as_str().ok_or_else(|| {
            BridgeError::invalid_argument("'string' argument is required to be a string")
        })?;
        Payload::Text(text.to_string())
    } else if let Some(bytes) = args.get("bytes") {
        Payload::Bytes(decode_bytes(bytes).ok_or_else(|| {
            BridgeError::invalid_argument("'bytes' argument is required to be a byte array")
        })?)
    } else {
        return Err(BridgeError::invalid_argument(
            "there must be 'string' or 'bytes' argument",
        ));
    };

    Ok(Command::Write { id, payload })
}

fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

/// Successful command result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Serialized as `null`.
    Unit,
    Bool(bool),
    State(AdapterState),
    ConnectionId(ConnectionId),
    Devices(Vec<DeviceRecord>),
}

/// Everything a command can end in.
#[derive(Debug)]
pub enum Outcome {
    Success(Reply),
    Failure(BridgeError),
    /// The method does not exist. Not an error kind.
    NotImplemented,
}

impl Outcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Success(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BridgeError> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Result<Reply, BridgeError>> for Outcome {
    fn from(result: Result<Reply, BridgeError>) -> Self {
        match result {
            Ok(reply) => Self::Success(reply),
            Err(err) => Self::Failure(err),
        }
    }
}
