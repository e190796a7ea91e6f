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

//! Frame definitions and serialization for the line-delimited front-end.
//!
//! Every frame is one JSON object followed by `\n`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::{Outcome, StreamChannel};
use crate::error::ErrorReport;

/// Request identifier chosen by the client.
pub type RequestId = u64;

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Request {
    /// `{"id": 1, "method": "connect", "args": {"address": "..."}}`
    Call {
        id: RequestId,
        method: String,
        #[serde(default)]
        args: Value,
    },
    /// `{"id": 2, "listen": "read/1"}`
    Listen { id: RequestId, listen: String },
    /// `{"id": 3, "cancel": "read/1"}`
    Cancel { id: RequestId, cancel: String },
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Self::Call { id, .. } | Self::Listen { id, .. } | Self::Cancel { id, .. } => *id,
        }
    }

    /// Parse from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json.trim())?)
    }
}

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Result {
        id: RequestId,
        result: Value,
    },
    Error {
        id: RequestId,
        error: ErrorReport,
    },
    NotImplemented {
        id: RequestId,
        #[serde(rename = "notImplemented")]
        not_implemented: bool,
    },
    Event {
        stream: String,
        event: Value,
    },
    End {
        stream: String,
        end: bool,
    },
}

impl Frame {
    /// Response frame for a finished command.
    pub fn response(id: RequestId, outcome: Outcome) -> Result<Self> {
        Ok(match outcome {
            Outcome::Success(reply) => Self::Result {
                id,
                result: serde_json::to_value(reply)?,
            },
            Outcome::Failure(err) => Self::Error {
                id,
                error: err.report(),
            },
            Outcome::NotImplemented => Self::NotImplemented {
                id,
                not_implemented: true,
            },
        })
    }

    /// Acknowledge a request that has no value.
    pub fn ack(id: RequestId) -> Self {
        Self::Result {
            id,
            result: Value::Null,
        }
    }

    pub fn error(id: RequestId, error: ErrorReport) -> Self {
        Self::Error { id, error }
    }

    pub fn event<T: Serialize>(channel: StreamChannel, event: &T) -> Result<Self> {
        Ok(Self::Event {
            stream: channel.to_string(),
            event: serde_json::to_value(event)?,
        })
    }

    pub fn end(channel: StreamChannel) -> Self {
        Self::End {
            stream: channel.to_string(),
            end: true,
        }
    }

    /// Serialize to JSON string with newline delimiter.
    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}
