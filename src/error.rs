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

//! Error taxonomy and structured error reports.
//!
//! Every failure that reaches a caller is a [`BridgeError`]. Failures coming
//! out of the adapter or a transport arrive as [`anyhow::Error`] and are
//! translated at the worker boundary, keeping the full cause chain as the
//! diagnostic trace.

use serde::Serialize;
use std::any::Any;
use thiserror::Error;

/// Reason shown when a permission-gated command is denied.
pub const PERMISSION_DENIED_REASON: &str =
    "discovering other devices requires location access permission";

/// Errors surfaced to the caller of a command.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No usable radio on this host.
    #[error("bluetooth is not available")]
    AdapterUnavailable,

    /// Missing or malformed command arguments.
    #[error("{0}")]
    InvalidArgument(String),

    /// The required runtime permission was not granted.
    #[error("{0}")]
    PermissionDenied(String),

    /// A permission request is already outstanding.
    #[error("another permission request is already in progress")]
    PermissionRequestInProgress,

    /// Transport connect failed.
    #[error("{message}")]
    Connect { message: String, details: String },

    /// Transport write failed.
    #[error("{message}")]
    Write { message: String, details: String },

    /// The adapter rejected an operation.
    #[error("{message}")]
    Platform { message: String, details: String },

    /// The bridge loop is gone.
    #[error("bridge has shut down")]
    Closed,
}

impl BridgeError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn permission_denied() -> Self {
        Self::PermissionDenied(PERMISSION_DENIED_REASON.to_string())
    }

    /// Translate a failed transport connect.
    pub fn connect(err: &anyhow::Error) -> Self {
        Self::Connect {
            message: err.to_string(),
            details: trace(err),
        }
    }

    /// Translate a failed transport write.
    pub fn write(err: &anyhow::Error) -> Self {
        Self::Write {
            message: err.to_string(),
            details: trace(err),
        }
    }

    /// Translate a failed adapter call.
    pub fn platform(err: anyhow::Error) -> Self {
        Self::Platform {
            message: err.to_string(),
            details: trace(&err),
        }
    }

    /// Stable wire code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable => "bluetooth_unavailable",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PermissionDenied(_) => "no_permissions",
            Self::PermissionRequestInProgress => "permission_request_in_progress",
            Self::Connect { .. } => "connect_error",
            Self::Write { .. } => "write_error",
            Self::Platform { .. } => "platform_error",
            Self::Closed => "bridge_closed",
        }
    }

    /// Diagnostic detail, if this kind carries one.
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Connect { details, .. }
            | Self::Write { details, .. }
            | Self::Platform { details, .. } => Some(details),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details().map(str::to_string),
        }
    }
}

/// Structured error as delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&BridgeError> for ErrorReport {
    fn from(err: &BridgeError) -> Self {
        err.report()
    }
}

/// Render an error with its whole cause chain (and backtrace when captured).
pub fn trace(err: &anyhow::Error) -> String {
    format!("{err:?}")
}

/// Turn a panic payload caught at a worker boundary into an error.
pub fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    anyhow::anyhow!("worker panicked: {message}")
}
