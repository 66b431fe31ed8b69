// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error types for manager RPC round trips.
// Author: Lukas Bower

use std::io;

use thiserror::Error;

/// Errors surfaced by manager RPC calls.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The manager socket could not be reached.
    #[error("connect to cgroup manager at {path} failed: {source}")]
    ConnectFailed {
        /// Socket path the connect was attempted against.
        path: String,
        /// Underlying connect failure.
        #[source]
        source: io::Error,
    },

    /// The manager is reachable but too old to serve this client.
    #[error("cgroup manager api version {found} is below required {required}")]
    IncompatibleVersion {
        /// Version reported by the manager.
        found: i32,
        /// Minimum version this client requires.
        required: i32,
    },

    /// A call reached the manager and failed there or on the wire.
    #[error("manager call {method} failed: {message}")]
    CallFailed {
        /// Wire method name of the failed call.
        method: &'static str,
        /// Failure detail from the manager or the transport.
        message: String,
    },
}

impl RpcError {
    /// Build a [`RpcError::CallFailed`] for `method`.
    pub(crate) fn call_failed(method: &'static str, message: impl Into<String>) -> Self {
        Self::CallFailed {
            method,
            message: message.into(),
        }
    }
}
