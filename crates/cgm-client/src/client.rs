// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-call connection handling and the concrete manager handle.
// Author: Lukas Bower

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;
use crate::privsep::{CreateRunner, ForkCreateRunner};
use crate::types::CgroupKey;
use crate::wire::{self, Request, Response};
use crate::{CgroupManager, DEFAULT_MANAGER_SOCKET, REQUIRED_API_VERSION};

/// Socket deadline for each direction of a manager round trip.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One established, version-checked connection to the manager.
///
/// Connections are short lived. [`ManagerHandle`] opens one per call and
/// drops it when the call completes, so a restarted manager is picked up on
/// the next call without any reconnect logic.
pub(crate) struct Connection {
    stream: BufReader<UnixStream>,
}

impl Connection {
    /// Connect to `path` and verify the manager's api version.
    pub(crate) fn open(path: &Path) -> Result<Self, RpcError> {
        let stream = UnixStream::connect(path).map_err(|source| RpcError::ConnectFailed {
            path: path.display().to_string(),
            source,
        })?;
        let _ = stream.set_read_timeout(Some(CALL_TIMEOUT));
        let _ = stream.set_write_timeout(Some(CALL_TIMEOUT));
        let mut connection = Self {
            stream: BufReader::new(stream),
        };
        let payload = connection.call(&Request::ApiVersion)?;
        let found: i32 = serde_json::from_value(payload.unwrap_or(Value::Null))
            .map_err(|err| RpcError::call_failed("api_version", err.to_string()))?;
        if found < REQUIRED_API_VERSION {
            return Err(RpcError::IncompatibleVersion {
                found,
                required: REQUIRED_API_VERSION,
            });
        }
        Ok(connection)
    }

    /// Issue one request frame and decode the manager's reply.
    pub(crate) fn call(&mut self, request: &Request) -> Result<Option<Value>, RpcError> {
        let method = request.method();
        let line = wire::encode_line(request)
            .map_err(|err| RpcError::call_failed(method, err.to_string()))?;
        self.stream
            .get_mut()
            .write_all(&line)
            .map_err(|err| RpcError::call_failed(method, err.to_string()))?;

        let mut reply = String::new();
        self.stream
            .read_line(&mut reply)
            .map_err(|err| RpcError::call_failed(method, err.to_string()))?;
        if reply.is_empty() {
            return Err(RpcError::call_failed(method, "manager closed the connection"));
        }
        let response: Response = wire::decode_line(&reply)
            .map_err(|err| RpcError::call_failed(method, err.to_string()))?;
        if !response.ok {
            let message = response
                .error
                .unwrap_or_else(|| "unspecified manager error".to_owned());
            return Err(RpcError::call_failed(method, message));
        }
        Ok(response.result)
    }
}

/// Synchronous cgroup manager client using one connection per call.
pub struct ManagerHandle {
    socket: PathBuf,
    runner: Box<dyn CreateRunner>,
}

impl ManagerHandle {
    /// Build a handle against `socket`, forking a helper for create calls.
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        let socket = socket.into();
        let runner = Box::new(ForkCreateRunner::new(socket.clone()));
        Self { socket, runner }
    }

    /// Build a handle against the well-known manager socket.
    #[must_use]
    pub fn with_default_socket() -> Self {
        Self::new(DEFAULT_MANAGER_SOCKET)
    }

    /// Build a handle with a caller-supplied create runner.
    #[must_use]
    pub fn with_runner(socket: impl Into<PathBuf>, runner: Box<dyn CreateRunner>) -> Self {
        Self {
            socket: socket.into(),
            runner,
        }
    }

    /// Socket path this handle talks to.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn call(&self, request: &Request) -> Result<Option<Value>, RpcError> {
        let mut connection = match Connection::open(&self.socket) {
            Ok(connection) => connection,
            Err(err) => {
                debug!("[cgm] {}: {err}", request.method());
                return Err(err);
            }
        };
        connection.call(request)
    }

    fn call_unit(&self, request: &Request) -> Result<(), RpcError> {
        self.call(request).map(|_| ())
    }

    fn decode<T: DeserializeOwned>(
        method: &'static str,
        payload: Option<Value>,
    ) -> Result<T, RpcError> {
        serde_json::from_value(payload.unwrap_or(Value::Null))
            .map_err(|err| RpcError::call_failed(method, format!("malformed result: {err}")))
    }
}

impl CgroupManager for ManagerHandle {
    fn list_controllers(&self) -> Result<Vec<String>, RpcError> {
        let payload = self.call(&Request::ListControllers)?;
        Self::decode("list_controllers", payload)
    }

    fn list_keys(&self, controller: &str, cgroup: &str) -> Result<Vec<CgroupKey>, RpcError> {
        let payload = self.call(&Request::ListKeys {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
        })?;
        Self::decode("list_keys", payload)
    }

    fn list_children(&self, controller: &str, cgroup: &str) -> Result<Vec<String>, RpcError> {
        let payload = self.call(&Request::ListChildren {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
        })?;
        Self::decode("list_children", payload)
    }

    fn get_pid_cgroup(&self, pid: i32, controller: &str) -> Result<String, RpcError> {
        let payload = self.call(&Request::GetPidCgroup {
            controller: controller.to_owned(),
            pid,
        })?;
        Self::decode("get_pid_cgroup", payload)
    }

    fn get_value(&self, controller: &str, cgroup: &str, key: &str) -> Result<String, RpcError> {
        let payload = self.call(&Request::GetValue {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
            key: key.to_owned(),
        })?;
        Self::decode("get_value", payload)
    }

    fn set_value(
        &self,
        controller: &str,
        cgroup: &str,
        key: &str,
        value: &str,
    ) -> Result<(), RpcError> {
        self.call_unit(&Request::SetValue {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }

    fn create(&self, controller: &str, cgroup: &str, uid: u32, gid: u32) -> Result<(), RpcError> {
        self.runner
            .create_as(uid, gid, controller, cgroup)
            .map_err(|err| RpcError::call_failed("create", err.to_string()))
    }

    fn remove(&self, controller: &str, cgroup: &str) -> Result<(), RpcError> {
        self.call_unit(&Request::Remove {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
            recursive: true,
        })
    }

    fn chown(&self, controller: &str, cgroup: &str, uid: u32, gid: u32) -> Result<(), RpcError> {
        self.call_unit(&Request::Chown {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
            uid,
            gid,
        })
    }

    fn chmod(&self, controller: &str, path: &str, mode: u32) -> Result<(), RpcError> {
        self.call_unit(&Request::Chmod {
            controller: controller.to_owned(),
            path: path.to_owned(),
            mode,
        })
    }

    fn move_pid(&self, controller: &str, cgroup: &str, pid: i32) -> Result<(), RpcError> {
        self.call_unit(&Request::MovePid {
            controller: controller.to_owned(),
            cgroup: cgroup.to_owned(),
            pid,
        })
    }

    fn escape_to_root_cgroup(&self) -> Result<(), RpcError> {
        self.call_unit(&Request::MovePidAbs {
            controller: "all".to_owned(),
            cgroup: "/".to_owned(),
            pid: std::process::id() as i32,
        })
    }
}
