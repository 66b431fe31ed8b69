// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: JSON-line frame types spoken on the manager socket.
// Author: Lukas Bower

//! Wire frames exchanged with the cgroup manager.
//!
//! The protocol is line oriented: each side writes exactly one JSON object
//! per request or response, terminated by a newline. Requests are tagged by
//! an `op` field; responses carry an `ok` flag plus either a `result`
//! payload or an `error` message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single manager request frame.
///
/// The create frame intentionally carries no credentials. The manager
/// assigns ownership from the peer credentials of the submitting socket, so
/// creates must be sent from a process already running as the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Query the manager's protocol version.
    ApiVersion,
    /// List the names of every mounted controller.
    ListControllers,
    /// List the control keys of one cgroup with ownership metadata.
    ListKeys {
        /// Controller name.
        controller: String,
        /// Cgroup path under the controller.
        cgroup: String,
    },
    /// List the names of the direct children of one cgroup.
    ListChildren {
        /// Controller name.
        controller: String,
        /// Cgroup path under the controller.
        cgroup: String,
    },
    /// Report the cgroup a process belongs to.
    GetPidCgroup {
        /// Controller name.
        controller: String,
        /// Process id to look up.
        pid: i32,
    },
    /// Read one control key's value.
    GetValue {
        /// Controller name.
        controller: String,
        /// Cgroup path under the controller.
        cgroup: String,
        /// Control key name.
        key: String,
    },
    /// Write one control key's value.
    SetValue {
        /// Controller name.
        controller: String,
        /// Cgroup path under the controller.
        cgroup: String,
        /// Control key name.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Create a cgroup owned by the submitting peer.
    Create {
        /// Controller name.
        controller: String,
        /// Cgroup path to create.
        cgroup: String,
    },
    /// Remove a cgroup.
    Remove {
        /// Controller name.
        controller: String,
        /// Cgroup path to remove.
        cgroup: String,
        /// Whether descendants are removed as well.
        recursive: bool,
    },
    /// Change a cgroup's owner.
    Chown {
        /// Controller name.
        controller: String,
        /// Cgroup path under the controller.
        cgroup: String,
        /// New owning user id.
        uid: u32,
        /// New owning group id.
        gid: u32,
    },
    /// Change the permission bits of a cgroup or control file path.
    Chmod {
        /// Controller name.
        controller: String,
        /// Cgroup path, optionally extended by a control file name.
        path: String,
        /// New permission bits.
        mode: u32,
    },
    /// Move a process into a cgroup.
    MovePid {
        /// Controller name.
        controller: String,
        /// Destination cgroup path.
        cgroup: String,
        /// Process id to move.
        pid: i32,
    },
    /// Move a process to an absolute cgroup path, `all` controllers allowed.
    MovePidAbs {
        /// Controller name, or `all`.
        controller: String,
        /// Absolute destination cgroup path.
        cgroup: String,
        /// Process id to move.
        pid: i32,
    },
}

impl Request {
    /// Wire method name, used in diagnostics.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Request::ApiVersion => "api_version",
            Request::ListControllers => "list_controllers",
            Request::ListKeys { .. } => "list_keys",
            Request::ListChildren { .. } => "list_children",
            Request::GetPidCgroup { .. } => "get_pid_cgroup",
            Request::GetValue { .. } => "get_value",
            Request::SetValue { .. } => "set_value",
            Request::Create { .. } => "create",
            Request::Remove { .. } => "remove",
            Request::Chown { .. } => "chown",
            Request::Chmod { .. } => "chmod",
            Request::MovePid { .. } => "move_pid",
            Request::MovePidAbs { .. } => "move_pid_abs",
        }
    }
}

/// A single manager response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the call succeeded on the manager side.
    pub ok: bool,
    /// Failure detail, present when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result payload, present for calls that return data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    /// Build a success frame carrying `result`.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            error: None,
            result: Some(result),
        }
    }

    /// Build a success frame with no payload.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            error: None,
            result: None,
        }
    }

    /// Build a failure frame carrying `message`.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            result: None,
        }
    }
}

/// Encode one frame as a newline-terminated JSON line.
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one JSON line into a frame, ignoring the trailing newline.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_op() {
        let frame = Request::ListKeys {
            controller: "freezer".to_owned(),
            cgroup: "jobs".to_owned(),
        };
        let encoded = encode_line(&frame).expect("encode frame");
        let text = String::from_utf8(encoded).expect("utf8 frame");
        assert_eq!(
            text,
            "{\"op\":\"list_keys\",\"controller\":\"freezer\",\"cgroup\":\"jobs\"}\n"
        );
    }

    #[test]
    fn create_carries_no_credentials() {
        let frame = Request::Create {
            controller: "freezer".to_owned(),
            cgroup: "jobs/batch".to_owned(),
        };
        let encoded = encode_line(&frame).expect("encode frame");
        let value: Value = serde_json::from_slice(&encoded).expect("reparse frame");
        assert!(value.get("uid").is_none());
        assert!(value.get("gid").is_none());
    }

    #[test]
    fn responses_accept_missing_optional_fields() {
        let ok: Response = decode_line("{\"ok\":true}\n").expect("decode ok");
        assert!(ok.ok);
        assert!(ok.error.is_none());
        assert!(ok.result.is_none());

        let err: Response =
            decode_line("{\"ok\":false,\"error\":\"no such cgroup\"}").expect("decode err");
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("no such cgroup"));
    }

    #[test]
    fn response_payloads_round_trip() {
        let frame = Response::ok(json!(["freezer", "memory"]));
        let encoded = encode_line(&frame).expect("encode frame");
        let decoded: Response =
            decode_line(std::str::from_utf8(&encoded).expect("utf8 frame")).expect("decode frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_ops_fail_to_decode() {
        let result: Result<Request, _> = decode_line("{\"op\":\"reboot\"}");
        assert!(result.is_err());
    }

    #[test]
    fn method_names_match_the_wire_tag() {
        let frame = Request::MovePidAbs {
            controller: "all".to_owned(),
            cgroup: "/".to_owned(),
            pid: 1,
        };
        let encoded = encode_line(&frame).expect("encode frame");
        let value: Value = serde_json::from_slice(&encoded).expect("reparse frame");
        assert_eq!(value.get("op").and_then(Value::as_str), Some(frame.method()));
    }
}
