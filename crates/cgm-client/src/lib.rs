// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client library for the cgroup manager RPC surface.
// Author: Lukas Bower
#![warn(missing_docs)]

//! Synchronous client for the privileged cgroup manager service.
//!
//! Every capability of the manager is one independently fallible call on the
//! [`CgroupManager`] trait. The concrete [`ManagerHandle`] opens a fresh
//! connection per call, verifies the manager's api version, performs the
//! round trip, and tears the connection down again, so no call ever depends
//! on connection state surviving between requests. Cgroup creation is
//! delegated to a helper process that drops to the requesting caller's
//! credentials before talking to the manager ([`privsep`]).

mod client;
mod error;
mod types;
pub mod privsep;
pub mod wire;

pub use client::ManagerHandle;
pub use error::RpcError;
pub use privsep::{ChildProcessError, CreateRunner, ForkCreateRunner};
pub use types::CgroupKey;

/// Well-known unix socket where the cgroup manager listens.
pub const DEFAULT_MANAGER_SOCKET: &str = "/sys/fs/cgroup/cgmanager/sock";

/// Minimum manager api version this client can work with. Older managers
/// cannot enumerate control keys with ownership metadata.
pub const REQUIRED_API_VERSION: i32 = 9;

/// Synchronous facade over the cgroup manager RPC surface.
///
/// Implementations must be shareable across threads. Every method is one
/// self-contained round trip against current manager state; nothing is
/// cached between calls.
pub trait CgroupManager: Send + Sync {
    /// List the names of all mounted controllers.
    fn list_controllers(&self) -> Result<Vec<String>, RpcError>;

    /// List the control keys of `cgroup` with ownership metadata.
    fn list_keys(&self, controller: &str, cgroup: &str) -> Result<Vec<CgroupKey>, RpcError>;

    /// List the names of the direct child cgroups of `cgroup`.
    fn list_children(&self, controller: &str, cgroup: &str) -> Result<Vec<String>, RpcError>;

    /// Report the cgroup that `pid` currently belongs to under `controller`.
    fn get_pid_cgroup(&self, pid: i32, controller: &str) -> Result<String, RpcError>;

    /// Read the current value of `key` in `cgroup`.
    fn get_value(&self, controller: &str, cgroup: &str, key: &str) -> Result<String, RpcError>;

    /// Write `value` to `key` in `cgroup`.
    fn set_value(
        &self,
        controller: &str,
        cgroup: &str,
        key: &str,
        value: &str,
    ) -> Result<(), RpcError>;

    /// Create `cgroup` on behalf of `uid`/`gid`.
    ///
    /// The create RPC is issued by a helper process that has already dropped
    /// to the target credentials, so the manager's own ownership policy sees
    /// the real requester rather than this daemon.
    fn create(&self, controller: &str, cgroup: &str, uid: u32, gid: u32) -> Result<(), RpcError>;

    /// Remove `cgroup` together with its descendants.
    fn remove(&self, controller: &str, cgroup: &str) -> Result<(), RpcError>;

    /// Change the owner of `cgroup`.
    fn chown(&self, controller: &str, cgroup: &str, uid: u32, gid: u32) -> Result<(), RpcError>;

    /// Change the permission bits of a cgroup, or of one `cgroup/file` path.
    fn chmod(&self, controller: &str, path: &str, mode: u32) -> Result<(), RpcError>;

    /// Move `pid` into `cgroup`.
    fn move_pid(&self, controller: &str, cgroup: &str, pid: i32) -> Result<(), RpcError>;

    /// Move the calling process to the root cgroup of every controller.
    fn escape_to_root_cgroup(&self) -> Result<(), RpcError>;
}
