// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-request access decisions from fresh manager metadata.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Access control for projected cgroup entries.
//!
//! Every decision is made from state fetched within the deciding call and
//! is never stored. Two gates apply: the caller's own cgroup must be an
//! ancestor of the target cgroup, and the permission bits of the addressed
//! control key must grant the requested access to the caller's identity
//! class. Both gates must pass; neither is skipped for any caller.

use cgm_client::{CgroupKey, CgroupManager, RpcError};
use log::debug;

/// Control key consulted when a whole cgroup is the target of a decision.
pub const MEMBERSHIP_KEY: &str = "tasks";

/// Caller credentials attached to one filesystem request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Process id of the requesting process.
    pub pid: i32,
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
}

/// Access being requested against a cgroup or control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read the target's contents or listing.
    Read,
    /// Mutate the target.
    Write,
    /// Descend through the target directory.
    Traverse,
}

/// Outcome of one access evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The caller may proceed.
    Allow,
    /// The caller is refused.
    Deny,
}

impl AccessDecision {
    /// True when the decision grants access.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Whether `caller_uid` counts as privileged over an entry owned by
/// `owner_uid`.
// TODO: map through the caller's user namespace before comparing.
#[must_use]
pub fn is_privileged_over(caller_uid: u32, owner_uid: u32) -> bool {
    caller_uid == owner_uid
}

/// Evaluate the owner, group, or other bits of `key` for `caller`.
#[must_use]
pub fn mode_grants(key: &CgroupKey, caller: &CallerIdentity, requested: Mode) -> bool {
    let shift = if is_privileged_over(caller.uid, key.uid) {
        6
    } else if caller.gid == key.gid {
        3
    } else {
        0
    };
    let bit = match requested {
        Mode::Read => 0o4,
        Mode::Write => 0o2,
        Mode::Traverse => 0o1,
    };
    (key.mode >> shift) & bit != 0
}

/// Normalize a cgroup path to its `/`-rooted form. The manager reports
/// paths both with and without a leading slash.
fn normalize(cgroup: &str) -> String {
    let trimmed = cgroup.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// True when `target` sits at or below `own_cgroup`. The comparison is
/// segment aware, so `/a` does not cover `/ab`.
#[must_use]
pub fn within_subtree(own_cgroup: &str, target: &str) -> bool {
    let own = normalize(own_cgroup);
    let target = normalize(target);
    if own == "/" {
        return true;
    }
    target == own
        || target
            .strip_prefix(&own)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Decide whether `caller` may perform `requested` against
/// `target_cgroup`, or against `file` within it when one is named.
///
/// The caller's own cgroup and the target's key listing are both fetched
/// inside this call. When no file is named the membership key stands in
/// for the cgroup itself, so a cgroup without one is never accessible.
pub fn may_access<M: CgroupManager + ?Sized>(
    manager: &M,
    caller: &CallerIdentity,
    controller: &str,
    target_cgroup: &str,
    file: Option<&str>,
    requested: Mode,
) -> Result<AccessDecision, RpcError> {
    let own = manager.get_pid_cgroup(caller.pid, controller)?;
    if !within_subtree(&own, target_cgroup) {
        debug!(
            "[cgfs] deny {controller}:{target_cgroup}: pid {} confined to {own}",
            caller.pid
        );
        return Ok(AccessDecision::Deny);
    }

    let wanted = file.unwrap_or(MEMBERSHIP_KEY);
    let keys = manager.list_keys(controller, target_cgroup)?;
    let Some(key) = keys.iter().find(|key| key.name == wanted) else {
        return Ok(AccessDecision::Deny);
    };
    if mode_grants(key, caller, requested) {
        Ok(AccessDecision::Allow)
    } else {
        debug!(
            "[cgfs] deny {controller}:{target_cgroup} {wanted}: mode {:o} refuses uid {} gid {}",
            key.mode, caller.uid, caller.gid
        );
        Ok(AccessDecision::Deny)
    }
}
