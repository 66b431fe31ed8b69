// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Privilege-dropping helper process for cgroup creation.
// Author: Lukas Bower

//! Credential handling for create calls.
//!
//! The manager assigns ownership of a new cgroup from the peer credentials
//! of the socket that submits the create. To create on behalf of an
//! unprivileged caller, the daemon forks a helper that drops to the
//! caller's uid and gid, opens its own connection, and issues the create
//! from there.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::client::Connection;
use crate::wire::Request;

/// Failure of the privilege-dropping create helper.
#[derive(Debug, Error)]
pub enum ChildProcessError {
    /// The helper process could not be spawned.
    #[error("spawning create helper failed: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Waiting for the helper failed outright.
    #[error("waiting for create helper failed: {0}")]
    WaitFailed(#[source] io::Error),

    /// The helper ran but exited with a non-zero status.
    #[error("create helper exited with status {status}")]
    ExitedNonZero {
        /// Exit status reported by the helper.
        status: i32,
    },

    /// The helper was terminated by a signal.
    #[error("create helper killed by signal {signal}")]
    Killed {
        /// Signal number that terminated the helper.
        signal: i32,
    },
}

/// Capability that performs a manager create under dropped credentials.
pub trait CreateRunner: Send + Sync {
    /// Issue the create for `controller`/`cgroup` as `uid`/`gid`.
    fn create_as(
        &self,
        uid: u32,
        gid: u32,
        controller: &str,
        cgroup: &str,
    ) -> Result<(), ChildProcessError>;
}

/// Production runner: fork, drop credentials, call the manager, exit.
pub struct ForkCreateRunner {
    socket: PathBuf,
}

impl ForkCreateRunner {
    /// Build a runner whose helper connects to `socket`.
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

impl CreateRunner for ForkCreateRunner {
    fn create_as(
        &self,
        uid: u32,
        gid: u32,
        controller: &str,
        cgroup: &str,
    ) -> Result<(), ChildProcessError> {
        match unsafe { libc::fork() } {
            -1 => Err(ChildProcessError::SpawnFailed(io::Error::last_os_error())),
            0 => {
                let status = drop_and_create(&self.socket, uid, gid, controller, cgroup);
                unsafe { libc::_exit(status) }
            }
            child => wait_for_child(child),
        }
    }
}

/// Body of the forked helper. The supplementary group list must be cleared
/// before the gid switch, and the gid switch must come before the uid
/// switch; once the uid is dropped the process can no longer change either.
fn drop_and_create(socket: &Path, uid: u32, gid: u32, controller: &str, cgroup: &str) -> i32 {
    if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
        return 1;
    }
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return 1;
    }
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return 1;
    }
    let Ok(mut connection) = Connection::open(socket) else {
        return 1;
    };
    let request = Request::Create {
        controller: controller.to_owned(),
        cgroup: cgroup.to_owned(),
    };
    match connection.call(&request) {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

/// Reap the helper, retrying interrupted waits. Anything but a clean zero
/// exit is an error.
fn wait_for_child(child: libc::pid_t) -> Result<(), ChildProcessError> {
    let mut status: libc::c_int = 0;
    loop {
        let reaped = unsafe { libc::waitpid(child, &mut status, 0) };
        if reaped == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(ChildProcessError::WaitFailed(err));
        }
        if reaped != child {
            continue;
        }
        break;
    }
    if libc::WIFSIGNALED(status) {
        return Err(ChildProcessError::Killed {
            signal: libc::WTERMSIG(status),
        });
    }
    if !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
        return Err(ChildProcessError::ExitedNonZero {
            status: libc::WEXITSTATUS(status),
        });
    }
    Ok(())
}
