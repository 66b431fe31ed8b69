// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library surface of the permission-filtered cgroup filesystem.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Permission-filtered projection of the cgroup hierarchy over FUSE.
//!
//! The daemon mediates between unprivileged processes and the privileged
//! cgroup manager. Callback paths are parsed into controller, cgroup, and
//! key coordinates ([`resolve`]), access is decided per request from
//! freshly fetched manager metadata ([`access`]), and directory listings
//! and attributes are projected from live manager listings ([`fs`]).
//! Nothing fetched from the manager is reused across requests, so a
//! decision can never be based on ownership or membership that has since
//! changed.

pub mod access;
pub mod fs;
pub mod resolve;
pub mod state;
