// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared data types reported by the cgroup manager.
// Author: Lukas Bower

use serde::{Deserialize, Serialize};

/// One control key of a cgroup, as reported by the manager.
///
/// The mode carries plain permission bits in the low twelve bits; file type
/// bits are not transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupKey {
    /// File name of the control key, for example `tasks`.
    pub name: String,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Permission bits.
    pub mode: u32,
}
