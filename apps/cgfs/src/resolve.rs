// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse callback paths into controller, cgroup, and key parts.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Callback path parsing into controller, cgroup, and key coordinates.

use crate::state::ControllerSet;

/// Prefix under which the cgroup tree is served inside the mount.
pub const CGROUP_ROOT: &str = "/cgroup";

/// Parsed form of a callback path below the mount root.
///
/// The fields fill in from the front: a path naming a key always names the
/// cgroup it lives in, and a path naming a cgroup always names a
/// controller. The trailing segment lands in `key` even when it turns out
/// to be a child cgroup; classification against live manager state happens
/// later.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualPath {
    /// Controller segment, present for `/cgroup/<controller>` and deeper.
    pub controller: Option<String>,
    /// Parent cgroup of the trailing segment, `/` for top-level entries.
    pub cgroup: Option<String>,
    /// Trailing segment, either a child cgroup or a control key.
    pub key: Option<String>,
}

/// Split `path` into controller, parent cgroup, and trailing segment.
///
/// Returns `None` for anything outside the served tree: paths that do not
/// start with the cgroup prefix, unknown controllers, and empty segments.
#[must_use]
pub fn resolve(path: &str, controllers: &ControllerSet) -> Option<VirtualPath> {
    if path == CGROUP_ROOT {
        return Some(VirtualPath::default());
    }
    let rest = path.strip_prefix("/cgroup/")?;
    if rest.is_empty() {
        return None;
    }

    let mut segments = rest.split('/');
    let controller = segments.next()?;
    if controller.is_empty() || !controllers.contains(controller) {
        return None;
    }

    let tail: Vec<&str> = segments.collect();
    if tail.iter().any(|segment| segment.is_empty()) {
        return None;
    }
    match tail.split_last() {
        None => Some(VirtualPath {
            controller: Some(controller.to_owned()),
            cgroup: None,
            key: None,
        }),
        Some((leaf, parents)) => {
            let cgroup = if parents.is_empty() {
                "/".to_owned()
            } else {
                parents.join("/")
            };
            Some(VirtualPath {
                controller: Some(controller.to_owned()),
                cgroup: Some(cgroup),
                key: Some((*leaf).to_owned()),
            })
        }
    }
}

/// Join a parent cgroup path (`/` for the controller root) with a child
/// segment, producing the manager-side path of the child.
#[must_use]
pub fn join_cgroup(parent: &str, child: &str) -> String {
    if parent == "/" || parent.is_empty() {
        child.to_owned()
    } else {
        format!("{parent}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controllers() -> ControllerSet {
        ControllerSet::from_discovered(vec!["freezer".to_owned(), "memory".to_owned()])
    }

    #[test]
    fn cgroup_root_resolves_to_empty_parts() {
        let parsed = resolve("/cgroup", &controllers()).expect("cgroup root");
        assert_eq!(parsed, VirtualPath::default());
    }

    #[test]
    fn controller_paths_carry_only_the_controller() {
        let parsed = resolve("/cgroup/freezer", &controllers()).expect("controller");
        assert_eq!(parsed.controller.as_deref(), Some("freezer"));
        assert_eq!(parsed.cgroup, None);
        assert_eq!(parsed.key, None);
    }

    #[test]
    fn top_level_entries_hang_off_the_root_cgroup() {
        let parsed = resolve("/cgroup/freezer/tasks", &controllers()).expect("top level");
        assert_eq!(parsed.controller.as_deref(), Some("freezer"));
        assert_eq!(parsed.cgroup.as_deref(), Some("/"));
        assert_eq!(parsed.key.as_deref(), Some("tasks"));
    }

    #[test]
    fn nested_paths_split_into_parent_and_leaf() {
        let parsed =
            resolve("/cgroup/memory/jobs/batch/limit_in_bytes", &controllers()).expect("nested");
        assert_eq!(parsed.controller.as_deref(), Some("memory"));
        assert_eq!(parsed.cgroup.as_deref(), Some("jobs/batch"));
        assert_eq!(parsed.key.as_deref(), Some("limit_in_bytes"));
    }

    #[test]
    fn unknown_controllers_do_not_resolve() {
        assert_eq!(resolve("/cgroup/blkio", &controllers()), None);
        assert_eq!(resolve("/cgroup/blkio/tasks", &controllers()), None);
    }

    #[test]
    fn paths_outside_the_served_tree_do_not_resolve() {
        assert_eq!(resolve("/", &controllers()), None);
        assert_eq!(resolve("/proc", &controllers()), None);
        assert_eq!(resolve("/cgroupelse", &controllers()), None);
        assert_eq!(resolve("/cgroup/", &controllers()), None);
    }

    #[test]
    fn empty_segments_do_not_resolve() {
        assert_eq!(resolve("/cgroup/freezer//tasks", &controllers()), None);
        assert_eq!(resolve("/cgroup/freezer/jobs/", &controllers()), None);
    }

    #[test]
    fn join_treats_the_root_parent_specially() {
        assert_eq!(join_cgroup("/", "jobs"), "jobs");
        assert_eq!(join_cgroup("jobs", "batch"), "jobs/batch");
        assert_eq!(join_cgroup("jobs/batch", "a"), "jobs/batch/a");
    }
}
