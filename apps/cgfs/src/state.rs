// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Immutable controller set discovered at mount time.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Controller set fixed at mount time.

/// Ordered set of controller names discovered when the mount was set up.
///
/// The set is fixed for the lifetime of the mount. Controllers mounted or
/// unmounted on the host after startup are not picked up; everything below
/// a controller directory is always fetched fresh instead.
#[derive(Debug, Clone, Default)]
pub struct ControllerSet {
    names: Vec<String>,
}

impl ControllerSet {
    /// Build the set from the startup discovery listing, dropping empty
    /// names and duplicates while preserving the manager's order.
    #[must_use]
    pub fn from_discovered(names: Vec<String>) -> Self {
        let mut kept: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !name.is_empty() && !kept.contains(&name) {
                kept.push(name);
            }
        }
        Self { names: kept }
    }

    /// Whether `name` is a served controller.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    /// Iterate the controller names in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of served controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when discovery returned nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_discovery_order_and_drops_duplicates() {
        let set = ControllerSet::from_discovered(vec![
            "freezer".to_owned(),
            "memory".to_owned(),
            "freezer".to_owned(),
            String::new(),
            "cpuset".to_owned(),
        ]);
        let names: Vec<&str> = set.iter().collect();
        assert_eq!(names, vec!["freezer", "memory", "cpuset"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn membership_is_exact() {
        let set = ControllerSet::from_discovered(vec!["freezer".to_owned()]);
        assert!(set.contains("freezer"));
        assert!(!set.contains("freeze"));
        assert!(!set.contains("memory"));
    }

    #[test]
    fn empty_discovery_yields_an_empty_set() {
        let set = ControllerSet::from_discovered(Vec::new());
        assert!(set.is_empty());
        assert!(!set.contains("freezer"));
    }
}
