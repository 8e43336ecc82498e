//! Minimum-build and core-resource requirements
//!
//! [`check`] is pure: it never prompts and never blocks. Callers decide what an
//! [`Unmet`] result means (usually a yes/no prompt through the shell).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Requirement attached to a bundle or a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionRequirement {
    /// Lowest host build number that can run this
    #[serde(default)]
    pub min_build: Option<u32>,

    /// Core resource sets that must be installed
    #[serde(default)]
    pub requires: BTreeSet<String>,
}

impl VersionRequirement {
    pub fn is_empty(&self) -> bool {
        self.min_build.is_none() && self.requires.is_empty()
    }
}

/// Why a requirement is not met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmet {
    /// `(required, actual)` when the host build is too old
    pub build: Option<(u32, u32)>,
    /// Required core resources the host does not have, sorted
    pub missing_resources: Vec<String>,
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some((required, actual)) = self.build {
            parts.push(format!("requires build {required} (running {actual})"));
        }
        if !self.missing_resources.is_empty() {
            parts.push(format!(
                "missing core resources: {}",
                self.missing_resources.join(", ")
            ));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Result of [`check`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Satisfied,
    Unsatisfied(Unmet),
}

impl GateOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, GateOutcome::Satisfied)
    }
}

/// Compare a requirement against the running host.
pub fn check(
    requirement: &VersionRequirement,
    host_build: u32,
    installed_resources: &BTreeSet<String>,
) -> GateOutcome {
    let build = requirement
        .min_build
        .filter(|&min| min > host_build)
        .map(|min| (min, host_build));

    let missing_resources: Vec<String> = requirement
        .requires
        .difference(installed_resources)
        .cloned()
        .collect();

    if build.is_none() && missing_resources.is_empty() {
        GateOutcome::Satisfied
    } else {
        GateOutcome::Unsatisfied(Unmet {
            build,
            missing_resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_requirement_is_satisfied() {
        let req = VersionRequirement::default();
        assert!(req.is_empty());
        assert!(check(&req, 1, &BTreeSet::new()).is_satisfied());
    }

    #[test]
    fn test_equal_build_is_satisfied() {
        let req = VersionRequirement {
            min_build: Some(3000),
            ..Default::default()
        };
        assert!(check(&req, 3000, &BTreeSet::new()).is_satisfied());
    }

    #[test]
    fn test_old_host_build_reports_both_numbers() {
        let req = VersionRequirement {
            min_build: Some(4000),
            ..Default::default()
        };
        match check(&req, 3107, &BTreeSet::new()) {
            GateOutcome::Unsatisfied(unmet) => {
                assert_eq!(unmet.build, Some((4000, 3107)));
                assert!(unmet.missing_resources.is_empty());
                assert!(unmet.to_string().contains("requires build 4000"));
            }
            GateOutcome::Satisfied => panic!("expected unmet build"),
        }
    }

    #[test]
    fn test_missing_resources_are_listed() {
        let req = VersionRequirement {
            min_build: None,
            requires: resources(&["core-b", "core-a", "core-c"]),
        };
        match check(&req, 3107, &resources(&["core-b"])) {
            GateOutcome::Unsatisfied(unmet) => {
                assert_eq!(unmet.build, None);
                assert_eq!(unmet.missing_resources, vec!["core-a", "core-c"]);
                assert_eq!(
                    unmet.to_string(),
                    "missing core resources: core-a, core-c"
                );
            }
            GateOutcome::Satisfied => panic!("expected missing resources"),
        }
    }

    #[test]
    fn test_both_reasons_combined() {
        let req = VersionRequirement {
            min_build: Some(9999),
            requires: resources(&["core-x"]),
        };
        let outcome = check(&req, 1, &BTreeSet::new());
        let GateOutcome::Unsatisfied(unmet) = outcome else {
            panic!("expected unmet");
        };
        let text = unmet.to_string();
        assert!(text.contains("requires build 9999"));
        assert!(text.contains("core-x"));
    }
}
