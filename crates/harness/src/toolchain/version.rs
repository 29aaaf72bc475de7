//! SDK version identifiers and their resolution to installable builds

use std::collections::BTreeMap;
use std::fmt;

use crate::collate::natural_cmp;
use crate::error::{HarnessError, HarnessResult};

pub const MASTER: &str = "master";
pub const NEXT: &str = "next";
pub const LATEST: &str = "latest";

/// A raw SDK identifier, classified by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainVersion {
    /// `X.Y.Z.GA`
    Release(String),
    /// `latest`: the newest known release
    Latest,
    /// `X.Y.Z.vNNNN`, published on branch `X_Y_X`
    PreRelease { build: String, branch: String },
    /// `NN_NN_X`, `master` or `next`: the newest build of that branch
    Branch(String),
}

impl ToolchainVersion {
    pub fn classify(identifier: &str) -> HarnessResult<Self> {
        if identifier == LATEST {
            return Ok(Self::Latest);
        }
        if identifier == MASTER || identifier == NEXT || is_branch_name(identifier) {
            return Ok(Self::Branch(identifier.to_string()));
        }

        let parts: Vec<&str> = identifier.split('.').collect();
        if parts.len() == 4 && parts[..3].iter().all(|p| is_number(p)) {
            if parts[3] == "GA" {
                return Ok(Self::Release(identifier.to_string()));
            }
            if let Some(stamp) = parts[3].strip_prefix('v') {
                if is_number(stamp) {
                    return Ok(Self::PreRelease {
                        build: identifier.to_string(),
                        branch: format!("{}_{}_X", parts[0], parts[1]),
                    });
                }
            }
        }

        Err(HarnessError::InvalidVersionIdentifier(identifier.to_string()))
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release(v) | Self::Branch(v) => f.write_str(v),
            Self::PreRelease { build, .. } => f.write_str(build),
            Self::Latest => f.write_str(LATEST),
        }
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_branch_name(s: &str) -> bool {
    let parts: Vec<&str> = s.split('_').collect();
    parts.len() == 3 && is_number(parts[0]) && is_number(parts[1]) && parts[2] == "X"
}

/// What the SDK distribution currently publishes
///
/// Only the parts needed for one resolution have to be filled in.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub releases: Vec<String>,
    pub branches: Vec<String>,
    pub builds: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    fn builds_of(&self, branch: &str) -> &[String] {
        self.builds.get(branch).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Newest entry under numeric-aware ordering
pub fn newest(versions: &[String]) -> Option<&String> {
    versions.iter().max_by(|a, b| natural_cmp(a, b))
}

/// Resolve a classified identifier against the catalog
///
/// Unknown releases, branches and builds are rejected rather than coerced.
pub fn resolve(version: &ToolchainVersion, catalog: &Catalog) -> HarnessResult<String> {
    match version {
        ToolchainVersion::Latest => newest(&catalog.releases)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownRelease(LATEST.to_string())),

        ToolchainVersion::Release(release) => {
            if catalog.releases.contains(release) {
                Ok(release.clone())
            } else {
                Err(HarnessError::UnknownRelease(release.clone()))
            }
        }

        ToolchainVersion::PreRelease { build, branch } => {
            if catalog.branches.contains(branch) {
                if catalog.builds_of(branch).contains(build) {
                    return Ok(build.clone());
                }
                return Err(HarnessError::UnknownBuild {
                    build: build.clone(),
                    branch: branch.clone(),
                });
            }

            // Builds cut before their release branch exists live on master or next
            for fallback in [MASTER, NEXT] {
                if catalog.builds_of(fallback).contains(build) {
                    return Ok(build.clone());
                }
            }
            Err(HarnessError::UnknownBuild {
                build: build.clone(),
                branch: format!("{}, {} or {}", branch, MASTER, NEXT),
            })
        }

        ToolchainVersion::Branch(branch) => {
            if !catalog.branches.contains(branch) {
                return Err(HarnessError::UnknownBranch(branch.clone()));
            }
            newest(catalog.builds_of(branch))
                .cloned()
                .ok_or_else(|| HarnessError::UnknownBuild {
                    build: LATEST.to_string(),
                    branch: branch.clone(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn catalog() -> Catalog {
        let mut builds = BTreeMap::new();
        builds.insert(
            "9_0_X".to_string(),
            strings(&["9.0.1.v20200210", "9.0.1.v20200301", "9.0.1.v20200115"]),
        );
        builds.insert("master".to_string(), strings(&["9.1.0.v20200401"]));
        builds.insert("next".to_string(), strings(&["10.0.0.v20200501"]));
        Catalog {
            releases: strings(&["8.3.1.GA", "9.0.0.GA", "10.0.0.GA", "9.3.2.GA"]),
            branches: strings(&["9_0_X", "master", "next"]),
            builds,
        }
    }

    #[test_case("9.0.0.GA", ToolchainVersion::Release("9.0.0.GA".into()) ; "release")]
    #[test_case("latest", ToolchainVersion::Latest ; "latest")]
    #[test_case("9.0.1.v20200210", ToolchainVersion::PreRelease { build: "9.0.1.v20200210".into(), branch: "9_0_X".into() } ; "pre-release")]
    #[test_case("9_0_X", ToolchainVersion::Branch("9_0_X".into()) ; "numbered branch")]
    #[test_case("master", ToolchainVersion::Branch("master".into()) ; "master")]
    #[test_case("next", ToolchainVersion::Branch("next".into()) ; "next")]
    fn test_classify(identifier: &str, expected: ToolchainVersion) {
        assert_eq!(ToolchainVersion::classify(identifier).unwrap(), expected);
    }

    #[test_case("9.0.0" ; "missing qualifier")]
    #[test_case("9.0.0.ga" ; "lower case qualifier")]
    #[test_case("9.0.0.RC" ; "unknown qualifier")]
    #[test_case("9.0.0.v" ; "empty timestamp")]
    #[test_case("9_X" ; "short branch")]
    #[test_case("develop" ; "unknown branch word")]
    #[test_case("" ; "empty")]
    fn test_classify_rejects(identifier: &str) {
        assert!(matches!(
            ToolchainVersion::classify(identifier),
            Err(HarnessError::InvalidVersionIdentifier(_))
        ));
    }

    #[test]
    fn test_latest_is_newest_release() {
        let resolved = resolve(&ToolchainVersion::Latest, &catalog()).unwrap();
        assert_eq!(resolved, "10.0.0.GA");
    }

    #[test]
    fn test_release_must_be_known() {
        let cat = catalog();
        assert_eq!(
            resolve(&ToolchainVersion::Release("9.0.0.GA".into()), &cat).unwrap(),
            "9.0.0.GA"
        );
        assert!(matches!(
            resolve(&ToolchainVersion::Release("7.0.0.GA".into()), &cat),
            Err(HarnessError::UnknownRelease(_))
        ));
    }

    #[test]
    fn test_branch_resolves_to_newest_build() {
        let resolved = resolve(&ToolchainVersion::Branch("9_0_X".into()), &catalog()).unwrap();
        assert_eq!(resolved, "9.0.1.v20200301");
    }

    #[test]
    fn test_unknown_branch() {
        assert!(matches!(
            resolve(&ToolchainVersion::Branch("8_0_X".into()), &catalog()),
            Err(HarnessError::UnknownBranch(_))
        ));
    }

    #[test]
    fn test_pre_release_lookup() {
        let cat = catalog();
        let found = ToolchainVersion::classify("9.0.1.v20200115").unwrap();
        assert_eq!(resolve(&found, &cat).unwrap(), "9.0.1.v20200115");

        let missing = ToolchainVersion::classify("9.0.1.v20990101").unwrap();
        assert!(matches!(resolve(&missing, &cat), Err(HarnessError::UnknownBuild { .. })));

        // 9_1_X isn't a branch yet, so master and next are searched
        let on_master = ToolchainVersion::classify("9.1.0.v20200401").unwrap();
        assert_eq!(resolve(&on_master, &cat).unwrap(), "9.1.0.v20200401");
        let on_next = ToolchainVersion::classify("10.0.0.v20200501").unwrap();
        assert_eq!(resolve(&on_next, &cat).unwrap(), "10.0.0.v20200501");
    }
}
