//! Vendor CLI and SDK provisioning
//!
//! The SDK is driven through one of two CLI families. `appc` wraps the
//! `ti` CLI behind an account login and can swap its own version, while
//! plain `ti` only manages SDKs.

pub mod cli;
pub mod installer;
pub mod version;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::process::CommandSpec;

pub use cli::{CliCatalog, InstalledToolchainSet, LoginResponse, ProcessToolchainCli, ToolchainCli};
pub use installer::ToolchainInstaller;
pub use version::{Catalog, ToolchainVersion};

/// Which CLI family drives the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainVariant {
    Appc,
    Titanium,
}

impl ToolchainVariant {
    pub fn program(&self) -> &'static str {
        match self {
            ToolchainVariant::Appc => "appc",
            ToolchainVariant::Titanium => "ti",
        }
    }

    /// Base command for `ti` subcommands, routed through `appc` when needed
    pub fn ti_command(&self) -> CommandSpec {
        match self {
            ToolchainVariant::Appc => CommandSpec::new("appc").arg("ti"),
            ToolchainVariant::Titanium => CommandSpec::new("ti"),
        }
    }

    /// Whether the variant has an account and a swappable CLI version
    pub fn has_account(&self) -> bool {
        matches!(self, ToolchainVariant::Appc)
    }
}

impl fmt::Display for ToolchainVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Account details for `appc login`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub organisation: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .field("organisation", &self.organisation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_not_in_debug() {
        let creds = Credentials {
            username: "dev@example.com".into(),
            password: "hunter2".into(),
            organisation: "1234".into(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("dev@example.com"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_ti_command_routing() {
        assert_eq!(ToolchainVariant::Appc.ti_command().display(), "appc ti");
        assert_eq!(ToolchainVariant::Titanium.ti_command().display(), "ti");
        assert!(!ToolchainVariant::Titanium.has_account());
    }
}
