//! SDK and CLI installation

use tracing::{debug, info, warn};

use super::cli::ToolchainCli;
use super::version::{self, Catalog, ToolchainVersion, MASTER, NEXT};
use super::Credentials;
use crate::config::ToolchainConfig;
use crate::error::{HarnessError, HarnessResult};

/// Phrases the CLI prints when a login didn't take
const LOGIN_FAILURES: [&str; 2] = ["Login required to continue", "Invalid username or password"];

/// Drives SDK and CLI provisioning through a `ToolchainCli`
pub struct ToolchainInstaller<C> {
    cli: C,
}

impl<C: ToolchainCli> ToolchainInstaller<C> {
    pub fn new(cli: C) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &C {
        &self.cli
    }

    /// Resolve an identifier to a concrete build, asking the CLI only for
    /// the listings that identifier needs
    pub async fn resolve_version(&self, identifier: &str) -> HarnessResult<String> {
        let version = ToolchainVersion::classify(identifier)?;
        let mut catalog = Catalog::default();

        match &version {
            ToolchainVersion::Latest | ToolchainVersion::Release(_) => {
                catalog.releases = self.cli.releases().await?;
            }
            ToolchainVersion::PreRelease { branch, .. } => {
                catalog.branches = self.cli.branches().await?;
                let searched: Vec<&str> = if catalog.branches.contains(branch) {
                    vec![branch.as_str()]
                } else {
                    vec![MASTER, NEXT]
                };
                for name in searched {
                    let builds = self.cli.builds(name).await?;
                    catalog.builds.insert(name.to_string(), builds);
                }
            }
            ToolchainVersion::Branch(branch) => {
                catalog.branches = self.cli.branches().await?;
                if catalog.branches.contains(branch) {
                    let builds = self.cli.builds(branch).await?;
                    catalog.builds.insert(branch.clone(), builds);
                }
            }
        }

        let resolved = version::resolve(&version, &catalog)?;
        debug!("Resolved SDK {} to {}", version, resolved);
        Ok(resolved)
    }

    /// Install a concrete build and make it the selected SDK
    ///
    /// Nothing is downloaded when the build is already present and `force`
    /// is off; the build is still selected.
    pub async fn install(&self, build: &str, force: bool) -> HarnessResult<String> {
        let installed = self.cli.installed_sdks().await?;

        let selected = if installed.contains(build) && !force {
            info!("SDK {} is already installed", build);
            build.to_string()
        } else {
            let reported = self.cli.install_sdk(build, force).await?;
            match reported {
                Some(reported) if reported != build => {
                    warn!("Asked for SDK {} but the CLI installed {}", build, reported);
                    reported
                }
                _ => build.to_string(),
            }
        };

        self.cli.select_sdk(&selected).await?;
        info!("Selected SDK {}", selected);
        Ok(selected)
    }

    /// Resolve then install
    pub async fn install_sdk(&self, identifier: &str, force: bool) -> HarnessResult<String> {
        let build = self.resolve_version(identifier).await?;
        self.install(&build, force).await
    }

    /// Log out, switch environment and log back in
    pub async fn login(&self, credentials: &Credentials, environment: &str) -> HarnessResult<()> {
        info!("Logging in to {} as {}", environment, credentials.username);
        self.cli.logout().await?;
        self.cli.set_environment(environment).await?;

        let response = self.cli.login(credentials).await?;
        if let Some(phrase) = LOGIN_FAILURES.iter().find(|p| response.text.contains(*p)) {
            return Err(HarnessError::AuthenticationFailed {
                environment: environment.to_string(),
                reason: phrase.to_string(),
            });
        }
        if response.exit_code != 0 {
            return Err(HarnessError::AuthenticationFailed {
                environment: environment.to_string(),
                reason: format!("login exited with code {}", response.exit_code),
            });
        }
        Ok(())
    }

    /// Activate a CLI version, borrowing it from `fallback` when `primary`
    /// doesn't publish it
    ///
    /// The session always ends logged in to `primary`, whether or not the
    /// fallback lookup succeeded. Returns the version that ended up active.
    pub async fn install_cli(
        &self,
        requested: &str,
        credentials: &Credentials,
        primary: &str,
        fallback: &str,
    ) -> HarnessResult<String> {
        match self.cli.install_cli(requested).await {
            Ok(()) => return Ok(requested.to_string()),
            Err(HarnessError::CliVersionNotFound(_)) => {
                info!(
                    "CLI {} isn't published in {}, trying {}",
                    requested, primary, fallback
                );
            }
            Err(e) => return Err(e),
        }

        // `login` logs out first, so a refused fallback login still needs the way back
        let picked = match self.login(credentials, fallback).await {
            Ok(()) => self.install_cli_from_catalog(requested).await,
            Err(e) => Err(e),
        };

        info!("Returning to the {} environment", primary);
        let restored = self.login(credentials, primary).await;

        match (picked, restored) {
            (Ok(version), Ok(())) => Ok(version),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                warn!("Also failed to log back in to {}: {}", primary, restore);
                Err(e)
            }
        }
    }

    async fn install_cli_from_catalog(&self, requested: &str) -> HarnessResult<String> {
        let catalog = self.cli.cli_catalog().await?;
        let version = catalog
            .versions
            .iter()
            .find(|v| v.contains(requested))
            .cloned()
            .ok_or_else(|| HarnessError::NoCliVersionFound(requested.to_string()))?;

        if catalog.installed.contains(&version) {
            self.cli.select_cli(&version).await?;
        } else {
            self.cli.install_cli(&version).await?;
        }
        info!("Using CLI {}", version);
        Ok(version)
    }

    /// Bring the machine to the configured toolchain; returns the selected SDK
    pub async fn setup(&self, config: &ToolchainConfig) -> HarnessResult<String> {
        if config.variant != self.cli.variant() {
            return Err(HarnessError::InvalidConfig(format!(
                "configured for {} but driving {}",
                config.variant,
                self.cli.variant()
            )));
        }

        if config.variant.has_account() {
            let credentials = config.credentials.as_ref().ok_or_else(|| {
                HarnessError::InvalidConfig("appc needs credentials".to_string())
            })?;
            self.login(credentials, &config.environment).await?;

            if let Some(cli) = &config.cli {
                self.install_cli(cli, credentials, &config.environment, &config.fallback_environment)
                    .await?;
            }
        } else if config.cli.is_some() {
            warn!("Ignoring CLI version, {} has no swappable CLI", config.variant);
        }

        self.install_sdk(&config.sdk, config.force).await
    }
}
