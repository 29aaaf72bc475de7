//! Vendor CLI invocations

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{Credentials, ToolchainVariant};
use crate::error::{HarnessError, HarnessResult};
use crate::process::{CommandSpec, OutputRule, OutputStream, ProcessSupervisor, RuleSet, StreamFilter};

const INSTALLED_PATTERN: &str = r"(\w+\.\w+\.\w+\.\w+).*successfully installed!";
const ALREADY_INSTALLED_PATTERN: &str = r"(\w+\.\w+\.\w+\.\w+).*is already installed!";
const CLI_NOT_FOUND_PHRASE: &str = "was not found";

/// SDKs present on this machine, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledToolchainSet {
    sdks: BTreeMap<String, Option<PathBuf>>,
}

impl InstalledToolchainSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, path: Option<PathBuf>) {
        self.sdks.insert(name.into(), path);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sdks.contains_key(name)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.sdks.get(name).and_then(|p| p.as_deref())
    }

    pub fn len(&self) -> usize {
        self.sdks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sdks.is_empty()
    }

    fn from_listing(listing: &Value) -> Self {
        let mut set = Self::new();
        match listing.get("installed") {
            Some(Value::Object(map)) => {
                for (name, path) in map {
                    set.insert(name.clone(), path.as_str().map(PathBuf::from));
                }
            }
            Some(other) => {
                for name in names(other) {
                    set.insert(name, None);
                }
            }
            None => {}
        }
        set
    }
}

/// CLI versions known to the current environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliCatalog {
    pub versions: Vec<String>,
    pub installed: Vec<String>,
}

/// Raw reply to a login attempt
///
/// The CLI reports some failures with a zero exit code, so the text is
/// kept for the caller to inspect.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub text: String,
    pub exit_code: i32,
}

/// Everything the installer needs from the vendor CLI
#[async_trait]
pub trait ToolchainCli: Send + Sync {
    fn variant(&self) -> ToolchainVariant;

    async fn releases(&self) -> HarnessResult<Vec<String>>;

    async fn branches(&self) -> HarnessResult<Vec<String>>;

    async fn builds(&self, branch: &str) -> HarnessResult<Vec<String>>;

    async fn installed_sdks(&self) -> HarnessResult<InstalledToolchainSet>;

    /// Download and install a build; returns the version the CLI reported
    async fn install_sdk(&self, build: &str, force: bool) -> HarnessResult<Option<String>>;

    async fn select_sdk(&self, build: &str) -> HarnessResult<()>;

    async fn logout(&self) -> HarnessResult<()>;

    async fn set_environment(&self, environment: &str) -> HarnessResult<()>;

    async fn login(&self, credentials: &Credentials) -> HarnessResult<LoginResponse>;

    /// Fetch a CLI version and make it active.
    /// Fails with `CliVersionNotFound` when the environment doesn't publish it.
    async fn install_cli(&self, version: &str) -> HarnessResult<()>;

    /// Activate an already downloaded CLI version
    async fn select_cli(&self, version: &str) -> HarnessResult<()>;

    async fn cli_catalog(&self) -> HarnessResult<CliCatalog>;
}

/// `ToolchainCli` backed by the real `appc` / `ti` executables
#[derive(Debug, Clone)]
pub struct ProcessToolchainCli {
    variant: ToolchainVariant,
}

impl ProcessToolchainCli {
    pub fn new(variant: ToolchainVariant) -> Self {
        Self { variant }
    }

    fn sdk_command(&self) -> CommandSpec {
        self.variant.ti_command().arg("sdk")
    }

    fn appc_command(&self, action: &str) -> HarnessResult<CommandSpec> {
        if !self.variant.has_account() {
            return Err(HarnessError::InvalidConfig(format!(
                "`{}` is only available through appc",
                action
            )));
        }
        Ok(CommandSpec::new("appc"))
    }

    async fn use_cli(&self, version: &str) -> HarnessResult<()> {
        let spec = self.appc_command("use")?.args(["use", version]);
        let rules = RuleSet::new().with(OutputRule::error(
            &format!("The version specified .* {}", CLI_NOT_FOUND_PHRASE),
            StreamFilter::Any,
        )?);

        match ProcessSupervisor::new(spec).with_rules(rules).run().await {
            Ok(_) => Ok(()),
            Err(HarnessError::ProcessObservedError { .. }) => {
                Err(HarnessError::CliVersionNotFound(version.to_string()))
            }
            Err(HarnessError::ProcessExitNonZero { output, .. })
                if output.iter().any(|l| l.contains(CLI_NOT_FOUND_PHRASE)) =>
            {
                Err(HarnessError::CliVersionNotFound(version.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ToolchainCli for ProcessToolchainCli {
    fn variant(&self) -> ToolchainVariant {
        self.variant
    }

    async fn releases(&self) -> HarnessResult<Vec<String>> {
        let listing: Value = run_json(self.sdk_command().args(["list", "-r", "-o", "json"])).await?;
        Ok(names(listing.get("releases").unwrap_or(&listing)))
    }

    async fn branches(&self) -> HarnessResult<Vec<String>> {
        let listing: Value = run_json(self.sdk_command().args(["list", "-b", "-o", "json"])).await?;
        let mut branches = listing.get("branches").unwrap_or(&listing);
        // Newer CLIs nest the list next to the default branch name
        if let Some(nested) = branches.get("branches") {
            branches = nested;
        }
        Ok(names(branches))
    }

    async fn builds(&self, branch: &str) -> HarnessResult<Vec<String>> {
        let listing: Value =
            run_json(self.sdk_command().args(["list", "--branch", branch, "-o", "json"])).await?;
        Ok(listing.get(branch).map(names).unwrap_or_default())
    }

    async fn installed_sdks(&self) -> HarnessResult<InstalledToolchainSet> {
        let listing: Value = run_json(self.sdk_command().args(["list", "-o", "json"])).await?;
        Ok(InstalledToolchainSet::from_listing(&listing))
    }

    async fn install_sdk(&self, build: &str, force: bool) -> HarnessResult<Option<String>> {
        let mut spec = self.sdk_command().args(["install", build]);
        if force {
            spec = spec.arg("--force");
        }
        let rules = RuleSet::new()
            .with(OutputRule::capture("sdk", INSTALLED_PATTERN, StreamFilter::Stdout)?)
            .with(OutputRule::capture("sdk", ALREADY_INSTALLED_PATTERN, StreamFilter::Stdout)?)
            .with(OutputRule::error_marker()?);

        info!("Installing SDK {}", build);
        let outcome = ProcessSupervisor::new(spec).with_rules(rules).run().await?;
        Ok(outcome.captured("sdk").map(str::to_string))
    }

    async fn select_sdk(&self, build: &str) -> HarnessResult<()> {
        let rules = RuleSet::new().with(OutputRule::error_marker()?);
        ProcessSupervisor::new(self.sdk_command().args(["select", build]))
            .with_rules(rules)
            .run()
            .await?;
        Ok(())
    }

    async fn logout(&self) -> HarnessResult<()> {
        let spec = self.appc_command("logout")?.arg("logout");
        ProcessSupervisor::new(spec).run().await?;
        Ok(())
    }

    async fn set_environment(&self, environment: &str) -> HarnessResult<()> {
        let spec = self
            .appc_command("config")?
            .args(["config", "set", "defaultEnvironment", environment]);
        ProcessSupervisor::new(spec).run().await?;
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> HarnessResult<LoginResponse> {
        let spec = self
            .appc_command("login")?
            .args(["login", "--username", credentials.username.as_str(), "--password"])
            .secret_arg(credentials.password.as_str())
            .args(["-O", credentials.organisation.as_str(), "--no-prompt"]);

        let mut lines = Vec::new();
        let result = ProcessSupervisor::new(spec)
            .run_observed(|_, line| lines.push(line.to_string()))
            .await;

        let exit_code = match result {
            Ok(outcome) => outcome.exit_code,
            Err(HarnessError::ProcessExitNonZero { code, .. }) => code,
            Err(e) => return Err(e),
        };
        Ok(LoginResponse {
            text: lines.join("\n"),
            exit_code,
        })
    }

    async fn install_cli(&self, version: &str) -> HarnessResult<()> {
        info!("Installing CLI version {}", version);
        self.use_cli(version).await
    }

    async fn select_cli(&self, version: &str) -> HarnessResult<()> {
        info!("Selecting installed CLI version {}", version);
        self.use_cli(version).await
    }

    async fn cli_catalog(&self) -> HarnessResult<CliCatalog> {
        let spec = self
            .appc_command("use")?
            .args(["use", "-o", "json", "--prerelease"]);
        run_json(spec).await
    }
}

/// Run a command and parse its stdout as one JSON document
async fn run_json<T: DeserializeOwned>(spec: CommandSpec) -> HarnessResult<T> {
    let rules = RuleSet::new().with(OutputRule::error_marker()?);
    let mut stdout = String::new();
    ProcessSupervisor::new(spec)
        .with_rules(rules)
        .run_observed(|stream, line| {
            if stream == OutputStream::Stdout {
                stdout.push_str(line);
                stdout.push('\n');
            }
        })
        .await?;

    // Skip any banner printed ahead of the document
    let start = stdout.find(|c: char| c == '{' || c == '[').unwrap_or(0);
    debug!("Parsing {} bytes of JSON output", stdout.len() - start);
    Ok(serde_json::from_str(&stdout[start..])?)
}

/// Names out of a listing that is either an array or an object keyed by name
fn names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}
