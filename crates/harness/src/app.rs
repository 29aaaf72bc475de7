//! Building the app under test

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::process::{CommandSpec, OutputRule, ProcessOutcome, ProcessSupervisor, RuleSet, RunningProcess};
use crate::toolchain::ToolchainVariant;

const TIAPP: &str = "tiapp.xml";

/// Mobile OS family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    /// Name used by the build CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" | "iphone" | "ipad" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            _ => Err(HarnessError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// Point `tiapp.xml` at `sdk` and return the app name
fn prepare_tiapp(dir: &Path, sdk: &str) -> HarnessResult<String> {
    let path = dir.join(TIAPP);
    let content = std::fs::read_to_string(&path)?;

    let name = read_tag(&content, "name")?
        .ok_or_else(|| HarnessError::InvalidConfig(format!("no <name> in {}", path.display())))?;

    let sdk_tag = Regex::new(r"<sdk-version>[^<]*</sdk-version>")?;
    let replacement = format!("<sdk-version>{}</sdk-version>", sdk);
    let updated = if sdk_tag.is_match(&content) {
        sdk_tag
            .replace(&content, regex::NoExpand(&replacement))
            .into_owned()
    } else {
        match content.rfind("</ti:app>") {
            Some(idx) => format!("{}    {}\n{}", &content[..idx], replacement, &content[idx..]),
            None => {
                return Err(HarnessError::InvalidConfig(format!(
                    "{} has no <ti:app> root",
                    path.display()
                )))
            }
        }
    };

    debug!("Setting {} SDK to {}", TIAPP, sdk);
    std::fs::write(&path, updated)?;
    Ok(name)
}

fn read_tag(content: &str, tag: &str) -> HarnessResult<Option<String>> {
    let re = Regex::new(&format!(r"<{0}>\s*([^<]*?)\s*</{0}>", regex::escape(tag)))?;
    Ok(re.captures(content).map(|caps| caps[1].to_string()))
}

/// SDK version written in the project's `tiapp.xml`
pub fn project_sdk(dir: &Path) -> HarnessResult<Option<String>> {
    let content = std::fs::read_to_string(dir.join(TIAPP))?;
    read_tag(&content, "sdk-version")
}

/// Build the app for `platform` against `sdk` and return the built package
///
/// The CLI can stall on a prompt after reporting an error, so the first
/// `[ERROR]` on stderr kills the build.
pub async fn build_app(
    variant: ToolchainVariant,
    dir: &Path,
    platform: Platform,
    sdk: &str,
    extra_args: &[String],
) -> HarnessResult<PathBuf> {
    let name = prepare_tiapp(dir, sdk)?;
    info!("Building app '{}' for {}", name, platform);

    let action = match variant {
        ToolchainVariant::Appc => "run",
        ToolchainVariant::Titanium => "build",
    };
    let dir_arg = dir.to_string_lossy().into_owned();
    let spec = CommandSpec::new(variant.program())
        .args([action, "-f", "-d", dir_arg.as_str(), "-p", platform.as_str(), "--no-prompt", "--build-only"])
        .args(extra_args.iter().cloned());

    let rules = RuleSet::new().with(OutputRule::fatal_error_marker()?);
    ProcessSupervisor::new(spec).with_rules(rules).run().await?;

    app_path(dir, platform, &name, sdk)
}

/// Where the build leaves the app package
pub fn app_path(dir: &Path, platform: Platform, name: &str, sdk: &str) -> HarnessResult<PathBuf> {
    match platform {
        Platform::Ios => {
            let products = dir.join("build").join("iphone").join("build").join("Products");
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&products)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            entries.sort();
            let product_dir = entries.into_iter().next().ok_or_else(|| {
                HarnessError::InvalidConfig(format!("no build products in {}", products.display()))
            })?;
            Ok(product_dir.join(format!("{}.app", name)))
        }
        Platform::Android => {
            // SDK 9 moved to a gradle build
            if sdk_major(sdk) >= 9 {
                Ok(dir
                    .join("build")
                    .join("android")
                    .join("app")
                    .join("build")
                    .join("outputs")
                    .join("apk")
                    .join("debug")
                    .join("app-debug.apk"))
            } else {
                Ok(dir
                    .join("build")
                    .join("android")
                    .join("bin")
                    .join(format!("{}.apk", name)))
            }
        }
    }
}

/// Leading number of a release (`10.1.0.GA`) or branch (`9_0_X`)
fn sdk_major(sdk: &str) -> u32 {
    let digits: String = sdk.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// How a `run_cli` call ended
#[derive(Debug)]
pub enum CliRun {
    Exited(ProcessOutcome),
    /// The ready pattern matched; the process is still running
    Running(RunningProcess),
}

/// Run an arbitrary vendor CLI command
///
/// Without `ready` this waits for exit. With a ready pattern it returns as
/// soon as that pattern shows up, handing back the live process.
pub async fn run_cli(
    variant: ToolchainVariant,
    args: &[String],
    ready: Option<(&str, Duration)>,
) -> HarnessResult<CliRun> {
    let spec = CommandSpec::new(variant.program()).args(args.iter().cloned());
    match ready {
        None => Ok(CliRun::Exited(ProcessSupervisor::new(spec).run().await?)),
        Some((pattern, timeout)) => {
            let rules = RuleSet::new().with(OutputRule::ready(pattern)?);
            let running = ProcessSupervisor::new(spec)
                .with_rules(rules)
                .spawn_until_ready(timeout)
                .await?;
            Ok(CliRun::Running(running))
        }
    }
}
