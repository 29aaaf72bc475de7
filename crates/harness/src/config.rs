//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HarnessResult;
use crate::toolchain::{Credentials, ToolchainVariant};

/// Harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Vendor CLI / SDK setup
    pub toolchain: ToolchainConfig,

    /// Appium server
    pub server: ServerConfig,

    /// External test runner
    pub runner: RunnerConfig,

    /// Emulator boot checks
    pub device: DeviceConfig,

    /// Screenshot comparison
    pub visual: VisualConfig,
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Which CLI family drives the SDK
    pub variant: ToolchainVariant,

    /// Appcelerator CLI version to use (Appc only)
    pub cli: Option<String>,

    /// SDK release, pre-release build or branch
    pub sdk: String,

    /// Environment to log in to
    pub environment: String,

    /// Environment tried when a CLI version is missing from `environment`
    pub fallback_environment: String,

    /// Reinstall the SDK even when it is already present
    pub force: bool,

    /// Account details (Appc only)
    pub credentials: Option<Credentials>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            variant: ToolchainVariant::Appc,
            cli: None,
            sdk: "latest".to_string(),
            environment: "production".to_string(),
            fallback_environment: "preproduction".to_string(),
            force: false,
            credentials: None,
        }
    }
}

/// Appium server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Appium executable
    pub binary: String,

    /// Arguments placed before the generated host/port flags
    pub args: Vec<String>,

    pub host: String,

    pub port: u16,

    /// Base path of the WebDriver endpoint
    pub base_path: String,

    /// How long to wait for the "started on" banner
    pub startup_timeout_secs: u64,

    /// Grace period between SIGTERM and kill on stop
    pub shutdown_grace_ms: u64,

    /// Timeout for individual session requests
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: "appium".to_string(),
            args: Vec::new(),
            host: "localhost".to_string(),
            port: 4723,
            base_path: "/wd/hub".to_string(),
            startup_timeout_secs: 60,
            shutdown_grace_ms: 500,
            request_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `RunnerConfig::reporter` value selecting the harness's own reporter
pub const BUNDLED_REPORTER: &str = "bundled";

/// External test runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Runner executable
    pub command: String,

    /// Arguments before the generated report/file arguments
    pub args: Vec<String>,

    /// Mocha reporter: `bundled` for the harness reporter, any other value
    /// is passed to `--reporter` as is, empty passes no reporter at all
    pub reporter: String,

    /// Environment variable handing the report path to the report writer
    pub report_env: String,

    /// Environment variable handing the suite name to the report writer
    pub report_name_env: String,

    /// Regex a file name must match to count as a test
    pub test_pattern: String,

    /// Directory (under the project root) receiving reports
    pub reports_dir: String,

    /// Abort the whole run after this long; 0 disables the limit
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: ["mocha", "--timeout", "120000", "--slow", "80000"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            reporter: BUNDLED_REPORTER.to_string(),
            report_env: "JUNIT_REPORT_PATH".to_string(),
            report_name_env: "JUNIT_REPORT_NAME".to_string(),
            test_pattern: r".+\.test\.js".to_string(),
            reports_dir: "Reports".to_string(),
            timeout_secs: 2 * 60 * 60,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Emulator boot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Android SDK root; `ANDROID_HOME` when unset
    pub android_home: Option<PathBuf>,

    /// Delay before the first boot check
    pub first_check_ms: u64,

    /// Delay between boot checks
    pub poll_interval_ms: u64,

    /// Checks before giving up
    pub max_polls: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            android_home: None,
            first_check_ms: 10_000,
            poll_interval_ms: 2_000,
            max_polls: 20,
        }
    }
}

impl DeviceConfig {
    pub fn android_home(&self) -> Option<PathBuf> {
        self.android_home
            .clone()
            .or_else(|| std::env::var_os("ANDROID_HOME").map(PathBuf::from))
    }
}

/// Screenshot comparison configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Allowed mismatch, in percent
    pub threshold: f64,

    /// Wait before taking a screenshot
    pub delay_ms: u64,

    /// Directory (under the project root) for test screenshots
    pub screenshot_dir: String,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            threshold: 0.20,
            delay_ms: 2_000,
            screenshot_dir: "Screen_Shots".to_string(),
        }
    }
}
