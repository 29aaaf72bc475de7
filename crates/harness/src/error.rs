//! Error types for the harness

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("{0} isn't a valid Titanium release or branch")]
    InvalidVersionIdentifier(String),

    #[error("{0} isn't a valid release")]
    UnknownRelease(String),

    #[error("Branch {0} isn't a valid branch")]
    UnknownBranch(String),

    #[error("Can't find SDK {build} in branch {branch}")]
    UnknownBuild { build: String, branch: String },

    #[error("Authentication failed in environment {environment}: {reason}")]
    AuthenticationFailed { environment: String, reason: String },

    #[error("The version specified {0} was not found")]
    CliVersionNotFound(String),

    #[error("No version found for CLI {0}")]
    NoCliVersionFound(String),

    #[error("`{command}` exited with code {code}")]
    ProcessExitNonZero {
        command: String,
        code: i32,
        output: Vec<String>,
    },

    #[error("`{command}` reported an error: {text}")]
    ProcessObservedError {
        command: String,
        text: String,
        captured: BTreeMap<String, String>,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    ProcessSpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No tests found in {0}")]
    NoTestsFound(String),

    #[error("Connecting to an external Appium server is not supported: {0}")]
    RemoteServerNotSupported(String),

    #[error("Appium server not running")]
    ServerNotRunning,

    #[error("Appium server already running on {0}")]
    ServerAlreadyRunning(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("A WebDriver session is already active")]
    SessionAlreadyActive,

    #[error("WebDriver error ({status}): {message}")]
    WebDriver { status: u16, message: String },

    #[error("Test runner failed: {0}")]
    RunnerInvocation(String),

    #[error("Device didn't boot after {attempts} checks")]
    TimeoutWaitingForBoot { attempts: u32 },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Visual regression: {0}")]
    VisualRegression(String),

    #[error("Reference screenshot \"{0}\" doesn't exist")]
    ReferenceNotFound(String),

    #[error("Images didn't meet required threshold, wanted below: {threshold}%, got: {mismatch:.2}%")]
    ScreenshotMismatch { mismatch: f64, threshold: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl HarnessError {
    /// Whether this error came out of a bounded wait rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HarnessError::TimeoutWaitingForBoot { .. } | HarnessError::Timeout(_)
        )
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(HarnessError::TimeoutWaitingForBoot { attempts: 20 }.is_timeout());
        assert!(HarnessError::Timeout("server".into()).is_timeout());
        assert!(!HarnessError::ServerNotRunning.is_timeout());
    }

    #[test]
    fn test_mismatch_message() {
        let err = HarnessError::ScreenshotMismatch {
            mismatch: 1.5,
            threshold: 0.2,
        };
        assert_eq!(
            err.to_string(),
            "Images didn't meet required threshold, wanted below: 0.2%, got: 1.50%"
        );
    }
}
