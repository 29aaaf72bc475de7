//! Desired capabilities for a new automation session

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::Platform;

/// Idle time before the server recycles a session, in seconds
pub const DEFAULT_NEW_COMMAND_TIMEOUT: u64 = 60 * 10;

pub const DEFAULT_ANDROID_READY_TIMEOUT: u64 = 60;

pub const XCUITEST: &str = "XCUITest";
pub const UIAUTOMATOR2: &str = "UiAutomator2";

/// W3C capability names that don't take the `appium:` vendor prefix
const W3C_STANDARD: [&str; 9] = [
    "platformName",
    "browserName",
    "browserVersion",
    "acceptInsecureCerts",
    "pageLoadStrategy",
    "proxy",
    "setWindowRect",
    "timeouts",
    "unhandledPromptBehavior",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IosCapabilities {
    pub device_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,

    /// Path to the built `.app`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_command_timeout: Option<u64>,

    /// Anything else, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidCapabilities {
    pub device_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,

    /// Path to the built `.apk`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_activity: Option<String>,

    /// Emulator to boot when no device is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avd: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_ready_timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_command_timeout: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Desired capabilities, one shape per platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platformName")]
pub enum Capabilities {
    #[serde(rename = "iOS")]
    Ios(IosCapabilities),
    #[serde(rename = "Android")]
    Android(AndroidCapabilities),
}

impl Capabilities {
    pub fn platform(&self) -> Platform {
        match self {
            Capabilities::Ios(_) => Platform::Ios,
            Capabilities::Android(_) => Platform::Android,
        }
    }

    /// Fill in whatever the caller left unset
    pub fn with_defaults(mut self) -> Self {
        match &mut self {
            Capabilities::Ios(caps) => {
                caps.automation_name.get_or_insert_with(|| XCUITEST.to_string());
                caps.new_command_timeout.get_or_insert(DEFAULT_NEW_COMMAND_TIMEOUT);
            }
            Capabilities::Android(caps) => {
                caps.automation_name.get_or_insert_with(|| UIAUTOMATOR2.to_string());
                caps.device_ready_timeout.get_or_insert(DEFAULT_ANDROID_READY_TIMEOUT);
                caps.new_command_timeout.get_or_insert(DEFAULT_NEW_COMMAND_TIMEOUT);
            }
        }
        self
    }

    /// Flat JSON object, `platformName` included
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Body for a new-session request, in both protocol dialects
    pub fn session_request(&self) -> Value {
        let desired = self.to_json();
        let mut always_match = Map::new();
        if let Value::Object(map) = &desired {
            for (key, value) in map {
                let key = if W3C_STANDARD.contains(&key.as_str()) || key.contains(':') {
                    key.clone()
                } else {
                    format!("appium:{}", key)
                };
                always_match.insert(key, value.clone());
            }
        }

        serde_json::json!({
            "desiredCapabilities": desired,
            "capabilities": {
                "alwaysMatch": always_match,
                "firstMatch": [{}],
            },
        })
    }
}
