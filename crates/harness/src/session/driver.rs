//! Remote session seam and its WebDriver-over-HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::debug;

use super::capabilities::Capabilities;
use super::server::ServerEndpoint;
use crate::app::Platform;
use crate::error::{HarnessError, HarnessResult};

/// What the server reports about a live session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveCapabilities {
    pub platform_name: Option<String>,
    /// iOS app identity
    pub bundle_id: Option<String>,
    /// Android app identity
    pub app_package: Option<String>,
}

impl LiveCapabilities {
    pub fn from_json(value: &Value) -> Self {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
        Self {
            platform_name: text(value.get("platformName")),
            bundle_id: text(value.get("CFBundleIdentifier")).or_else(|| text(value.get("bundleId"))),
            app_package: text(value.get("appPackage"))
                .or_else(|| text(value.get("desired").and_then(|d| d.get("appPackage")))),
        }
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform_name.as_deref().and_then(|p| p.parse().ok())
    }

    /// Identity used to uninstall the app, when the platform supports it
    pub fn app_identity(&self) -> Option<&str> {
        match self.platform()? {
            Platform::Ios => self.bundle_id.as_deref(),
            Platform::Android => self.app_package.as_deref(),
        }
    }
}

/// One live remote-control session
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    fn session_id(&self) -> &str;

    async fn session_capabilities(&self) -> HarnessResult<LiveCapabilities>;

    async fn close_app(&self) -> HarnessResult<()>;

    async fn remove_app(&self, app_id: &str) -> HarnessResult<()>;

    /// Base64 PNG of the current screen
    async fn take_screenshot(&self) -> HarnessResult<String>;

    async fn quit(&self) -> HarnessResult<()>;
}

/// Opens sessions against a running server
#[async_trait]
pub trait DriverConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        capabilities: &Capabilities,
    ) -> HarnessResult<Box<dyn AutomationDriver>>;
}

/// `DriverConnector` speaking the WebDriver HTTP protocol
#[derive(Debug, Clone)]
pub struct WebDriverConnector {
    client: Client,
}

impl WebDriverConnector {
    pub fn new(request_timeout: Duration) -> HarnessResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DriverConnector for WebDriverConnector {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        capabilities: &Capabilities,
    ) -> HarnessResult<Box<dyn AutomationDriver>> {
        let url = format!("{}/session", endpoint.url());
        debug!("Creating session at {}", url);

        let reply = send(self.client.post(&url).json(&capabilities.session_request())).await?;
        let id = session_id(&reply).ok_or_else(|| HarnessError::WebDriver {
            status: 200,
            message: format!("no session id in reply: {}", reply),
        })?;

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/{}", url, id),
            id,
        }))
    }
}

/// Session id from either a W3C or a legacy new-session reply
fn session_id(reply: &Value) -> Option<String> {
    reply
        .get("value")
        .and_then(|v| v.get("sessionId"))
        .or_else(|| reply.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Send a request and unwrap the protocol envelope
async fn send(request: RequestBuilder) -> HarnessResult<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    let parsed: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };

    if !status.is_success() {
        let message = parsed
            .get("value")
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| parsed.to_string());
        return Err(HarnessError::WebDriver {
            status: status.as_u16(),
            message,
        });
    }
    Ok(parsed)
}

fn unwrap_value(reply: Value) -> Value {
    match reply {
        Value::Object(mut map) if map.contains_key("value") => map.remove("value").unwrap_or(Value::Null),
        other => other,
    }
}

/// A session opened by `WebDriverConnector`
#[derive(Debug, Clone)]
pub struct WebDriverSession {
    client: Client,
    base: String,
    id: String,
}

#[async_trait]
impl AutomationDriver for WebDriverSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn session_capabilities(&self) -> HarnessResult<LiveCapabilities> {
        let reply = send(self.client.get(&self.base)).await?;
        Ok(LiveCapabilities::from_json(&unwrap_value(reply)))
    }

    async fn close_app(&self) -> HarnessResult<()> {
        let url = format!("{}/appium/app/close", self.base);
        send(self.client.post(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn remove_app(&self, app_id: &str) -> HarnessResult<()> {
        let url = format!("{}/appium/device/remove_app", self.base);
        send(self.client.post(url).json(&json!({ "appId": app_id, "bundleId": app_id }))).await?;
        Ok(())
    }

    async fn take_screenshot(&self) -> HarnessResult<String> {
        let url = format!("{}/screenshot", self.base);
        let reply = unwrap_value(send(self.client.get(url)).await?);
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HarnessError::WebDriver {
                status: 200,
                message: "screenshot reply wasn't a string".to_string(),
            })
    }

    async fn quit(&self) -> HarnessResult<()> {
        send(self.client.delete(&self.base)).await?;
        Ok(())
    }
}
