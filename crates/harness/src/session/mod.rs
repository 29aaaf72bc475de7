//! Automation server and client session lifecycle
//!
//! At most one server and one session exist per `SessionManager`; every
//! start and stop goes through it.

pub mod capabilities;
pub mod driver;
pub mod server;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{HarnessError, HarnessResult};

pub use capabilities::{AndroidCapabilities, Capabilities, IosCapabilities};
pub use driver::{AutomationDriver, DriverConnector, LiveCapabilities, WebDriverConnector, WebDriverSession};
pub use server::{ServerEndpoint, ServerHandle, ALLOWED_HOSTS};

struct ActiveSession {
    driver: Box<dyn AutomationDriver>,
    capabilities: Capabilities,
}

/// Owns the server handle and the client session
pub struct SessionManager<C> {
    config: ServerConfig,
    connector: C,
    server: Option<ServerHandle>,
    session: Option<ActiveSession>,
}

impl SessionManager<WebDriverConnector> {
    /// Manager talking WebDriver over HTTP
    pub fn webdriver(config: ServerConfig) -> HarnessResult<Self> {
        let connector = WebDriverConnector::new(config.request_timeout())?;
        Ok(Self::new(config, connector))
    }
}

impl<C: DriverConnector> SessionManager<C> {
    pub fn new(config: ServerConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            server: None,
            session: None,
        }
    }

    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    pub fn driver(&self) -> Option<&dyn AutomationDriver> {
        self.session.as_ref().map(|s| s.driver.as_ref())
    }

    /// Capabilities the current session was started with, defaults included
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.session.as_ref().map(|s| &s.capabilities)
    }

    /// Start the server on a loopback-class host and wait until it's up
    pub async fn start_server(&mut self, host: &str, port: u16) -> HarnessResult<&ServerEndpoint> {
        if let Some(server) = &self.server {
            return Err(HarnessError::ServerAlreadyRunning(server.endpoint().to_string()));
        }
        let handle = ServerHandle::spawn(&self.config, host, port).await?;
        Ok(self.server.insert(handle).endpoint())
    }

    /// Start the server at the configured host and port
    pub async fn start_configured_server(&mut self) -> HarnessResult<&ServerEndpoint> {
        let host = self.config.host.clone();
        let port = self.config.port;
        self.start_server(&host, port).await
    }

    pub async fn stop_server(&mut self) -> HarnessResult<()> {
        let server = self.server.take().ok_or(HarnessError::ServerNotRunning)?;
        if self.session.is_some() {
            warn!("Stopping the Appium server under a live session");
        }
        server.stop(self.config.shutdown_grace()).await
    }

    /// Open a session, filling in capability defaults the caller left unset
    pub async fn start_client(&mut self, capabilities: Capabilities) -> HarnessResult<&dyn AutomationDriver> {
        if self.session.is_some() {
            return Err(HarnessError::SessionAlreadyActive);
        }
        let endpoint = self
            .server
            .as_ref()
            .ok_or(HarnessError::ServerNotRunning)?
            .endpoint()
            .clone();

        let capabilities = capabilities.with_defaults();
        info!("Starting {} session on {}", capabilities.platform(), endpoint);
        let driver = self.connector.connect(&endpoint, &capabilities).await?;
        debug!("Session {} established", driver.session_id());

        let active = self.session.insert(ActiveSession {
            driver,
            capabilities,
        });
        Ok(active.driver.as_ref())
    }

    /// Close and uninstall the app, then end the session
    ///
    /// Without a session this does nothing. If any step fails the session
    /// stays in place and the error is returned.
    pub async fn stop_client(&mut self) -> HarnessResult<()> {
        let Some(active) = self.session.as_ref() else {
            debug!("No session to stop");
            return Ok(());
        };
        let driver = active.driver.as_ref();

        let live = driver.session_capabilities().await?;

        debug!("Closing the application");
        driver.close_app().await?;

        match (live.platform(), live.app_identity()) {
            (Some(_), Some(app_id)) => {
                debug!("Removing {} from the device", app_id);
                driver.remove_app(app_id).await?;
            }
            (Some(platform), None) => {
                warn!("{} session reported no app identity, leaving the app installed", platform)
            }
            (None, _) => debug!(
                "Not removing the app from a {} session",
                live.platform_name.as_deref().unwrap_or("unknown")
            ),
        }

        debug!("Exiting the session");
        driver.quit().await?;

        self.session = None;
        Ok(())
    }

    /// Stop the client then the server, skipping whichever isn't running
    pub async fn shutdown(&mut self) -> HarnessResult<()> {
        self.stop_client().await?;
        if self.server.is_some() {
            self.stop_server().await?;
        }
        Ok(())
    }
}
