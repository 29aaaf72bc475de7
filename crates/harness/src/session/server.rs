//! Automation server management - spawning and stopping Appium

use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::config::ServerConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::process::{CommandSpec, OutputRule, ProcessSupervisor, RuleSet, RunningProcess};

/// Only servers on this machine are supported
pub const ALLOWED_HOSTS: [&str; 3] = ["localhost", "0.0.0.0", "127.0.0.1"];

/// Reject anything that isn't a loopback-class address
pub fn check_host(host: &str) -> HarnessResult<()> {
    if ALLOWED_HOSTS.contains(&host) {
        Ok(())
    } else {
        Err(HarnessError::RemoteServerNotSupported(host.to_string()))
    }
}

/// Where a server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl ServerEndpoint {
    /// Base URL for WebDriver requests
    pub fn url(&self) -> String {
        // A wildcard bind is reached through loopback
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!(
            "http://{}:{}{}",
            host,
            self.port,
            self.base_path.trim_end_matches('/')
        )
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Handle to a running server process
#[derive(Debug)]
pub struct ServerHandle {
    process: RunningProcess,
    endpoint: ServerEndpoint,
}

impl ServerHandle {
    /// Spawn the server and wait for its "started on" banner
    pub async fn spawn(config: &ServerConfig, host: &str, port: u16) -> HarnessResult<Self> {
        check_host(host)?;

        let endpoint = ServerEndpoint {
            host: host.to_string(),
            port,
            base_path: config.base_path.clone(),
        };
        info!("Starting Appium server on {}", endpoint);

        let port_arg = port.to_string();
        let spec = CommandSpec::new(&config.binary)
            .args(config.args.iter().cloned())
            .args(["--log-no-colors", "-a", host, "-p", port_arg.as_str()]);

        let banner = format!(
            r"started on (?:https?://)?{}:{}\b",
            regex::escape(host),
            port
        );
        let rules = RuleSet::new().with(OutputRule::ready(&banner)?);

        let process = ProcessSupervisor::new(spec)
            .with_rules(rules)
            .spawn_until_ready(config.startup_timeout())
            .await?;

        info!("Appium server is up at {}", endpoint.url());
        Ok(Self { process, endpoint })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Stop the server
    pub async fn stop(mut self, grace: Duration) -> HarnessResult<()> {
        self.process.stop(grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("localhost" ; "localhost")]
    #[test_case("0.0.0.0" ; "wildcard")]
    #[test_case("127.0.0.1" ; "loopback")]
    fn test_allowed_hosts(host: &str) {
        assert!(check_host(host).is_ok());
    }

    #[test_case("8.8.8.8" ; "public address")]
    #[test_case("appium.example.com" ; "remote name")]
    #[test_case("127.0.0.2" ; "other loopback")]
    fn test_rejected_hosts(host: &str) {
        assert!(matches!(
            check_host(host),
            Err(HarnessError::RemoteServerNotSupported(_))
        ));
    }

    #[test]
    fn test_endpoint_url() {
        let endpoint = ServerEndpoint {
            host: "0.0.0.0".into(),
            port: 4723,
            base_path: "/wd/hub/".into(),
        };
        assert_eq!(endpoint.url(), "http://127.0.0.1:4723/wd/hub");
        assert_eq!(endpoint.to_string(), "0.0.0.0:4723");
    }

    #[tokio::test]
    async fn test_remote_host_never_spawns() {
        let config = ServerConfig {
            binary: "/nonexistent/appium".into(),
            ..Default::default()
        };
        // A spawn attempt would surface as ProcessSpawnFailed
        let err = ServerHandle::spawn(&config, "8.8.8.8", 4723).await.unwrap_err();
        assert!(matches!(err, HarnessError::RemoteServerNotSupported(_)));
    }
}
