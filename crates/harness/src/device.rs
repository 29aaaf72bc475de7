//! Emulator and simulator control

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::process::{CommandSpec, ProcessSupervisor};

/// Marker printed by `getprop init.svc.bootanim` once boot is over
const BOOT_DONE: &str = "stopped";

/// Result of one boot check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootReading {
    Booted,
    Booting,
}

/// One "has it booted yet" check
#[async_trait]
pub trait BootCheck: Send + Sync {
    /// Errors only when the check itself couldn't run
    async fn check(&self) -> HarnessResult<BootReading>;
}

/// Asks `adb` whether the boot animation has finished
#[derive(Debug, Clone)]
pub struct AdbBootCheck {
    spec: CommandSpec,
}

impl AdbBootCheck {
    /// Check the single running emulator (`adb -e`)
    pub fn emulator() -> Self {
        Self {
            spec: CommandSpec::new("adb").args(["-e", "shell", "getprop", "init.svc.bootanim"]),
        }
    }

    /// Check with a custom command; booted once stdout contains `stopped`
    pub fn with_command(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl BootCheck for AdbBootCheck {
    async fn check(&self) -> HarnessResult<BootReading> {
        match ProcessSupervisor::new(self.spec.clone()).run().await {
            Ok(outcome) if outcome.output.iter().any(|l| l.contains(BOOT_DONE)) => {
                Ok(BootReading::Booted)
            }
            Ok(_) => Ok(BootReading::Booting),
            // adb errors out until the device shows up
            Err(HarnessError::ProcessExitNonZero { output, .. }) => {
                debug!("Boot check failed: {}", output.join(" | "));
                Ok(BootReading::Booting)
            }
            Err(e) => Err(e),
        }
    }
}

/// Bounded polling until a device has booted
#[derive(Debug, Clone)]
pub struct BootWaiter {
    pub first_check: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for BootWaiter {
    fn default() -> Self {
        Self::from_config(&DeviceConfig::default())
    }
}

impl BootWaiter {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            first_check: Duration::from_millis(config.first_check_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        }
    }

    /// Returns the number of checks it took
    pub async fn wait(&self, boot_check: &dyn BootCheck) -> HarnessResult<u32> {
        debug!(
            "Checking device status in {:?}, then every {:?}",
            self.first_check, self.poll_interval
        );
        tokio::time::sleep(self.first_check).await;

        for attempt in 1..=self.max_polls {
            if boot_check.check().await? == BootReading::Booted {
                return Ok(attempt);
            }
            if attempt < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(HarnessError::TimeoutWaitingForBoot {
            attempts: self.max_polls,
        })
    }
}

/// A launched Android emulator
#[derive(Debug)]
pub struct EmulatorHandle {
    avd: String,
    child: Child,
}

impl EmulatorHandle {
    pub fn avd(&self) -> &str {
        &self.avd
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

fn emulator_binary(config: &DeviceConfig) -> HarnessResult<PathBuf> {
    let home = config
        .android_home()
        .ok_or_else(|| HarnessError::InvalidConfig("ANDROID_HOME is not set".to_string()))?;
    Ok(home.join("emulator").join("emulator"))
}

/// Boot an AVD with wiped data and wait until it's usable
pub async fn launch_emulator(
    config: &DeviceConfig,
    avd: &str,
    args: &[String],
    boot_check: &dyn BootCheck,
) -> HarnessResult<EmulatorHandle> {
    let binary = emulator_binary(config)?;
    info!("Launching Android emulator '{}'", avd);

    let child = Command::new(&binary)
        .args(["-avd", avd, "-wipe-data"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| HarnessError::ProcessSpawnFailed {
            command: format!("{} -avd {}", binary.display(), avd),
            source,
        })?;

    let mut handle = EmulatorHandle {
        avd: avd.to_string(),
        child,
    };

    match BootWaiter::from_config(config).wait(boot_check).await {
        Ok(checks) => {
            info!("{} is booted after {} check(s)", avd, checks);
            Ok(handle)
        }
        Err(e) => {
            let _ = kill_emulator(&mut handle).await;
            Err(e)
        }
    }
}

pub async fn kill_emulator(handle: &mut EmulatorHandle) -> HarnessResult<()> {
    info!("Killing Android emulator '{}'", handle.avd);
    if handle.child.try_wait()?.is_some() {
        return Ok(());
    }
    handle.child.start_kill()?;
    handle.child.wait().await?;
    Ok(())
}

/// Shut down booted simulators, then make sure the Simulator app is gone
pub async fn shutdown_simulator() -> HarnessResult<()> {
    info!("Shutting down the iOS simulator");
    ProcessSupervisor::new(CommandSpec::new("xcrun").args(["simctl", "shutdown", "booted"]))
        .run()
        .await?;

    // simctl can leave the app running
    tokio::time::sleep(Duration::from_secs(5)).await;
    match ProcessSupervisor::new(CommandSpec::new("killall").arg("Simulator"))
        .run()
        .await
    {
        Ok(_) | Err(HarnessError::ProcessExitNonZero { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
