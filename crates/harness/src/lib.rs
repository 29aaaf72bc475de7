//! Mobile Test Harness
//!
//! Drives end-to-end tests of Titanium mobile apps:
//! - Installs the requested Titanium SDK and CLI through the vendor tooling
//! - Builds the app under test and launches emulators or simulators
//! - Spawns a local Appium server and opens a WebDriver session against it
//! - Runs numbered test files and folds their outcomes per ticket
//! - Compares device screenshots against stored references
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Mobile Test Harness                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ToolchainInstaller<C: ToolchainCli>                        │
//! │    ├── resolve_version(id) -> build                         │
//! │    ├── install(build, force) / install_cli(...)             │
//! │    └── login(credentials, environment)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionManager<C: DriverConnector>                         │
//! │    ├── start_server(host, port) -> ServerHandle             │
//! │    ├── start_client(capabilities) -> AutomationDriver       │
//! │    └── stop_client() / stop_server()                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunCoordinator<R: TestRunner>                          │
//! │    ├── discover(dir) -> [TestFile]                          │
//! │    └── execute(files) -> RunReport { [TicketResult] }       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ProcessSupervisor (every child process above)              │
//! │    └── stdout/stderr rules: ready, error, fatal, capture    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod collate;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod process;
pub mod runner;
pub mod session;
pub mod toolchain;
pub mod visual;

pub use app::Platform;
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use process::{CommandSpec, ProcessSupervisor};
pub use runner::{TestRunCoordinator, TicketResult, TicketState};
pub use session::SessionManager;
pub use toolchain::{ToolchainInstaller, ToolchainVariant};
pub use visual::ScreenshotComparer;
