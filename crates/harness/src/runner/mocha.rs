//! External test runner seam and the command-backed runner

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ticket::TestEndEvent;
use crate::config::{RunnerConfig, BUNDLED_REPORTER};
use crate::error::{HarnessError, HarnessResult};
use crate::process::{CommandSpec, OutputStream, ProcessSupervisor};

/// Reporter writing one `test end` object per line plus a JUnit report
const REPORTER_SOURCE: &str = include_str!("reporter.js");

/// File name the bundled reporter is written under, next to the report
pub const REPORTER_FILE: &str = ".mobile-harness-reporter.js";

/// Variables the bundled reporter reads its report target from
const REPORTER_PATH_ENV: &str = "JUNIT_REPORT_PATH";
const REPORTER_NAME_ENV: &str = "JUNIT_REPORT_NAME";

/// A parsed event, or the reason it couldn't be parsed
pub type RunnerEvent = HarnessResult<TestEndEvent>;

/// One hand-off to the runner
#[derive(Debug, Clone)]
pub struct RunInvocation {
    /// Test files, already in run order
    pub files: Vec<PathBuf>,
    pub report_path: PathBuf,
    /// Suite label for the report
    pub suite_name: String,
    pub cwd: PathBuf,
}

/// Runs test files and streams back one event per finished test
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Returns once the runner is done; failing tests are not an error
    async fn run(
        &self,
        invocation: &RunInvocation,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) -> HarnessResult<()>;
}

/// Runs an external command that prints one JSON event per stdout line
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    config: RunnerConfig,
}

impl CommandTestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn command(&self, invocation: &RunInvocation) -> HarnessResult<CommandSpec> {
        let report = invocation.report_path.to_string_lossy().into_owned();
        let mut spec = CommandSpec::new(&self.config.command).args(self.config.args.iter().cloned());

        match self.config.reporter.as_str() {
            "" => {}
            BUNDLED_REPORTER => {
                let reporter = install_reporter(&invocation.report_path)?;
                spec = spec
                    .arg("--reporter")
                    .arg(reporter.to_string_lossy().into_owned())
                    .env(REPORTER_PATH_ENV, report.as_str())
                    .env(REPORTER_NAME_ENV, invocation.suite_name.as_str());
            }
            other => spec = spec.arg("--reporter").arg(other),
        }

        Ok(spec
            .args(invocation.files.iter().map(|f| f.to_string_lossy().into_owned()))
            .env(&self.config.report_env, report)
            .env(&self.config.report_name_env, &invocation.suite_name)
            .cwd(&invocation.cwd))
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(
        &self,
        invocation: &RunInvocation,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) -> HarnessResult<()> {
        if invocation.files.is_empty() {
            return Err(HarnessError::RunnerInvocation("no test files given".to_string()));
        }

        info!("Handing {} file(s) to the test runner", invocation.files.len());
        let spec = self.command(invocation)?;
        let result = ProcessSupervisor::new(spec)
            .run_observed(|stream, line| {
                if stream != OutputStream::Stdout {
                    return;
                }
                if let Some(event) = parse_event_line(line) {
                    let _ = events.send(event);
                }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // Mocha exits with the number of failed tests
            Err(HarnessError::ProcessExitNonZero { code, .. }) => {
                debug!("Test runner exited with code {}", code);
                Ok(())
            }
            Err(HarnessError::ProcessSpawnFailed { command, source }) => Err(
                HarnessError::RunnerInvocation(format!("couldn't start `{}`: {}", command, source)),
            ),
            Err(e) => Err(e),
        }
    }
}

/// Write the bundled reporter next to `report_path` and return its path
pub fn install_reporter(report_path: &Path) -> HarnessResult<PathBuf> {
    let path = report_path.with_file_name(REPORTER_FILE);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, REPORTER_SOURCE)?;
    debug!("Wrote mocha reporter to {}", path.display());
    Ok(path)
}

/// Parse one runner output line
///
/// Accepts the bundled reporter's `test end` objects or a mocha `json-stream`
/// record (`["pass" | "fail" | "pending", {...}]`). Lines that aren't events give
/// `None`; event-shaped lines that don't parse give `Some(Err)`.
pub fn parse_event_line(line: &str) -> Option<RunnerEvent> {
    let trimmed = line.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => {
            warn!("Ignoring unparseable runner line: {}", trimmed);
            return None;
        }
    };

    match value {
        Value::Array(items) => {
            let kind = items.first().and_then(Value::as_str)?;
            let (state, pending) = match kind {
                "pass" => ("passed", false),
                "fail" => ("failed", false),
                "pending" => ("pending", true),
                // start / end records
                _ => return None,
            };
            let mut body = items.get(1).cloned().unwrap_or(Value::Null);
            if let Value::Object(map) = &mut body {
                map.insert("state".to_string(), Value::from(state));
                map.insert("pending".to_string(), Value::from(pending));
            }
            Some(serde_json::from_value(body).map_err(HarnessError::from))
        }
        Value::Object(_) => Some(serde_json::from_value(value).map_err(HarnessError::from)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ticket::TestOutcome;

    #[test]
    fn test_parse_object_event() {
        let event = parse_event_line(
            r#"{"file": "/t/5_a.test.js", "title": "works", "pending": false, "state": "passed"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.file.as_deref(), Some("/t/5_a.test.js"));
        assert_eq!(event.outcome().unwrap(), TestOutcome::Passed);
    }

    #[test]
    fn test_parse_json_stream_records() {
        let fail = parse_event_line(
            r#"["fail", {"title": "breaks", "file": "/t/5_a.test.js", "err": "boom", "stack": "..."}]"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            fail.outcome().unwrap(),
            TestOutcome::Failed {
                message: "boom".into()
            }
        );

        let pending = parse_event_line(r#"["pending", {"title": "later", "file": "/t/6.test.js"}]"#)
            .unwrap()
            .unwrap();
        assert_eq!(pending.outcome().unwrap(), TestOutcome::Pending);

        assert!(parse_event_line(r#"["start", {"total": 3}]"#).is_none());
        assert!(parse_event_line(r#"["end", {"passes": 3}]"#).is_none());
    }

    #[test]
    fn test_non_events_ignored_and_bad_events_reported() {
        assert!(parse_event_line("  1 passing (2s)").is_none());
        assert!(parse_event_line("{not json").is_none());
        assert!(matches!(
            parse_event_line(r#"{"file": "/t/1.test.js"}"#),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_bundled_reporter_is_installed_and_passed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandTestRunner::new(RunnerConfig::default());
        let invocation = RunInvocation {
            files: vec![dir.path().join("1_a.test.js")],
            report_path: dir.path().join("Reports").join("suite_01-01-20_10-00-00.xml"),
            suite_name: "suite".into(),
            cwd: dir.path().to_path_buf(),
        };

        let spec = runner.command(&invocation).unwrap();
        let reporter = dir.path().join("Reports").join(REPORTER_FILE);
        assert!(std::fs::read_to_string(&reporter).unwrap().contains("'test end'"));
        assert_eq!(spec.program, "npx");
        assert_eq!(
            spec.args,
            vec![
                "mocha".to_string(),
                "--timeout".into(),
                "120000".into(),
                "--slow".into(),
                "80000".into(),
                "--reporter".into(),
                reporter.to_string_lossy().into_owned(),
                dir.path().join("1_a.test.js").to_string_lossy().into_owned(),
            ]
        );
        assert!(spec.env.iter().any(|(k, v)| k == "JUNIT_REPORT_PATH"
            && v == &invocation.report_path.to_string_lossy()));
    }

    #[test]
    fn test_named_reporter_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandTestRunner::new(RunnerConfig {
            reporter: "mocha-jenkins-reporter".into(),
            ..Default::default()
        });
        let invocation = RunInvocation {
            files: vec![dir.path().join("1_a.test.js")],
            report_path: dir.path().join("Reports").join("r.xml"),
            suite_name: "suite".into(),
            cwd: dir.path().to_path_buf(),
        };
        let spec = runner.command(&invocation).unwrap();
        assert!(spec
            .args
            .windows(2)
            .any(|w| w[0] == "--reporter" && w[1] == "mocha-jenkins-reporter"));
        assert!(!dir.path().join("Reports").join(REPORTER_FILE).exists());
    }

    #[tokio::test]
    async fn test_empty_invocation_rejected() {
        let runner = CommandTestRunner::new(RunnerConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let invocation = RunInvocation {
            files: Vec::new(),
            report_path: PathBuf::from("/tmp/r.xml"),
            suite_name: "suite".into(),
            cwd: PathBuf::from("/tmp"),
        };
        assert!(matches!(
            runner.run(&invocation, tx).await,
            Err(HarnessError::RunnerInvocation(_))
        ));
    }

    #[tokio::test]
    async fn test_command_runner_streams_events_and_tolerates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"echo "report=$JUNIT_REPORT_PATH"; echo '{"file": "'"$1"'", "title": "ok", "state": "passed"}'; exit 1"#.into(),
                "fake-mocha".into(),
            ],
            reporter: String::new(),
            ..Default::default()
        };
        let runner = CommandTestRunner::new(config);
        let invocation = RunInvocation {
            files: vec![dir.path().join("3_x.test.js")],
            report_path: dir.path().join("Reports").join("r.xml"),
            suite_name: "suite".into(),
            cwd: dir.path().to_path_buf(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        runner.run(&invocation, tx).await.unwrap();

        let event = rx.recv().await.unwrap().unwrap();
        assert_eq!(event.title, "ok");
        assert!(event.file.unwrap().ends_with("3_x.test.js"));
        assert!(rx.recv().await.is_none());
    }
}
