//! Test discovery, execution and result folding

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::mocha::{RunInvocation, RunnerEvent, TestRunner};
use super::ticket::{ticket_number, TicketLedger, TicketResult};
use crate::collate::natural_cmp;
use crate::config::RunnerConfig;
use crate::error::{HarnessError, HarnessResult};

/// A discovered test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    pub path: PathBuf,
    /// Leading number of the file name, if any
    pub ticket: Option<u32>,
}

impl TestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ticket = ticket_number(&path);
        Self { path, ticket }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Report handed to the runner's report writer
    pub report_path: PathBuf,
    pub results: Vec<TicketResult>,
}

impl RunReport {
    /// Write the ticket results as JSON next to the runner's report
    pub fn write_results(&self) -> HarnessResult<PathBuf> {
        let path = self.report_path.with_extension("json");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.results)?)?;
        debug!("Wrote ticket results to {}", path.display());
        Ok(path)
    }
}

/// Finds test files, hands them to a `TestRunner` and folds its events
pub struct TestRunCoordinator<R> {
    runner: R,
    config: RunnerConfig,
}

impl<R: TestRunner> TestRunCoordinator<R> {
    pub fn new(runner: R, config: RunnerConfig) -> Self {
        Self { runner, config }
    }

    /// Test files directly inside `dir`
    pub fn discover(&self, dir: &Path) -> HarnessResult<Vec<TestFile>> {
        info!("Fetching test files from {}", dir.display());
        let pattern = Regex::new(&self.config.test_pattern)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if pattern.is_match(&entry.file_name().to_string_lossy()) {
                files.push(TestFile::new(entry.into_path()));
            }
        }

        if files.is_empty() {
            return Err(HarnessError::NoTestsFound(dir.display().to_string()));
        }
        debug!("Found {} test file(s)", files.len());
        Ok(files)
    }

    /// Run `files` in ticket order and fold the results per ticket
    pub async fn execute(&self, mut files: Vec<TestFile>, project_root: &Path) -> HarnessResult<RunReport> {
        files.sort_by(|a, b| natural_cmp(&a.file_name(), &b.file_name()));
        let first = files
            .first()
            .ok_or_else(|| HarnessError::RunnerInvocation("no test files given".to_string()))?;

        let suite_name = first
            .path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tests".to_string());
        let report_path = self.report_path(project_root, &suite_name)?;
        info!("Putting results in {}", report_path.display());

        let tickets: HashMap<PathBuf, Option<u32>> =
            files.iter().map(|f| (f.path.clone(), f.ticket)).collect();
        let invocation = RunInvocation {
            files: files.into_iter().map(|f| f.path).collect(),
            report_path: report_path.clone(),
            suite_name,
            cwd: project_root.to_path_buf(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let run = async {
            let (ran, ledger) = tokio::join!(self.runner.run(&invocation, tx), fold(rx, &tickets));
            ran.map(|()| ledger)
        };

        let ledger = match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| HarnessError::Timeout(format!("test run after {:?}", limit)))??,
            None => run.await?,
        };

        info!("Tests complete, {} ticket(s) reported", ledger.len());
        Ok(RunReport {
            report_path,
            results: ledger.into_results(),
        })
    }

    /// Discover then execute
    pub async fn run_directory(&self, dir: &Path, project_root: &Path) -> HarnessResult<RunReport> {
        let files = self.discover(dir)?;
        self.execute(files, project_root).await
    }

    fn report_path(&self, project_root: &Path, suite_name: &str) -> HarnessResult<PathBuf> {
        let dir = project_root.join(&self.config.reports_dir);
        std::fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%d-%m-%y_%H-%M-%S");
        Ok(dir.join(format!("{}_{}.xml", suite_name, stamp)))
    }
}

/// Fold runner events into per-ticket results until the runner hangs up
async fn fold(
    mut events: mpsc::UnboundedReceiver<RunnerEvent>,
    tickets: &HashMap<PathBuf, Option<u32>>,
) -> TicketLedger {
    let mut ledger = TicketLedger::new();
    while let Some(event) = events.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed test event: {}", e);
                continue;
            }
        };

        let outcome = match event.outcome() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping test event: {}", e);
                continue;
            }
        };

        let ticket = event.file.as_deref().map(PathBuf::from).and_then(|file| {
            tickets
                .get(&file)
                .copied()
                .unwrap_or_else(|| ticket_number(&file))
        });
        match ticket {
            Some(ticket) => ledger.apply(ticket, &event.title, &outcome),
            None => warn!("No ticket number for test '{}' ({:?})", event.title, event.file),
        }
    }
    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ticket::{TestEndEvent, TicketState};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted events and records what it was asked to run
    #[derive(Default)]
    struct ScriptedRunner {
        events: Vec<RunnerEvent>,
        seen: Mutex<Option<RunInvocation>>,
        delay: Option<Duration>,
    }

    fn event(file: &str, title: &str, state: Option<&str>, pending: bool, err: Option<&str>) -> RunnerEvent {
        Ok(TestEndEvent {
            file: Some(file.to_string()),
            title: title.to_string(),
            pending,
            state: state.map(str::to_string),
            err: err.map(|m| serde_json::json!({ "message": m })),
        })
    }

    #[async_trait]
    impl TestRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: &RunInvocation,
            events: mpsc::UnboundedSender<RunnerEvent>,
        ) -> HarnessResult<()> {
            *self.seen.lock().unwrap() = Some(invocation.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            for event in &self.events {
                let replay = match event {
                    Ok(e) => Ok(e.clone()),
                    Err(e) => Err(HarnessError::RunnerInvocation(e.to_string())),
                };
                let _ = events.send(replay);
            }
            Ok(())
        }
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), "").unwrap();
        }
    }

    #[test]
    fn test_discover_filters_and_stays_shallow() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["1_a.test.js", "helper.js", "2_b.test.js"]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), &["3_c.test.js"]);

        let coordinator = TestRunCoordinator::new(ScriptedRunner::default(), RunnerConfig::default());
        let mut files = coordinator.discover(dir.path()).unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let tickets: Vec<Option<u32>> = files.iter().map(|f| f.ticket).collect();
        assert_eq!(tickets, vec![Some(1), Some(2)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_follows_symlinked_tests() {
        let shared = tempfile::tempdir().unwrap();
        touch(shared.path(), &["4_shared.test.js"]);
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(
            shared.path().join("4_shared.test.js"),
            dir.path().join("4_shared.test.js"),
        )
        .unwrap();

        let coordinator = TestRunCoordinator::new(ScriptedRunner::default(), RunnerConfig::default());
        let files = coordinator.discover(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].ticket, Some(4));
        assert_eq!(files[0].path, dir.path().join("4_shared.test.js"));
    }

    #[test]
    fn test_discover_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["README.md"]);
        let coordinator = TestRunCoordinator::new(ScriptedRunner::default(), RunnerConfig::default());
        assert!(matches!(
            coordinator.discover(dir.path()),
            Err(HarnessError::NoTestsFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_orders_and_folds() {
        let root = tempfile::tempdir().unwrap();
        let tests = root.path().join("suite");
        std::fs::create_dir(&tests).unwrap();
        touch(&tests, &["2_x.test.js", "10_y.test.js", "1_z.test.js"]);

        let five = tests.join("5_t.test.js").to_string_lossy().into_owned();
        let runner = ScriptedRunner {
            events: vec![
                event(&five, "skip reason", None, true, None),
                Err(HarnessError::RunnerInvocation("garbled".into())),
                event(&five, "works", Some("passed"), false, None),
                event(&five, "breaks", Some("failed"), false, Some("boom")),
                event("/elsewhere/no_number.test.js", "orphan", Some("passed"), false, None),
            ],
            ..Default::default()
        };
        let coordinator = TestRunCoordinator::new(runner, RunnerConfig::default());

        let files = coordinator.discover(&tests).unwrap();
        let report = coordinator.execute(files, root.path()).await.unwrap();

        let seen = coordinator.runner.seen.lock().unwrap().clone().unwrap();
        let order: Vec<String> = seen
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(order, vec!["1_z.test.js", "2_x.test.js", "10_y.test.js"]);
        assert_eq!(seen.suite_name, "suite");

        assert_eq!(report.results.len(), 1);
        let five = &report.results[0];
        assert_eq!(five.test_number, 5);
        assert_eq!(five.state, TicketState::Failed);
        assert_eq!(five.errors, vec!["skip reason", "boom"]);

        let name = report.report_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("suite_") && name.ends_with(".xml"));
        assert_eq!(report.report_path.parent().unwrap(), root.path().join("Reports"));

        let summary = report.write_results().unwrap();
        let written: Vec<TicketResult> =
            serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
        assert_eq!(written, report.results);
    }

    #[tokio::test]
    async fn test_execute_without_files() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = TestRunCoordinator::new(ScriptedRunner::default(), RunnerConfig::default());
        assert!(matches!(
            coordinator.execute(Vec::new(), root.path()).await,
            Err(HarnessError::RunnerInvocation(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let root = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let config = RunnerConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let coordinator = TestRunCoordinator::new(runner, config);
        let err = coordinator
            .execute(vec![TestFile::new(root.path().join("1_a.test.js"))], root.path())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
