//! Subprocess supervision
//!
//! The vendor CLIs this crate drives do not reliably report failure through
//! their exit code, so every supervised process is judged on two channels:
//! the exit status and a declarative table of output rules scanned line by
//! line across stdout and stderr.

use std::collections::{BTreeMap, VecDeque};
use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Number of trailing output lines kept for error context
const OUTPUT_TAIL: usize = 50;

const ERROR_MARKER: &str = "[ERROR]";

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Which pipe(s) a rule listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFilter {
    Stdout,
    Stderr,
    Any,
}

impl StreamFilter {
    fn accepts(&self, stream: OutputStream) -> bool {
        match self {
            StreamFilter::Any => true,
            StreamFilter::Stdout => stream == OutputStream::Stdout,
            StreamFilter::Stderr => stream == OutputStream::Stderr,
        }
    }
}

/// What a matching line means for the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSignal {
    /// The process is up; long-running processes resolve here
    Ready,
    /// Sticky failure that overrides a zero exit code
    Error,
    /// Like `Error`, but the process is killed straight away
    Fatal,
    /// Store capture group 1 (or the whole match) under this field
    Capture(String),
}

/// A single (pattern, signal) entry of a rule table
#[derive(Debug, Clone)]
pub struct OutputRule {
    pattern: Regex,
    stream: StreamFilter,
    signal: RuleSignal,
}

impl OutputRule {
    pub fn new(pattern: &str, stream: StreamFilter, signal: RuleSignal) -> HarnessResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            stream,
            signal,
        })
    }

    pub fn ready(pattern: &str) -> HarnessResult<Self> {
        Self::new(pattern, StreamFilter::Any, RuleSignal::Ready)
    }

    pub fn error(pattern: &str, stream: StreamFilter) -> HarnessResult<Self> {
        Self::new(pattern, stream, RuleSignal::Error)
    }

    pub fn fatal(pattern: &str, stream: StreamFilter) -> HarnessResult<Self> {
        Self::new(pattern, stream, RuleSignal::Fatal)
    }

    pub fn capture(field: &str, pattern: &str, stream: StreamFilter) -> HarnessResult<Self> {
        Self::new(pattern, stream, RuleSignal::Capture(field.to_string()))
    }

    /// The vendor `[ERROR]` tag on stderr; `[WARN]` lines are left alone
    pub fn error_marker() -> HarnessResult<Self> {
        Self::error(&regex::escape(ERROR_MARKER), StreamFilter::Stderr)
    }

    /// `[ERROR]` on stderr, killing the process so it can't sit on a prompt
    pub fn fatal_error_marker() -> HarnessResult<Self> {
        Self::fatal(&regex::escape(ERROR_MARKER), StreamFilter::Stderr)
    }
}

/// Ordered rule table consulted for every output line
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<OutputRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: OutputRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Outcome of feeding one line through the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Continue,
    Ready,
    Kill,
}

/// Accumulated judgement over the output of one process
#[derive(Debug, Default)]
struct Judgement {
    observed_error: Option<String>,
    captured: BTreeMap<String, String>,
    tail: VecDeque<String>,
}

impl Judgement {
    fn observe(&mut self, rules: &RuleSet, stream: OutputStream, line: &str) -> Verdict {
        if self.tail.len() == OUTPUT_TAIL {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());

        let mut verdict = Verdict::Continue;
        for rule in rules.rules.iter().filter(|r| r.stream.accepts(stream)) {
            let Some(caps) = rule.pattern.captures(line) else {
                continue;
            };
            match &rule.signal {
                RuleSignal::Ready => {
                    if verdict == Verdict::Continue {
                        verdict = Verdict::Ready;
                    }
                }
                RuleSignal::Error => self.record_error(line),
                RuleSignal::Fatal => {
                    self.record_error(line);
                    verdict = Verdict::Kill;
                }
                RuleSignal::Capture(field) => {
                    let value = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str());
                    if let Some(value) = value {
                        self.captured
                            .entry(field.clone())
                            .or_insert_with(|| value.to_string());
                    }
                }
            }
        }
        verdict
    }

    fn record_error(&mut self, line: &str) {
        if self.observed_error.is_none() {
            self.observed_error = Some(strip_error_marker(line));
        }
    }

    fn finish(self, command: String, code: Option<i32>) -> HarnessResult<ProcessOutcome> {
        if let Some(text) = self.observed_error {
            return Err(HarnessError::ProcessObservedError {
                command,
                text,
                captured: self.captured,
            });
        }

        // No code means the process died to a signal
        let code = code.unwrap_or(-1);
        let output: Vec<String> = self.tail.into_iter().collect();
        if code != 0 {
            return Err(HarnessError::ProcessExitNonZero {
                command,
                code,
                output,
            });
        }

        Ok(ProcessOutcome {
            command,
            exit_code: code,
            captured: self.captured,
            output,
        })
    }
}

/// Drop the `[ERROR]` tag and the punctuation around it
fn strip_error_marker(line: &str) -> String {
    let is_noise = |c: char| !(c.is_alphanumeric() || c == '_');
    match line.find(ERROR_MARKER) {
        Some(idx) => {
            let before = line[..idx].trim_end_matches(is_noise);
            let after = line[idx + ERROR_MARKER.len()..].trim_start_matches(is_noise);
            format!("{}{}", before, after)
        }
        None => line.trim().to_string(),
    }
}

/// Successful completion of a supervised process
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub command: String,
    pub exit_code: i32,
    pub captured: BTreeMap<String, String>,
    /// Last lines of combined output
    pub output: Vec<String>,
}

impl ProcessOutcome {
    pub fn captured(&self, field: &str) -> Option<&str> {
        self.captured.get(field).map(String::as_str)
    }

    /// Combined output joined back into text
    pub fn text(&self) -> String {
        self.output.join("\n")
    }
}

/// Description of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Run through `sh -c`; the program is taken verbatim, args are quoted
    pub shell: bool,
    /// Argument values masked in logs and errors
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// An argument that must never show up in logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        if !arg.is_empty() {
            self.secrets.push(arg.clone());
        }
        self.args.push(arg);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Command line as shown to humans, secrets masked
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| {
                if self.secrets.contains(a) {
                    "****"
                } else {
                    a.as_str()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = if self.shell {
            let line = std::iter::once(Cow::Borrowed(self.program.as_str()))
                .chain(self.args.iter().map(|a| shell_quote(a)))
                .collect::<Vec<_>>()
                .join(" ");
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        } else {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args);
            cmd
        };

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Quote `arg` for `sh` unless it only holds characters the shell leaves alone
fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

type LineReceiver = mpsc::UnboundedReceiver<(OutputStream, String)>;

/// Runs one command under a rule table
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    spec: CommandSpec,
    rules: RuleSet,
}

impl ProcessSupervisor {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            rules: RuleSet::new(),
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Run to completion and judge the result
    pub async fn run(&self) -> HarnessResult<ProcessOutcome> {
        self.run_observed(|_, _| {}).await
    }

    /// Run to completion, handing every output line to `observer` as it arrives
    pub async fn run_observed<F>(&self, mut observer: F) -> HarnessResult<ProcessOutcome>
    where
        F: FnMut(OutputStream, &str),
    {
        let command = self.spec.display();
        debug!("Invoking command: {}", command);

        let (mut child, mut lines) = self.spawn()?;
        let mut judgement = Judgement::default();

        while let Some((stream, line)) = lines.recv().await {
            debug!("[{}] {}", stream, line);
            observer(stream, &line);

            if judgement.observe(&self.rules, stream, &line) == Verdict::Kill {
                warn!("Fatal output from `{}`, killing it", command);
                kill_tree(&mut child);
                break;
            }
        }

        let status = child.wait().await?;
        judgement.finish(command, status.code())
    }

    /// Spawn a long-running process and return once a `Ready` rule matches
    ///
    /// Output after the ready line keeps being drained (and logged) in the
    /// background for as long as the process lives.
    pub async fn spawn_until_ready(&self, timeout: Duration) -> HarnessResult<RunningProcess> {
        let command = self.spec.display();
        debug!("Invoking command: {}", command);

        let (mut child, mut lines) = self.spawn()?;
        let mut judgement = Judgement::default();

        let rules = &self.rules;
        let wait_ready = async {
            while let Some((stream, line)) = lines.recv().await {
                debug!("[{}] {}", stream, line);
                match judgement.observe(rules, stream, &line) {
                    Verdict::Ready => return Some(true),
                    Verdict::Kill => return Some(false),
                    Verdict::Continue => {}
                }
            }
            None
        };

        let waited = tokio::time::timeout(timeout, wait_ready).await;
        match waited {
            Ok(Some(true)) => {
                info!("`{}` is ready (pid: {:?})", command, child.id());
                tokio::spawn(drain(lines));
                Ok(RunningProcess {
                    child,
                    command,
                    captured: judgement.captured,
                })
            }
            Ok(Some(false)) => {
                kill_tree(&mut child);
                let _ = child.wait().await;
                Err(HarnessError::ProcessObservedError {
                    command,
                    text: judgement.observed_error.unwrap_or_default(),
                    captured: judgement.captured,
                })
            }
            Ok(None) => {
                let status = child.wait().await?;
                let tail: Vec<String> = judgement.tail.into_iter().collect();
                Err(HarnessError::ServerStartup(format!(
                    "`{}` exited ({}) before signalling readiness: {}",
                    command,
                    status,
                    tail.join(" | ")
                )))
            }
            Err(_) => {
                kill_tree(&mut child);
                let _ = child.wait().await;
                Err(HarnessError::Timeout(format!(
                    "ready signal from `{}` after {:?}",
                    command, timeout
                )))
            }
        }
    }

    fn spawn(&self) -> HarnessResult<(GroupChild, LineReceiver)> {
        let mut cmd = self.spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so shell-wrapped children die with the parent
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| HarnessError::ProcessSpawnFailed {
                command: self.spec.display(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx));
        }

        Ok((GroupChild(child), rx))
    }
}

async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c: char| c == '\r' || c == '\n')
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
        }
    }
}

async fn drain(mut lines: LineReceiver) {
    while let Some((stream, line)) = lines.recv().await {
        debug!("[{}] {}", stream, line);
    }
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

/// Child whose whole process group is killed if it's dropped while running
///
/// Covers futures that are abandoned mid-run, e.g. by an outer timeout.
#[derive(Debug)]
struct GroupChild(Child);

impl Deref for GroupChild {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.0
    }
}

impl DerefMut for GroupChild {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.0
    }
}

impl Drop for GroupChild {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            kill_tree(&mut self.0);
        }
    }
}

/// A long-running process that has signalled readiness
#[derive(Debug)]
pub struct RunningProcess {
    child: GroupChild,
    command: String,
    captured: BTreeMap<String, String>,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn captured(&self) -> &BTreeMap<String, String> {
        &self.captured
    }

    /// Exit code if the process has already gone away
    pub fn try_exit_code(&mut self) -> HarnessResult<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    /// Stop the process: SIGTERM first, then a kill after `grace`
    pub async fn stop(&mut self, grace: Duration) -> HarnessResult<()> {
        info!("Stopping `{}` (pid: {:?})", self.command, self.child.id());

        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if killpg(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(grace, self.child.wait()).await.is_ok()
                {
                    return Ok(());
                }
            }
        }

        kill_tree(&mut self.child);
        self.child.wait().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_strip_error_marker() {
        assert_eq!(
            strip_error_marker("[ERROR] : Unable to find SDK"),
            "Unable to find SDK"
        );
        assert_eq!(strip_error_marker("plain text "), "plain text");
    }

    #[test]
    fn test_capture_first_match_wins() {
        let rules = RuleSet::new()
            .with(OutputRule::capture("sdk", r"(\d+\.\d+\.\d+\.\w+)", StreamFilter::Stdout).unwrap());
        let mut judgement = Judgement::default();
        judgement.observe(&rules, OutputStream::Stdout, "installed 9.0.0.GA");
        judgement.observe(&rules, OutputStream::Stdout, "installed 9.1.0.GA");
        // stderr is ignored by a stdout rule
        judgement.observe(&rules, OutputStream::Stderr, "8.0.0.GA");

        let outcome = judgement.finish("x".into(), Some(0)).unwrap();
        assert_eq!(outcome.captured("sdk"), Some("9.0.0.GA"));
    }

    #[test]
    fn test_error_rule_overrides_zero_exit() {
        let rules = RuleSet::new().with(OutputRule::error_marker().unwrap());
        let mut judgement = Judgement::default();
        assert_eq!(
            judgement.observe(&rules, OutputStream::Stdout, "[ERROR] on stdout is ignored"),
            Verdict::Continue
        );
        judgement.observe(&rules, OutputStream::Stderr, "[WARN] fine");
        judgement.observe(&rules, OutputStream::Stderr, "[ERROR] first");
        judgement.observe(&rules, OutputStream::Stderr, "[ERROR] second");

        match judgement.finish("x".into(), Some(0)) {
            Err(HarnessError::ProcessObservedError { text, .. }) => assert_eq!(text, "first"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_display_masks_secrets() {
        let spec = CommandSpec::new("appc")
            .args(["login", "--password"])
            .secret_arg("hunter2");
        assert_eq!(spec.display(), "appc login --password ****");
    }

    #[tokio::test]
    async fn test_run_success_captures_output() {
        let outcome = ProcessSupervisor::new(sh("echo hello; echo world >&2"))
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains(&"hello".to_string()));
        assert!(outcome.output.contains(&"world".to_string()));
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let err = ProcessSupervisor::new(sh("echo nope; exit 3"))
            .run()
            .await
            .unwrap_err();
        match err {
            HarnessError::ProcessExitNonZero { code, output, .. } => {
                assert_eq!(code, 3);
                assert_eq!(output, vec!["nope".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_exit_with_error_marker_fails() {
        let rules = RuleSet::new().with(OutputRule::error_marker().unwrap());
        let err = ProcessSupervisor::new(sh("echo '[ERROR] Build failed' >&2; exit 0"))
            .with_rules(rules)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ProcessObservedError { ref text, .. } if text == "Build failed"
        ));
    }

    #[tokio::test]
    async fn test_fatal_kills_early_and_keeps_captures() {
        let rules = RuleSet::new()
            .with(OutputRule::capture("sdk", r"found (\S+)", StreamFilter::Stdout).unwrap())
            .with(OutputRule::fatal_error_marker().unwrap());
        let started = std::time::Instant::now();
        let err = ProcessSupervisor::new(sh(
            "echo 'found 9.0.0.GA'; sleep 0.2; echo '[ERROR] prompt ahead' >&2; sleep 30",
        ))
        .with_rules(rules)
        .run()
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            HarnessError::ProcessObservedError { text, captured, .. } => {
                assert_eq!(text, "prompt ahead");
                assert_eq!(captured.get("sdk").map(String::as_str), Some("9.0.0.GA"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = ProcessSupervisor::new(CommandSpec::new("/nonexistent/definitely-not-here"))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProcessSpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_shell_mode_joins_args() {
        let outcome = ProcessSupervisor::new(CommandSpec::new("echo").args(["a", "b"]).shell(true))
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.output, vec!["a b".to_string()]);
    }

    #[tokio::test]
    async fn test_shell_mode_quotes_args() {
        let spec = CommandSpec::new("printf")
            .args(["%s|\\n", "/tmp/My Project", "it's", ""])
            .shell(true);
        let outcome = ProcessSupervisor::new(spec).run().await.unwrap();
        assert_eq!(outcome.output, vec!["/tmp/My Project|", "it's|", "|"]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("-d"), "-d");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote(""), "''");
    }

    #[cfg(target_os = "linux")]
    fn is_alive(pid: i32) -> bool {
        // Reparented orphans may linger as zombies nobody reaps
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abandoned_run_kills_the_group() {
        let pid = std::sync::Arc::new(std::sync::Mutex::new(None::<i32>));
        let seen = pid.clone();
        let supervisor = ProcessSupervisor::new(sh("sleep 300 & echo \"bg $!\"; wait"));
        let run = supervisor.run_observed(move |_, line| {
            if let Some(rest) = line.strip_prefix("bg ") {
                *seen.lock().unwrap() = rest.trim().parse().ok();
            }
        });
        assert!(tokio::time::timeout(Duration::from_millis(500), run).await.is_err());

        let pid = pid.lock().unwrap().expect("background pid reported");
        for _ in 0..50 {
            if !is_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background process {} outlived the abandoned run", pid);
    }

    #[tokio::test]
    async fn test_ready_then_stop() {
        let rules = RuleSet::new().with(OutputRule::ready("listening").unwrap());
        let mut running = ProcessSupervisor::new(sh("echo booting; echo listening; sleep 30"))
            .with_rules(rules)
            .spawn_until_ready(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(running.try_exit_code().unwrap().is_none());
        running.stop(Duration::from_secs(2)).await.unwrap();
        assert!(running.try_exit_code().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exit_before_ready() {
        let rules = RuleSet::new().with(OutputRule::ready("listening").unwrap());
        let err = ProcessSupervisor::new(sh("echo crashed; exit 1"))
            .with_rules(rules)
            .spawn_until_ready(Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ServerStartup(_)));
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let rules = RuleSet::new().with(OutputRule::ready("listening").unwrap());
        let err = ProcessSupervisor::new(sh("sleep 30"))
            .with_rules(rules)
            .spawn_until_ready(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
