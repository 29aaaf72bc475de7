//! Per-ticket aggregation of test outcomes

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Passed,
    Failed,
    Skipped,
}

/// Merged outcome of every test belonging to one ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketResult {
    pub test_number: u32,
    /// Title of the first test seen for the ticket
    pub name: String,
    pub state: TicketState,
    /// Skip reasons and failure messages, in arrival order
    pub errors: Vec<String>,
}

/// What happened to one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pending,
    Passed,
    Failed { message: String },
}

/// A `test end` event as reported by the runner
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestEndEvent {
    #[serde(default)]
    pub file: Option<String>,
    pub title: String,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub state: Option<String>,
    /// `{ message }`, or a bare message string
    #[serde(default)]
    pub err: Option<Value>,
}

impl TestEndEvent {
    pub fn outcome(&self) -> HarnessResult<TestOutcome> {
        if self.pending {
            return Ok(TestOutcome::Pending);
        }
        match self.state.as_deref() {
            Some("passed") => Ok(TestOutcome::Passed),
            Some("failed") => {
                let message = match &self.err {
                    Some(Value::String(message)) => message.clone(),
                    Some(err) => err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    None => String::new(),
                };
                Ok(TestOutcome::Failed { message })
            }
            other => Err(HarnessError::RunnerInvocation(format!(
                "test '{}' ended in unknown state {:?}",
                self.title, other
            ))),
        }
    }
}

/// Strip backslashes and turn double quotes into single ones so messages
/// stay well-formed in XML reports
pub fn sanitize(message: &str) -> String {
    message.replace('\\', "").replace('"', "'")
}

/// Leading number of a test file name: `12_login.test.js` is ticket 12
pub fn ticket_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Ticket results keyed by number, kept in first-seen order
#[derive(Debug, Default)]
pub struct TicketLedger {
    results: Vec<TicketResult>,
    index: HashMap<u32, usize>,
}

impl TicketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome into the ticket's result
    ///
    /// Failed never goes back, a pass upgrades a skip, and a skip after a
    /// pass changes nothing.
    pub fn apply(&mut self, ticket: u32, title: &str, outcome: &TestOutcome) {
        let existing = self.index.get(&ticket).copied();
        let Some(idx) = existing else {
            let (state, errors) = match outcome {
                TestOutcome::Pending => (TicketState::Skipped, vec![sanitize(title)]),
                TestOutcome::Passed => (TicketState::Passed, Vec::new()),
                TestOutcome::Failed { message } => (TicketState::Failed, vec![sanitize(message)]),
            };
            self.index.insert(ticket, self.results.len());
            self.results.push(TicketResult {
                test_number: ticket,
                name: title.to_string(),
                state,
                errors,
            });
            return;
        };

        let result = &mut self.results[idx];
        match (result.state, outcome) {
            (TicketState::Failed, TestOutcome::Pending) => result.errors.push(sanitize(title)),
            (TicketState::Failed, TestOutcome::Passed) => {}
            (_, TestOutcome::Failed { message }) => {
                result.state = TicketState::Failed;
                result.errors.push(sanitize(message));
            }
            (TicketState::Skipped, TestOutcome::Passed) => result.state = TicketState::Passed,
            (TicketState::Skipped, TestOutcome::Pending) => result.errors.push(sanitize(title)),
            (TicketState::Passed, _) => {}
        }
    }

    pub fn get(&self, ticket: u32) -> Option<&TicketResult> {
        self.index.get(&ticket).map(|&idx| &self.results[idx])
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<TicketResult> {
        self.results
    }
}
