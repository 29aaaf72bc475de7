//! Test execution
//!
//! Test files are numbered by ticket (`12_login.test.js`). The coordinator
//! runs them in numeric order through an external runner and merges the
//! outcomes of all files sharing a ticket into one `TicketResult`.

pub mod coordinator;
pub mod mocha;
pub mod ticket;

pub use coordinator::{RunReport, TestFile, TestRunCoordinator};
pub use mocha::{CommandTestRunner, RunInvocation, RunnerEvent, TestRunner};
pub use ticket::{TestEndEvent, TestOutcome, TicketLedger, TicketResult, TicketState};
