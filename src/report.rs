//! Run reporting.
//!
//! Reporters receive events as the pipeline advances and the final
//! [`RunReport`] once the run has finished. The console reporter prints the
//! result table; the JUnit reporter writes one test case per device.

pub mod junit;
pub mod table;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::Submission;
use crate::status::{DeviceResult, ProgressMessage};

pub use junit::JUnitReporter;

/// Outcome of a finished run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every device reported `success` |
/// | 1 | At least one device reported anything else |
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One row per device, in the order the server reported them.
    pub rows: Vec<DeviceResult>,

    /// Matrix token, when the API revision returned one.
    pub matrix_id: Option<String>,

    /// Wall-clock time from start of upload to the final status.
    pub duration: Duration,

    /// When the final status was received.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Returns `true` if every device reported `success`.
    pub fn success(&self) -> bool {
        self.rows.iter().all(DeviceResult::is_success)
    }

    /// Number of devices that did not report `success`.
    pub fn unsuccessful(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_success()).count()
    }

    /// Returns the process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Receives events during a run.
pub trait Reporter: Send + Sync {
    /// Called once the artifacts are uploaded.
    fn on_upload_complete(&self) {}

    /// Called once the matrix is submitted.
    fn on_test_started(&self, _submission: &Submission) {}

    /// Called for each progress message the first time it is seen.
    fn on_progress(&self, _message: &ProgressMessage) {}

    /// Called with the final report.
    fn on_run_complete(&self, report: &RunReport);
}

/// A reporter that does nothing.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// A reporter that forwards to several reporters.
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Reporter for MultiReporter {
    fn on_upload_complete(&self) {
        for reporter in &self.reporters {
            reporter.on_upload_complete();
        }
    }

    fn on_test_started(&self, submission: &Submission) {
        for reporter in &self.reporters {
            reporter.on_test_started(submission);
        }
    }

    fn on_progress(&self, message: &ProgressMessage) {
        for reporter in &self.reporters {
            reporter.on_progress(message);
        }
    }

    fn on_run_complete(&self, report: &RunReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report);
        }
    }
}

/// Prints progress and the result table to stdout.
pub struct ConsoleReporter {
    colored: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            colored: console::colors_enabled(),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn on_upload_complete(&self) {
        println!("{}", console::style("=> APKs uploaded").green());
    }

    fn on_test_started(&self, submission: &Submission) {
        match &submission.matrix_id {
            Some(id) => println!("{} ({})", console::style("=> Test started").green(), id),
            None => println!("{}", console::style("=> Test started").green()),
        }
    }

    fn on_progress(&self, message: &ProgressMessage) {
        println!("  [{}] {}", message.execution, message.message);
    }

    fn on_run_complete(&self, report: &RunReport) {
        println!();
        println!("Test results:");
        print!("{}", table::render(&report.rows, self.colored));
        println!();
        println!("  Duration: {:?}", report.duration);

        if report.success() {
            println!("{}", console::style("All devices passed!").green().bold());
        } else {
            println!(
                "{}",
                console::style(format!(
                    "{} of {} devices did not succeed.",
                    report.unsuccessful(),
                    report.rows.len()
                ))
                .red()
                .bold()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::OutcomeSummary;
    use std::sync::{Arc, Mutex};

    fn report(summaries: &[OutcomeSummary]) -> RunReport {
        RunReport {
            rows: summaries
                .iter()
                .map(|s| DeviceResult {
                    model: "Pixel2".to_string(),
                    version: "28".to_string(),
                    locale: "en".to_string(),
                    orientation: "portrait".to_string(),
                    summary: s.clone(),
                    flags: vec![],
                })
                .collect(),
            matrix_id: None,
            duration: Duration::from_secs(1),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(report(&[OutcomeSummary::Success, OutcomeSummary::Success]).exit_code(), 0);
        assert_eq!(report(&[OutcomeSummary::Success, OutcomeSummary::Failure]).exit_code(), 1);
        assert_eq!(report(&[OutcomeSummary::Skipped]).exit_code(), 1);
        assert_eq!(report(&[OutcomeSummary::Unknown("odd".into())]).exit_code(), 1);
    }

    #[test]
    fn test_unsuccessful_count() {
        let r = report(&[
            OutcomeSummary::Success,
            OutcomeSummary::Inconclusive,
            OutcomeSummary::Failure,
        ]);
        assert!(!r.success());
        assert_eq!(r.unsuccessful(), 2);
    }

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Reporter for Recording {
        fn on_progress(&self, message: &ProgressMessage) {
            self.0.lock().unwrap().push(message.message.clone());
        }

        fn on_run_complete(&self, _report: &RunReport) {
            self.0.lock().unwrap().push("complete".to_string());
        }
    }

    #[test]
    fn test_multi_reporter_forwards() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let multi = MultiReporter::new()
            .with_reporter(Recording(events.clone()))
            .with_reporter(NullReporter)
            .with_reporter(Recording(events.clone()));

        multi.on_progress(&ProgressMessage {
            execution: 0,
            message: "Starting".to_string(),
        });
        multi.on_run_complete(&report(&[OutcomeSummary::Success]));

        assert_eq!(
            *events.lock().unwrap(),
            vec!["Starting", "Starting", "complete", "complete"]
        );
    }
}
