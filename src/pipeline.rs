//! The end-to-end run: validate, upload, submit, wait, report.
//!
//! # Execution Flow
//!
//! 1. **Validation**: Check the step inputs and build the test matrix. A bad
//!    input fails here, before any network call.
//! 2. **Upload**: Request upload slots and stream the app (and the test
//!    artifact, when one is configured) to them.
//! 3. **Submission**: Post the matrix to the service.
//! 4. **Polling**: Wait for a terminal status, forwarding new progress
//!    messages to the reporter.
//! 5. **Reporting**: Turn the final status into a [`RunReport`].
//!
//! Any failure in steps 1 through 4 ends the run with a [`PipelineError`].
//! Cancellation is honoured at every network call; once cancelled, the
//! matrix is never submitted.
//!
//! A run that finishes with unsuccessful devices is not an error; it is a
//! report whose [`RunReport::success`] is false.

use std::future::Future;
use std::path::Path;

use chrono::Utc;
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ApiError, TestLab};
use crate::config::{ConfigError, PollSettings, StepConfig};
use crate::matrix::{self, MatrixError};
use crate::poller::{PollError, Poller};
use crate::report::{Reporter, RunReport};

/// Errors that abort a run before a result is available.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Poll(#[from] PollError),

    /// Cancelled before the test run was submitted.
    #[error("Cancelled before the test run was submitted")]
    Cancelled,
}

/// Drives one test run against a [`TestLab`].
///
/// # Example
///
/// ```no_run
/// use labrun::api::HttpTestLab;
/// use labrun::config::{PollSettings, StepConfig};
/// use labrun::pipeline::Pipeline;
/// use labrun::report::ConsoleReporter;
///
/// # async fn example() -> Result<(), labrun::pipeline::PipelineError> {
/// let config = StepConfig::from_env();
/// let poll = PollSettings::default();
/// let lab = HttpTestLab::from_config(&config, poll.api_version);
///
/// let report = Pipeline::new(config, poll, lab, ConsoleReporter::new()).run().await?;
/// std::process::exit(report.exit_code());
/// # }
/// ```
pub struct Pipeline<A, R> {
    config: StepConfig,
    poll: PollSettings,
    api: A,
    reporter: R,
    cancellation_token: CancellationToken,
}

impl<A, R> Pipeline<A, R>
where
    A: TestLab,
    R: Reporter,
{
    pub fn new(config: StepConfig, poll: PollSettings, api: A, reporter: R) -> Self {
        Self {
            config,
            poll,
            api,
            reporter,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sets a cancellation token that aborts the run.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Runs the pipeline to completion and returns the report.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let config = &self.config;

        let test_type = config.validate()?;
        let test_matrix = matrix::build_matrix(config)?;
        info!(
            "Testing {} on {} device(s)",
            test_type,
            test_matrix.environment_matrix.android_device_list.android_devices.len()
        );

        info!("Uploading APKs");
        let slots = self.cancellable(self.api.request_upload_slots()).await?;
        let app = Path::new(&config.apk_path);
        self.cancellable(self.api.upload_file(&slots.app_url, app))
            .await?;
        if !config.test_apk_path.is_empty() {
            let test_app = Path::new(&config.test_apk_path);
            self.cancellable(self.api.upload_file(&slots.test_app_url, test_app))
                .await?;
        }
        self.reporter.on_upload_complete();

        info!("Starting test");
        let submission = self.cancellable(self.api.submit(&test_matrix)).await?;
        self.reporter.on_test_started(&submission);

        info!("Waiting for test results");
        let max_wait = self.poll.max_wait(matrix::timeout_secs(config));
        let status = Poller::new(&self.api, self.poll.interval(), max_wait)
            .with_cancellation_token(self.cancellation_token.clone())
            .wait(&submission, |message| self.reporter.on_progress(message))
            .await?;

        let report = RunReport {
            rows: status.device_results(),
            matrix_id: submission.matrix_id,
            duration: start.elapsed(),
            finished_at: Utc::now(),
        };
        self.reporter.on_run_complete(&report);

        Ok(report)
    }

    /// Runs an API call unless the token is cancelled first.
    async fn cancellable<T, F>(&self, call: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(PipelineError::Cancelled),
            result = call => Ok(result?),
        }
    }
}
