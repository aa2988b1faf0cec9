//! labrun: run Android device tests on a remote test lab from CI.
//!
//! A run uploads the app (and optionally a test app), submits a test matrix
//! describing which devices to test on, polls until the lab reports a
//! terminal state, and prints one result row per device. The process exit
//! code is the CI signal.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Config**: Step inputs from the environment plus an optional settings file
//! - **Matrix**: Builds the test matrix document from the inputs
//! - **Api**: The [`TestLab`] seam and its HTTP client
//! - **Poller**: Waits for the terminal state with a ceiling and cancellation
//! - **Status**: Decodes both status document revisions
//! - **Report**: Result table, JUnit XML
//! - **Pipeline**: Ties the steps together
//!
//! # Example
//!
//! ```no_run
//! use labrun::api::HttpTestLab;
//! use labrun::config::{PollSettings, StepConfig};
//! use labrun::pipeline::Pipeline;
//! use labrun::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StepConfig::from_env();
//!     let poll = PollSettings::default();
//!     let lab = HttpTestLab::from_config(&config, poll.api_version);
//!
//!     let report = Pipeline::new(config, poll, lab, ConsoleReporter::new()).run().await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod api;
pub mod config;
pub mod matrix;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod status;

// Re-export commonly used types
pub use api::{HttpTestLab, TestLab};
pub use config::{ApiVersion, Settings, StepConfig, TestType};
pub use matrix::{TestMatrix, build_matrix};
pub use pipeline::{Pipeline, PipelineError};
pub use report::{Reporter, RunReport};
