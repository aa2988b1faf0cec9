//! Configuration schema definitions for labrun.
//!
//! Two sources feed a run:
//!
//! ```text
//! StepConfig (environment)       - Flat record of the step's inputs
//! ├── api                        - base URL, build slug, app slug
//! ├── shared                     - artifacts, test type, devices, timeout
//! ├── instrumentation            - test package, runner, targets
//! ├── robo                       - initial activity, depth, steps, directives
//! └── gameloop                   - scenarios, scenario labels
//!
//! Settings (labrun.toml, optional)
//! ├── PollSettings               - API version, interval, wait ceiling
//! └── ReportSettings             - JUnit output
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable names read by [`StepConfig::from_lookup`].
///
/// These names are shared with existing CI configurations and must not change.
pub mod env {
    pub const API_BASE_URL: &str = "api_base_url";
    pub const BUILD_SLUG: &str = "BITRISE_BUILD_SLUG";
    pub const APP_SLUG: &str = "BITRISE_APP_SLUG";
    pub const APK_PATH: &str = "apk_path";
    pub const TEST_APK_PATH: &str = "test_apk_path";
    pub const TEST_TYPE: &str = "test_type";
    pub const TEST_DEVICES: &str = "test_devices";
    pub const APP_PACKAGE_ID: &str = "app_package_id";
    pub const TEST_TIMEOUT: &str = "test_timeout";
    pub const INST_TEST_PACKAGE_ID: &str = "inst_test_package_id";
    pub const INST_TEST_RUNNER_CLASS: &str = "inst_test_runner_class";
    pub const INST_TEST_TARGETS: &str = "inst_test_targets";
    pub const ROBO_INITIAL_ACTIVITY: &str = "robo_initial_activity";
    pub const ROBO_MAX_DEPTH: &str = "robo_max_depth";
    pub const ROBO_MAX_STEPS: &str = "robo_max_steps";
    pub const ROBO_DIRECTIVES: &str = "robo_directives";
    pub const LOOP_SCENARIOS: &str = "loop_scenarios";
    pub const LOOP_SCENARIO_LABELS: &str = "loop_scenario_labels";
}

/// The step's inputs, exactly as the CI system hands them over.
///
/// Every field is raw text. Presence and path checks happen in
/// [`StepConfig::validate`](crate::config::StepConfig::validate); numeric and
/// list fields are parsed when the test matrix is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepConfig {
    // api
    pub api_base_url: String,
    pub build_slug: String,
    pub app_slug: String,

    // shared
    pub apk_path: String,
    pub test_apk_path: String,
    pub test_type: String,
    pub test_devices: String,
    pub app_package_id: String,
    pub test_timeout: String,

    // instrumentation
    pub inst_test_package_id: String,
    pub inst_test_runner_class: String,
    pub inst_test_targets: String,

    // robo
    pub robo_initial_activity: String,
    pub robo_max_depth: String,
    pub robo_max_steps: String,
    pub robo_directives: String,

    // gameloop
    pub loop_scenarios: String,
    pub loop_scenario_labels: String,
}

/// Kind of test run on the devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// Instrumentation tests from a separate test package.
    Instrumentation,
    /// Automated UI exploration, optionally scripted with directives.
    Robo,
    /// Game-loop scenarios driven by the app itself.
    Gameloop,
}

impl TestType {
    pub const ALL: [TestType; 3] = [TestType::Instrumentation, TestType::Robo, TestType::Gameloop];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Instrumentation => "instrumentation",
            TestType::Robo => "robo",
            TestType::Gameloop => "gameloop",
        }
    }

    /// Whether this test type needs a test artifact next to the app.
    pub fn requires_test_artifact(&self) -> bool {
        matches!(self, TestType::Instrumentation)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Revision of the remote API.
///
/// The revisions disagree on what submission returns and on the shape of the
/// status document, so the choice is made once here and flows through the
/// client and the status decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Submission answers a bare 200; status is a flat list of steps polled at
    /// the submission URL.
    #[default]
    Steps,
    /// Submission returns `{testMatrixId}`; status is a matrix document polled
    /// at the submission URL plus the matrix id.
    Matrix,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::Steps => f.write_str("steps"),
            ApiVersion::Matrix => f.write_str("matrix"),
        }
    }
}

/// Root of the optional `labrun.toml` settings file.
///
/// # Example
///
/// ```toml
/// [poll]
/// api_version = "matrix"
/// interval_secs = 10
/// grace_secs = 300
///
/// [report]
/// junit = true
/// junit_file = "results/devices.xml"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub report: ReportSettings,
}

/// Polling policy.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `api_version` | `steps` |
/// | `interval_secs` | 5 |
/// | `grace_secs` | 600 |
/// | `default_max_wait_secs` | 3600 |
/// | `max_wait_secs` | unset |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollSettings {
    /// Which API revision the server speaks.
    #[serde(default)]
    pub api_version: ApiVersion,

    /// Fixed delay before every status request.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Added to the submitted test timeout to form the wait ceiling.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Wait ceiling used when no test timeout was given.
    #[serde(default = "default_max_wait")]
    pub default_max_wait_secs: u64,

    /// Fixed wait ceiling, replacing the derived one when set.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

fn default_interval() -> u64 {
    5
}

fn default_grace() -> u64 {
    600 // 10 minutes
}

fn default_max_wait() -> u64 {
    3600 // 1 hour
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            api_version: ApiVersion::default(),
            interval_secs: default_interval(),
            grace_secs: default_grace(),
            default_max_wait_secs: default_max_wait(),
            max_wait_secs: None,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Total time the poller may wait for a terminal state.
    ///
    /// `test_timeout_secs` is the timeout submitted with the matrix, if any.
    pub fn max_wait(&self, test_timeout_secs: Option<u64>) -> Duration {
        if let Some(secs) = self.max_wait_secs {
            return Duration::from_secs(secs);
        }
        match test_timeout_secs {
            Some(secs) => Duration::from_secs(secs.saturating_add(self.grace_secs)),
            None => Duration::from_secs(self.default_max_wait_secs),
        }
    }
}

/// Report output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportSettings {
    /// Write a JUnit XML file with one test case per device.
    #[serde(default)]
    pub junit: bool,

    /// Path of the JUnit XML file.
    #[serde(default = "default_junit_file")]
    pub junit_file: PathBuf,
}

fn default_junit_file() -> PathBuf {
    PathBuf::from("labrun-junit.xml")
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            junit: false,
            junit_file: default_junit_file(),
        }
    }
}
