//! Run status documents and their decoders.
//!
//! The two API revisions describe a running matrix differently:
//!
//! | Version | Document | Finished when |
//! |---------|----------|---------------|
//! | `steps` | `{"steps": [...]}` | every step's `state` is `complete` |
//! | `matrix` | `{"state": ..., "testExecutions": [...]}` | `state` is `FINISHED` |
//!
//! [`RunStatus`] hides the difference behind one interface: terminal check,
//! progress messages, and per-device results.

use serde::Deserialize;

use crate::config::ApiVersion;
use crate::matrix::AndroidDevice;

/// Step state that marks a step as done.
pub const STEP_COMPLETE: &str = "complete";

/// Matrix state that marks a matrix as done.
pub const MATRIX_FINISHED: &str = "FINISHED";

/// A decoded status document.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Steps(StepList),
    Matrix(MatrixStatus),
}

impl RunStatus {
    /// Decodes a status body according to the API version.
    pub fn decode(version: ApiVersion, body: &[u8]) -> serde_json::Result<Self> {
        match version {
            ApiVersion::Steps => serde_json::from_slice(body).map(RunStatus::Steps),
            ApiVersion::Matrix => serde_json::from_slice(body).map(RunStatus::Matrix),
        }
    }

    /// Whether the run reached its terminal state.
    ///
    /// An empty step list has not started yet and counts as running. This
    /// deliberately differs from treating an empty list as all complete.
    pub fn is_finished(&self) -> bool {
        match self {
            RunStatus::Steps(list) => {
                !list.steps.is_empty() && list.steps.iter().all(|s| s.state == STEP_COMPLETE)
            }
            RunStatus::Matrix(matrix) => matrix.state == MATRIX_FINISHED,
        }
    }

    /// Progress messages reported so far, keyed by execution index.
    pub fn progress(&self) -> Vec<ProgressMessage> {
        match self {
            RunStatus::Steps(_) => Vec::new(),
            RunStatus::Matrix(matrix) => matrix
                .test_executions
                .iter()
                .enumerate()
                .flat_map(|(index, execution)| {
                    execution
                        .test_details
                        .iter()
                        .flat_map(|d| d.progress_messages.iter())
                        .map(move |message| ProgressMessage {
                            execution: index,
                            message: message.clone(),
                        })
                })
                .collect(),
        }
    }

    /// One result per step or execution, in the order the server sent them.
    pub fn device_results(&self) -> Vec<DeviceResult> {
        match self {
            RunStatus::Steps(list) => list.steps.iter().map(DeviceResult::from_step).collect(),
            RunStatus::Matrix(matrix) => matrix
                .test_executions
                .iter()
                .map(DeviceResult::from_execution)
                .collect(),
        }
    }
}

/// A progress line reported by one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressMessage {
    pub execution: usize,
    pub message: String,
}

/// `steps` status document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StepList {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub dimension_value: Vec<DimensionValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DimensionValue {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// `matrix` status document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixStatus {
    #[serde(default)]
    pub test_matrix_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub test_executions: Vec<TestExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecution {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub environment: Option<ExecutionEnvironment>,
    #[serde(default)]
    pub test_details: Option<TestDetails>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEnvironment {
    #[serde(default)]
    pub android_device: Option<AndroidDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    #[serde(default)]
    pub progress_messages: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Outcome of one step, shared by both documents.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub failure_detail: Option<FailureDetail>,
    #[serde(default)]
    pub inconclusive_detail: Option<InconclusiveDetail>,
    #[serde(default)]
    pub skipped_detail: Option<SkippedDetail>,
    #[serde(default)]
    pub success_detail: Option<SuccessDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    #[serde(default)]
    pub crashed: bool,
    #[serde(default)]
    pub not_installed: bool,
    #[serde(default)]
    pub other_native_crash: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub unable_to_crawl: bool,
}

impl FailureDetail {
    fn flags(&self) -> Vec<&'static str> {
        set_flags(&[
            (self.crashed, "Crashed"),
            (self.not_installed, "NotInstalled"),
            (self.other_native_crash, "OtherNativeCrash"),
            (self.timed_out, "TimedOut"),
            (self.unable_to_crawl, "UnableToCrawl"),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InconclusiveDetail {
    #[serde(default)]
    pub aborted_by_user: bool,
    #[serde(default)]
    pub infrastructure_failure: bool,
}

impl InconclusiveDetail {
    fn flags(&self) -> Vec<&'static str> {
        set_flags(&[
            (self.aborted_by_user, "AbortedByUser"),
            (self.infrastructure_failure, "InfrastructureFailure"),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDetail {
    #[serde(default)]
    pub incompatible_app_version: bool,
    #[serde(default)]
    pub incompatible_architecture: bool,
    #[serde(default)]
    pub incompatible_device: bool,
}

impl SkippedDetail {
    fn flags(&self) -> Vec<&'static str> {
        set_flags(&[
            (self.incompatible_app_version, "IncompatibleAppVersion"),
            (self.incompatible_architecture, "IncompatibleArchitecture"),
            (self.incompatible_device, "IncompatibleDevice"),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessDetail {
    #[serde(default)]
    pub other_native_crash: bool,
}

fn set_flags(flags: &[(bool, &'static str)]) -> Vec<&'static str> {
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect()
}

/// Outcome summary of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeSummary {
    Success,
    Failure,
    Inconclusive,
    Skipped,
    /// A summary this client does not know, or none at all.
    Unknown(String),
}

impl OutcomeSummary {
    pub fn parse(summary: &str) -> Self {
        match summary {
            "success" => OutcomeSummary::Success,
            "failure" => OutcomeSummary::Failure,
            "inconclusive" => OutcomeSummary::Inconclusive,
            "skipped" => OutcomeSummary::Skipped,
            other => OutcomeSummary::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OutcomeSummary::Success => "success",
            OutcomeSummary::Failure => "failure",
            OutcomeSummary::Inconclusive => "inconclusive",
            OutcomeSummary::Skipped => "skipped",
            OutcomeSummary::Unknown(s) => s,
        }
    }
}

/// A row of the final report: one device and how it fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResult {
    pub model: String,
    pub version: String,
    pub locale: String,
    pub orientation: String,
    pub summary: OutcomeSummary,
    /// Detail flags of the summary's category, in declaration order.
    pub flags: Vec<&'static str>,
}

impl DeviceResult {
    fn from_step(step: &Step) -> Self {
        let dimension = |key: &str| {
            step.dimension_value
                .iter()
                .find(|d| d.key == key)
                .map(|d| d.value.clone())
                .unwrap_or_default()
        };

        let (summary, flags) = summarize(step.outcome.as_ref());

        Self {
            model: dimension("Model"),
            version: dimension("Version"),
            locale: dimension("Locale"),
            orientation: dimension("Orientation"),
            summary,
            flags,
        }
    }

    fn from_execution(execution: &TestExecution) -> Self {
        let device = execution
            .environment
            .as_ref()
            .and_then(|e| e.android_device.clone())
            .unwrap_or_default();

        let (summary, flags) = summarize(execution.outcome.as_ref());

        Self {
            model: device.android_model_id,
            version: device.android_version_id,
            locale: device.locale,
            orientation: device.orientation,
            summary,
            flags,
        }
    }

    pub fn is_success(&self) -> bool {
        self.summary == OutcomeSummary::Success
    }

    /// Outcome column text, e.g. `failure(Crashed)(TimedOut)`.
    pub fn outcome_text(&self) -> String {
        let mut text = self.summary.as_str().to_string();
        for flag in &self.flags {
            text.push('(');
            text.push_str(flag);
            text.push(')');
        }
        text
    }
}

fn summarize(outcome: Option<&Outcome>) -> (OutcomeSummary, Vec<&'static str>) {
    let Some(outcome) = outcome else {
        return (OutcomeSummary::Unknown(String::new()), Vec::new());
    };

    let summary = OutcomeSummary::parse(&outcome.summary);
    let flags = match summary {
        OutcomeSummary::Failure => outcome.failure_detail.as_ref().map(FailureDetail::flags),
        OutcomeSummary::Inconclusive => outcome
            .inconclusive_detail
            .as_ref()
            .map(InconclusiveDetail::flags),
        OutcomeSummary::Skipped => outcome.skipped_detail.as_ref().map(SkippedDetail::flags),
        OutcomeSummary::Success | OutcomeSummary::Unknown(_) => None,
    };

    (summary, flags.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS_DONE: &str = r#"{
        "steps": [
            {
                "state": "complete",
                "outcome": {"summary": "success"},
                "dimensionValue": [
                    {"key": "Model", "value": "Pixel2"},
                    {"key": "Version", "value": "28"},
                    {"key": "Locale", "value": "en"},
                    {"key": "Orientation", "value": "portrait"}
                ]
            },
            {
                "state": "complete",
                "outcome": {"summary": "failure", "failureDetail": {"crashed": true}},
                "dimensionValue": [
                    {"key": "Orientation", "value": "landscape"},
                    {"key": "Model", "value": "Nexus5"},
                    {"key": "Version", "value": "23"},
                    {"key": "Locale", "value": "de"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_decode_steps_finished() {
        let status = RunStatus::decode(ApiVersion::Steps, STEPS_DONE.as_bytes()).unwrap();
        assert!(status.is_finished());
        assert!(status.progress().is_empty());

        let results = status.device_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].model, "Pixel2");
        assert_eq!(results[0].outcome_text(), "success");
        assert!(results[0].is_success());
        assert_eq!(results[1].model, "Nexus5");
        assert_eq!(results[1].orientation, "landscape");
        assert_eq!(results[1].outcome_text(), "failure(Crashed)");
        assert!(!results[1].is_success());
    }

    #[test]
    fn test_steps_running_until_all_complete() {
        let body = r#"{"steps": [{"state": "complete"}, {"state": "inProgress"}]}"#;
        let status = RunStatus::decode(ApiVersion::Steps, body.as_bytes()).unwrap();
        assert!(!status.is_finished());
    }

    #[test]
    fn test_steps_empty_list_is_running() {
        let status = RunStatus::decode(ApiVersion::Steps, b"{}").unwrap();
        assert!(!status.is_finished());
        assert!(status.device_results().is_empty());
    }

    #[test]
    fn test_decode_matrix_with_progress() {
        let body = r#"{
            "testMatrixId": "matrix-1",
            "state": "RUNNING",
            "testExecutions": [
                {
                    "state": "RUNNING",
                    "environment": {"androidDevice": {"androidModelId": "Pixel2", "androidVersionId": "28", "locale": "en", "orientation": "portrait"}},
                    "testDetails": {"progressMessages": ["Starting", "Installing"]}
                },
                {
                    "state": "PENDING",
                    "testDetails": {"progressMessages": ["Starting"]}
                }
            ]
        }"#;
        let status = RunStatus::decode(ApiVersion::Matrix, body.as_bytes()).unwrap();
        assert!(!status.is_finished());

        let progress = status.progress();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0], ProgressMessage { execution: 0, message: "Starting".into() });
        assert_eq!(progress[1], ProgressMessage { execution: 0, message: "Installing".into() });
        assert_eq!(progress[2], ProgressMessage { execution: 1, message: "Starting".into() });
    }

    #[test]
    fn test_matrix_finished_results() {
        let body = r#"{
            "state": "FINISHED",
            "testExecutions": [
                {
                    "state": "FINISHED",
                    "environment": {"androidDevice": {"androidModelId": "Pixel2", "androidVersionId": "28", "locale": "en", "orientation": "portrait"}},
                    "outcome": {"summary": "skipped", "skippedDetail": {"incompatibleDevice": true, "incompatibleAppVersion": true}}
                }
            ]
        }"#;
        let status = RunStatus::decode(ApiVersion::Matrix, body.as_bytes()).unwrap();
        assert!(status.is_finished());

        let results = status.device_results();
        assert_eq!(results[0].version, "28");
        assert_eq!(
            results[0].outcome_text(),
            "skipped(IncompatibleAppVersion)(IncompatibleDevice)"
        );
    }

    #[test]
    fn test_flags_only_from_matching_category() {
        let outcome = Outcome {
            summary: "inconclusive".to_string(),
            failure_detail: Some(FailureDetail {
                crashed: true,
                ..Default::default()
            }),
            inconclusive_detail: Some(InconclusiveDetail {
                aborted_by_user: false,
                infrastructure_failure: true,
            }),
            ..Default::default()
        };
        let (summary, flags) = summarize(Some(&outcome));
        assert_eq!(summary, OutcomeSummary::Inconclusive);
        assert_eq!(flags, vec!["InfrastructureFailure"]);
    }

    #[test]
    fn test_missing_or_unknown_outcome_is_not_success() {
        let (summary, _) = summarize(None);
        assert_eq!(summary, OutcomeSummary::Unknown(String::new()));

        let outcome = Outcome {
            summary: "flaky".to_string(),
            ..Default::default()
        };
        let (summary, flags) = summarize(Some(&outcome));
        assert_eq!(summary.as_str(), "flaky");
        assert!(flags.is_empty());
    }

    #[test]
    fn test_decode_error_on_wrong_shape() {
        assert!(RunStatus::decode(ApiVersion::Steps, b"{\"steps\": 3}").is_err());
        assert!(RunStatus::decode(ApiVersion::Matrix, b"not json").is_err());
    }
}
