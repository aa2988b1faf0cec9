//! In-memory [`TestLab`] for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ApiError, ApiResult, Submission, TestLab, UploadSlots};
use crate::matrix::TestMatrix;
use crate::status::{
    DimensionValue, ExecutionEnvironment, FailureDetail, MatrixStatus, Outcome, RunStatus, Step,
    StepList, TestDetails, TestExecution,
};

pub const APP_SLOT: &str = "http://storage.local/app";
pub const TEST_SLOT: &str = "http://storage.local/test";

/// A call the fake received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UploadSlots,
    Upload { url: String, path: PathBuf },
    Submit(TestMatrix),
    FetchStatus(Submission),
}

/// Scripted [`TestLab`]: hands out the queued statuses one per fetch and
/// repeats the last one once the queue is drained.
pub struct FakeLab {
    calls: Mutex<Vec<Call>>,
    statuses: Mutex<VecDeque<RunStatus>>,
    last_status: Mutex<Option<RunStatus>>,
    failing_upload: Option<(String, u16)>,
    status_error: Option<u16>,
    matrix_id: Option<String>,
}

impl FakeLab {
    pub fn new(statuses: Vec<RunStatus>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(None),
            failing_upload: None,
            status_error: None,
            matrix_id: None,
        }
    }

    /// Uploads to `url` are answered with `status`.
    pub fn with_failing_upload(mut self, url: &str, status: u16) -> Self {
        self.failing_upload = Some((url.to_string(), status));
        self
    }

    /// Status fetches are answered with `status`.
    pub fn with_status_error(mut self, status: u16) -> Self {
        self.status_error = Some(status);
        self
    }

    /// Submission returns `id` as the matrix token.
    pub fn with_matrix_id(mut self, id: &str) -> Self {
        self.matrix_id = Some(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::FetchStatus(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TestLab for FakeLab {
    async fn request_upload_slots(&self) -> ApiResult<UploadSlots> {
        self.record(Call::UploadSlots);
        Ok(UploadSlots {
            app_url: APP_SLOT.to_string(),
            test_app_url: TEST_SLOT.to_string(),
        })
    }

    async fn upload_file(&self, url: &str, path: &Path) -> ApiResult<()> {
        self.record(Call::Upload {
            url: url.to_string(),
            path: path.to_path_buf(),
        });
        match &self.failing_upload {
            Some((failing, status)) if failing == url => Err(ApiError::Upload {
                path: path.to_path_buf(),
                url: url.to_string(),
                status: *status,
            }),
            _ => Ok(()),
        }
    }

    async fn submit(&self, matrix: &TestMatrix) -> ApiResult<Submission> {
        self.record(Call::Submit(matrix.clone()));
        Ok(Submission {
            matrix_id: self.matrix_id.clone(),
        })
    }

    async fn fetch_status(&self, submission: &Submission) -> ApiResult<RunStatus> {
        self.record(Call::FetchStatus(submission.clone()));

        if let Some(status) = self.status_error {
            return Err(ApiError::Status {
                op: "fetch test status",
                url: "http://lab.local/status".to_string(),
                status,
                body: String::new(),
            });
        }

        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        Ok(last
            .clone()
            .unwrap_or_else(|| RunStatus::Steps(StepList::default())))
    }
}

/// A `steps` status with one step per `(state, summary)`; devices are named
/// `Device0`, `Device1`, ...
///
/// A `failure` summary gets the `crashed` flag.
pub fn steps_status(steps: &[(&str, Option<&str>)]) -> RunStatus {
    let steps = steps
        .iter()
        .enumerate()
        .map(|(i, (state, summary))| Step {
            state: state.to_string(),
            outcome: summary.map(|s| Outcome {
                summary: s.to_string(),
                failure_detail: (s == "failure").then(|| FailureDetail {
                    crashed: true,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            dimension_value: vec![
                dimension("Model", &format!("Device{}", i)),
                dimension("Version", "28"),
                dimension("Locale", "en"),
                dimension("Orientation", "portrait"),
            ],
        })
        .collect();

    RunStatus::Steps(StepList { steps })
}

/// A `matrix` status in `state` with one execution per progress list.
pub fn matrix_status(state: &str, executions: &[&[&str]]) -> RunStatus {
    let test_executions = executions
        .iter()
        .map(|messages| TestExecution {
            state: state.to_string(),
            environment: Some(ExecutionEnvironment::default()),
            test_details: Some(TestDetails {
                progress_messages: messages.iter().map(|m| m.to_string()).collect(),
                error_message: None,
            }),
            outcome: (state == "FINISHED").then(|| Outcome {
                summary: "success".to_string(),
                ..Default::default()
            }),
        })
        .collect();

    RunStatus::Matrix(MatrixStatus {
        test_matrix_id: "matrix-1".to_string(),
        state: state.to_string(),
        test_executions,
    })
}

fn dimension(key: &str, value: &str) -> DimensionValue {
    DimensionValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
