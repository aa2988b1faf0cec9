//! Client for the remote device-testing API.
//!
//! The [`TestLab`] trait is the seam between the pipeline and the network:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          TestLab                            │
//! │                                                             │
//! │  request_upload_slots() ──► UploadSlots {app_url, ...}      │
//! │  upload_file(url, path)     PUT, streamed, expect 200       │
//! │  submit(&TestMatrix) ─────► Submission {matrix_id?}         │
//! │  fetch_status(&Submission) ► RunStatus                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`HttpTestLab`] implements it over `reqwest`. Nothing here retries: every
//! failure is returned to the caller as an [`ApiError`].

#[cfg(test)]
pub(crate) mod fake;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use serde::Deserialize;
use tracing::debug;

use crate::config::{ApiVersion, StepConfig};
use crate::matrix::TestMatrix;
use crate::status::RunStatus;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors from talking to the remote API.
///
/// Every variant names the operation and the URL or path involved.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be built or sent, or the response body could
    /// not be read.
    #[error("{op}: request to {url} failed: {source}")]
    Transport {
        op: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with an unexpected status code.
    #[error("{op}: {url} answered with status {status}: {body}")]
    Status {
        op: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The response body was not the expected JSON document.
    #[error("{op}: failed to decode response from {url}: {source}, body: {body}")]
    Decode {
        op: &'static str,
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    /// An artifact upload was answered with something other than 200.
    #[error("Failed to upload file ({}) to ({url}), response code was: {status}", .path.display())]
    Upload {
        path: PathBuf,
        url: String,
        status: u16,
    },

    /// An artifact could not be opened or inspected.
    #[error("Failed to open archive file for upload ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Signed URLs the artifacts are uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlots {
    pub app_url: String,
    #[serde(default)]
    pub test_app_url: String,
}

/// What the API handed back when the matrix was submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Token identifying the matrix, when the API revision returns one.
    pub matrix_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    test_matrix_id: String,
}

/// Operations the pipeline needs from the remote service.
#[async_trait]
pub trait TestLab: Send + Sync {
    /// Asks for upload URLs for the app and test artifacts.
    async fn request_upload_slots(&self) -> ApiResult<UploadSlots>;

    /// Streams the file at `path` to `url`.
    async fn upload_file(&self, url: &str, path: &Path) -> ApiResult<()>;

    /// Submits the matrix and starts the run.
    async fn submit(&self, matrix: &TestMatrix) -> ApiResult<Submission>;

    /// Fetches the current status of a submitted run.
    async fn fetch_status(&self, submission: &Submission) -> ApiResult<RunStatus>;
}

/// [`TestLab`] over HTTP.
///
/// One `reqwest::Client` is shared by every call.
///
/// # Example
///
/// ```
/// use labrun::api::HttpTestLab;
/// use labrun::config::ApiVersion;
///
/// let lab = HttpTestLab::new("https://lab.example.com/", "app-1", "build-7", ApiVersion::Steps);
/// assert_eq!(lab.submit_url(), "https://lab.example.com/app-1/build-7");
/// ```
#[derive(Clone)]
pub struct HttpTestLab {
    base_url: String,
    app_slug: String,
    build_slug: String,
    api_version: ApiVersion,
    http: reqwest::Client,
}

impl HttpTestLab {
    pub fn new(
        base_url: impl Into<String>,
        app_slug: impl Into<String>,
        build_slug: impl Into<String>,
        api_version: ApiVersion,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_slug: app_slug.into(),
            build_slug: build_slug.into(),
            api_version,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &StepConfig, api_version: ApiVersion) -> Self {
        Self::new(
            config.api_base_url.as_str(),
            config.app_slug.as_str(),
            config.build_slug.as_str(),
            api_version,
        )
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// `{base}/assets/{appSlug}/{buildSlug}`
    pub fn assets_url(&self) -> String {
        format!("{}/assets/{}/{}", self.base_url, self.app_slug, self.build_slug)
    }

    /// `{base}/{appSlug}/{buildSlug}`
    pub fn submit_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.app_slug, self.build_slug)
    }

    /// The submission URL, plus the matrix id when one was returned.
    pub fn status_url(&self, submission: &Submission) -> String {
        match &submission.matrix_id {
            Some(id) => format!("{}/{}", self.submit_url(), id),
            None => self.submit_url(),
        }
    }

    /// Sends a request and reads the whole body.
    async fn send(
        &self,
        op: &'static str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> ApiResult<(StatusCode, Vec<u8>)> {
        let transport = |source| ApiError::Transport {
            op,
            url: url.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        debug!("{} {} -> {} ({} bytes)", op, url, status, body.len());
        Ok((status, body.to_vec()))
    }
}

fn status_error(op: &'static str, url: &str, status: StatusCode, body: &[u8]) -> ApiError {
    ApiError::Status {
        op,
        url: url.to_string(),
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

fn decode_error(op: &'static str, url: &str, body: &[u8], source: serde_json::Error) -> ApiError {
    ApiError::Decode {
        op,
        url: url.to_string(),
        body: String::from_utf8_lossy(body).into_owned(),
        source,
    }
}

#[async_trait]
impl TestLab for HttpTestLab {
    async fn request_upload_slots(&self) -> ApiResult<UploadSlots> {
        const OP: &str = "request upload urls";
        let url = self.assets_url();

        let (status, body) = self.send(OP, &url, self.http.post(&url)).await?;
        if !status.is_success() {
            return Err(status_error(OP, &url, status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| decode_error(OP, &url, &body, e))
    }

    async fn upload_file(&self, url: &str, path: &Path) -> ApiResult<()> {
        let io_error = |source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let size = file.metadata().await.map_err(io_error)?.len();

        debug!("Uploading {} ({} bytes) to {}", path.display(), size, url);

        // The body owns the file handle; it is closed when the request ends.
        let stream = tokio_util::io::ReaderStream::new(file);
        let request = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(stream));

        let (status, _) = self.send("upload artifact", url, request).await?;
        if status != StatusCode::OK {
            return Err(ApiError::Upload {
                path: path.to_path_buf(),
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    async fn submit(&self, matrix: &TestMatrix) -> ApiResult<Submission> {
        const OP: &str = "start test";
        let url = self.submit_url();

        let request = self.http.post(&url).json(matrix);
        let (status, body) = self.send(OP, &url, request).await?;

        match self.api_version {
            ApiVersion::Steps => {
                if status != StatusCode::OK {
                    return Err(status_error(OP, &url, status, &body));
                }
                Ok(Submission::default())
            }
            ApiVersion::Matrix => {
                if !status.is_success() {
                    return Err(status_error(OP, &url, status, &body));
                }
                let response: SubmitResponse = serde_json::from_slice(&body)
                    .map_err(|e| decode_error(OP, &url, &body, e))?;
                Ok(Submission {
                    matrix_id: Some(response.test_matrix_id),
                })
            }
        }
    }

    async fn fetch_status(&self, submission: &Submission) -> ApiResult<RunStatus> {
        const OP: &str = "fetch test status";
        let url = self.status_url(submission);

        let request = self.http.get(&url).header(ACCEPT, "application/json");
        let (status, body) = self.send(OP, &url, request).await?;
        if !status.is_success() {
            return Err(status_error(OP, &url, status, &body));
        }

        RunStatus::decode(self.api_version, &body).map_err(|e| decode_error(OP, &url, &body, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_matrix;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn lab(server: &MockServer, version: ApiVersion) -> HttpTestLab {
        HttpTestLab::new(server.base_url(), "app-1", "build-7", version)
    }

    fn sample_matrix() -> TestMatrix {
        let config = StepConfig {
            test_type: "robo".to_string(),
            test_devices: "Pixel2,28,en,portrait".to_string(),
            test_timeout: "120".to_string(),
            ..Default::default()
        };
        build_matrix(&config).unwrap()
    }

    #[test]
    fn test_urls() {
        let lab = HttpTestLab::new("http://lab.local/api/", "a", "b", ApiVersion::Matrix);
        assert_eq!(lab.api_version(), ApiVersion::Matrix);
        assert_eq!(lab.assets_url(), "http://lab.local/api/assets/a/b");
        assert_eq!(lab.submit_url(), "http://lab.local/api/a/b");
        assert_eq!(lab.status_url(&Submission::default()), "http://lab.local/api/a/b");
        assert_eq!(
            lab.status_url(&Submission {
                matrix_id: Some("m-1".to_string())
            }),
            "http://lab.local/api/a/b/m-1"
        );
    }

    #[tokio::test]
    async fn test_request_upload_slots() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/assets/app-1/build-7");
                then.status(200).json_body(json!({
                    "appUrl": "http://storage/app",
                    "testAppUrl": "http://storage/test"
                }));
            })
            .await;

        let slots = lab(&server, ApiVersion::Steps).request_upload_slots().await.unwrap();
        mock.assert_async().await;
        assert_eq!(slots.app_url, "http://storage/app");
        assert_eq!(slots.test_app_url, "http://storage/test");
    }

    #[tokio::test]
    async fn test_request_upload_slots_non_2xx_is_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/assets/app-1/build-7");
                then.status(403).body("forbidden");
            })
            .await;

        let err = lab(&server, ApiVersion::Steps).request_upload_slots().await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 403, .. }));
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_request_upload_slots_bad_json() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/assets/app-1/build-7");
                then.status(200).body("<html>");
            })
            .await;

        let err = lab(&server, ApiVersion::Steps).request_upload_slots().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_upload_file_streams_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.apk");
        std::fs::write(&path, b"hello world").unwrap();

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/upload/app")
                    .header("content-length", "11")
                    .body("hello world");
                then.status(200);
            })
            .await;

        lab(&server, ApiVersion::Steps)
            .upload_file(&server.url("/upload/app"), &path)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_file_requires_200() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.apk");
        std::fs::write(&path, b"bytes").unwrap();

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/upload/app");
                then.status(201);
            })
            .await;

        let err = lab(&server, ApiVersion::Steps)
            .upload_file(&server.url("/upload/app"), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upload { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let server = MockServer::start_async().await;
        let err = lab(&server, ApiVersion::Steps)
            .upload_file(&server.url("/upload/app"), Path::new("/nonexistent/app.apk"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/app.apk"));
    }

    #[tokio::test]
    async fn test_submit_steps_discards_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/app-1/build-7")
                    .body_includes(r#""testTimeout":"120s""#);
                then.status(200).body("ok");
            })
            .await;

        let submission = lab(&server, ApiVersion::Steps).submit(&sample_matrix()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(submission.matrix_id, None);
    }

    #[tokio::test]
    async fn test_submit_steps_rejects_non_200() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/app-1/build-7");
                then.status(202);
            })
            .await;

        let err = lab(&server, ApiVersion::Steps).submit(&sample_matrix()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 202, .. }));
    }

    #[tokio::test]
    async fn test_submit_matrix_returns_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/app-1/build-7");
                then.status(200).json_body(json!({"testMatrixId": "matrix-42"}));
            })
            .await;

        let submission = lab(&server, ApiVersion::Matrix).submit(&sample_matrix()).await.unwrap();
        assert_eq!(submission.matrix_id.as_deref(), Some("matrix-42"));
    }

    #[tokio::test]
    async fn test_fetch_status_uses_matrix_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/app-1/build-7/matrix-42");
                then.status(200).json_body(json!({"state": "FINISHED", "testExecutions": []}));
            })
            .await;

        let submission = Submission {
            matrix_id: Some("matrix-42".to_string()),
        };
        let status = lab(&server, ApiVersion::Matrix).fetch_status(&submission).await.unwrap();
        mock.assert_async().await;
        assert!(status.is_finished());
    }

    #[tokio::test]
    async fn test_fetch_status_decode_error_includes_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/app-1/build-7");
                then.status(200).body("{\"steps\": \"nope\"}");
            })
            .await;

        let err = lab(&server, ApiVersion::Steps)
            .fetch_status(&Submission::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on port 9 of localhost in the test environment.
        let lab = HttpTestLab::new("http://127.0.0.1:9", "a", "b", ApiVersion::Steps);
        let err = lab.request_upload_slots().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
    }
}
