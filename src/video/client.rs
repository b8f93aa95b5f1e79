//! useapi.net client for MiniMax (Hailuo) video generation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Seconds to wait when a 429 arrives without a usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 120;

/// Fields shared by every submission; only the prompt varies per request.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub account: String,
    /// Reference image the video is generated from.
    pub file_id: String,
    pub model: String,
    pub max_jobs: u32,
    pub prompt_optimization: bool,
    pub reply_url: Option<String>,
    pub reply_ref: Option<String>,
}

impl JobTemplate {
    pub fn request(&self, prompt: &str) -> SubmitRequest {
        SubmitRequest {
            account: self.account.clone(),
            prompt: prompt.to_string(),
            prompt_optimization: self.prompt_optimization,
            file_id: self.file_id.clone(),
            model: self.model.clone(),
            max_jobs: self.max_jobs,
            reply_url: self.reply_url.clone(),
            reply_ref: self.reply_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub account: String,
    pub prompt: String,
    #[serde(rename = "promptOptimization")]
    pub prompt_optimization: bool,
    #[serde(rename = "fileID")]
    pub file_id: String,
    pub model: String,
    #[serde(rename = "maxJobs")]
    pub max_jobs: u32,
    #[serde(rename = "replyUrl", skip_serializing_if = "Option::is_none")]
    pub reply_url: Option<String>,
    #[serde(rename = "replyRef", skip_serializing_if = "Option::is_none")]
    pub reply_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

/// Body of `GET .../videos/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoStatus {
    #[serde(rename = "videoURL")]
    pub video_url: Option<String>,
    #[serde(rename = "statusFinal", default)]
    pub status_final: bool,
    #[serde(rename = "statusLabel")]
    pub status_label: Option<String>,
    pub percent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never got a response.
    Http(String),
    /// HTTP 429 from the service.
    RateLimited { retry_after_secs: u64 },
    /// Any other non-success status. `body` is surfaced verbatim.
    Rejected { status: u16, body: String },
    /// The body was not the JSON we expected.
    Decode(String),
    /// The body decoded but lacked a field we need.
    MissingField(&'static str),
}

impl ApiError {
    /// Worth another status check rather than giving up on the job.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(_) | ApiError::RateLimited { .. } => true,
            ApiError::Rejected { status, .. } => *status >= 500,
            ApiError::Decode(_) | ApiError::MissingField(_) => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(e) => write!(f, "HTTP error: {e}"),
            ApiError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            ApiError::Rejected { status, body } => write!(f, "USEAPI returned {status}: {body}"),
            ApiError::Decode(e) => write!(f, "Failed to parse response: {e}"),
            ApiError::MissingField(field) => write!(f, "response has no {field}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// The two calls the workflow needs from the video service.
pub trait VideoApi: Send + Sync {
    /// Create a job and return its id.
    fn submit(&self, request: &SubmitRequest) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn status(&self, video_id: &str) -> impl Future<Output = Result<VideoStatus, ApiError>> + Send;
}

pub struct UseApiClient {
    token: String,
    submit_url: String,
    status_url: String,
    client: reqwest::Client,
}

impl UseApiClient {
    pub fn new(token: String, submit_url: String, status_url: String) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self::with_client(client, token, submit_url, status_url))
    }

    pub fn with_client(
        client: reqwest::Client,
        token: String,
        submit_url: String,
        status_url: String,
    ) -> Self {
        Self {
            token,
            submit_url,
            status_url,
            client,
        }
    }

    /// Ids look like `user:1-minimax:2-video:3`; colons stay literal in the path.
    fn status_endpoint(&self, video_id: &str) -> String {
        let segment = urlencoding::encode(video_id).replace("%3A", ":");
        format!("{}/{}", self.status_url, segment)
    }
}

impl VideoApi for UseApiClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, ApiError> {
        info!("🎬 Submitting video job: {}", request.prompt);

        let response = self
            .client
            .post(&self.submit_url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let body = read_checked(response).await?;
        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;

        let video_id = parsed
            .video_id
            .filter(|id| !id.is_empty())
            .ok_or(ApiError::MissingField("videoId"))?;

        info!("🎬 Job accepted: {}", video_id);
        Ok(video_id)
    }

    async fn status(&self, video_id: &str) -> Result<VideoStatus, ApiError> {
        let response = self
            .client
            .get(self.status_endpoint(video_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let body = read_checked(response).await?;
        debug!("Video data for {video_id}: {body}");

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Turn non-success statuses into errors, return the body otherwise.
async fn read_checked(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after_secs(header),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Http(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(ApiError::Rejected {
            status: status.as_u16(),
            body: compact_json(&body),
        });
    }

    Ok(body)
}

/// Seconds from a `Retry-After` header, or the default when absent or not a number.
///
/// Only the leading digits count, so `"45.5"` and `"45, 60"` both give 45.
pub fn retry_after_secs(header: Option<&str>) -> u64 {
    header
        .map(str::trim_start)
        .and_then(|v| {
            let digits = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
            v[..digits].parse::<u64>().ok()
        })
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Re-serialize JSON error bodies on one line; leave anything else as is.
fn compact_json(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> JobTemplate {
        JobTemplate {
            account: "331665158743891972".to_string(),
            file_id: "user:1-minimax:2-file:3".to_string(),
            model: "I2V-01".to_string(),
            max_jobs: 2,
            prompt_optimization: true,
            reply_url: None,
            reply_ref: None,
        }
    }

    #[test]
    fn test_submit_payload_field_names() {
        let request = template().request("A cat riding a bicycle");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "account": "331665158743891972",
                "prompt": "A cat riding a bicycle",
                "promptOptimization": true,
                "fileID": "user:1-minimax:2-file:3",
                "model": "I2V-01",
                "maxJobs": 2
            })
        );
    }

    #[test]
    fn test_submit_payload_includes_callback_when_set() {
        let mut t = template();
        t.reply_url = Some("https://bot.example.com/done".to_string());
        t.reply_ref = Some("ref-7".to_string());
        let json = serde_json::to_value(t.request("x")).unwrap();

        assert_eq!(json["replyUrl"], "https://bot.example.com/done");
        assert_eq!(json["replyRef"], "ref-7");
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(retry_after_secs(Some("45")), 45);
        assert_eq!(retry_after_secs(Some(" 10 ")), 10);
        assert_eq!(retry_after_secs(None), 120);
        assert_eq!(retry_after_secs(Some("soon")), 120);
        assert_eq!(retry_after_secs(Some("0")), 120);
        assert_eq!(retry_after_secs(Some("45.5")), 45);
        assert_eq!(retry_after_secs(Some("45, 60")), 45);
        assert_eq!(retry_after_secs(Some("")), 120);
    }

    #[test]
    fn test_status_decoding() {
        let pending: VideoStatus = serde_json::from_str(r#"{"statusFinal": false}"#).unwrap();
        assert!(pending.video_url.is_none());
        assert!(!pending.status_final);

        let ready: VideoStatus =
            serde_json::from_str(r#"{"videoURL": "https://x/y.mp4", "statusLabel": "completed"}"#).unwrap();
        assert_eq!(ready.video_url.as_deref(), Some("https://x/y.mp4"));
        assert_eq!(ready.status_label.as_deref(), Some("completed"));

        // statusFinal defaults to false so an empty object keeps the job polling
        let empty: VideoStatus = serde_json::from_str("{}").unwrap();
        assert!(!empty.status_final);
    }

    #[test]
    fn test_submit_response_without_id() {
        let parsed: SubmitResponse = serde_json::from_str(r#"{"status": "queued"}"#).unwrap();
        assert!(parsed.video_id.is_none());
    }

    #[test]
    fn test_transient_errors() {
        assert!(ApiError::Http("reset".into()).is_transient());
        assert!(ApiError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(ApiError::Rejected { status: 502, body: String::new() }.is_transient());
        assert!(!ApiError::Rejected { status: 404, body: String::new() }.is_transient());
        assert!(!ApiError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_error_body_compacted() {
        assert_eq!(compact_json("{\n  \"error\": \"bad\"\n}"), r#"{"error":"bad"}"#);
        assert_eq!(compact_json(" oops \n"), "oops");
    }

    mod responses {
        use super::*;
        use crate::video::tests::canned_http::{response, serve_once};

        async fn client_for(raw: String) -> UseApiClient {
            let base = serve_once(raw).await;
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            UseApiClient::with_client(
                client,
                "secret".to_string(),
                format!("{base}/v1/minimax/videos/create"),
                format!("{base}/v1/minimax/videos"),
            )
        }

        #[tokio::test]
        async fn test_429_reads_retry_after_header() {
            let api = client_for(response("429 Too Many Requests", &[("retry-after", "45")], "")).await;
            let result = api.submit(&template().request("x")).await;
            assert_eq!(result, Err(ApiError::RateLimited { retry_after_secs: 45 }));
        }

        #[tokio::test]
        async fn test_429_without_header_uses_default() {
            let api = client_for(response("429 Too Many Requests", &[], "slow down")).await;
            let result = api.submit(&template().request("x")).await;
            assert_eq!(result, Err(ApiError::RateLimited { retry_after_secs: 120 }));
        }

        #[tokio::test]
        async fn test_error_body_surfaced() {
            let body = "{\n  \"error\": \"Account 331665158743891972 not configured\"\n}";
            let api = client_for(response("400 Bad Request", &[("content-type", "application/json")], body)).await;
            let result = api.submit(&template().request("x")).await;
            assert_eq!(
                result,
                Err(ApiError::Rejected {
                    status: 400,
                    body: r#"{"error":"Account 331665158743891972 not configured"}"#.to_string(),
                })
            );
        }

        #[tokio::test]
        async fn test_success_without_video_id() {
            let api = client_for(response("200 OK", &[("content-type", "application/json")], "{}")).await;
            let result = api.submit(&template().request("x")).await;
            assert_eq!(result, Err(ApiError::MissingField("videoId")));
        }

        #[tokio::test]
        async fn test_success_returns_video_id() {
            let body = r#"{"videoId": "user:1-minimax:2-video:3"}"#;
            let api = client_for(response("200 OK", &[("content-type", "application/json")], body)).await;
            let result = api.submit(&template().request("x")).await;
            assert_eq!(result, Ok("user:1-minimax:2-video:3".to_string()));
        }

        #[tokio::test]
        async fn test_status_server_error_is_transient() {
            let api = client_for(response("503 Service Unavailable", &[], "maintenance")).await;
            let err = api.status("user:1-minimax:2-video:3").await.unwrap_err();
            assert_eq!(err, ApiError::Rejected { status: 503, body: "maintenance".to_string() });
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn test_status_decodes_ready_video() {
            let body = r#"{"videoURL": "https://cdn.example/v.mp4", "statusFinal": true, "percent": 100}"#;
            let api = client_for(response("200 OK", &[("content-type", "application/json")], body)).await;
            let status = api.status("user:1-minimax:2-video:3").await.unwrap();
            assert_eq!(status.video_url.as_deref(), Some("https://cdn.example/v.mp4"));
            assert!(status.status_final);
            assert_eq!(status.percent, Some(100));
        }
    }

    #[test]
    fn test_status_endpoint_keeps_colons() {
        let client = UseApiClient::new(
            "t".to_string(),
            "https://api.useapi.net/v1/minimax/videos/create".to_string(),
            "https://api.useapi.net/v1/minimax/videos".to_string(),
        )
        .unwrap();
        assert_eq!(
            client.status_endpoint("user:1-minimax:2-video:3"),
            "https://api.useapi.net/v1/minimax/videos/user:1-minimax:2-video:3"
        );
        assert_eq!(
            client.status_endpoint("a/b c"),
            "https://api.useapi.net/v1/minimax/videos/a%2Fb%20c"
        );
    }
}
