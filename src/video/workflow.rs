//! Submit a prompt, poll the job, deliver the result.
//!
//! A job moves `Submitting → Polling → Delivered | Failed | TimedOut`.
//! Nothing is persisted: a restart mid-poll loses the job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::video::admission::{Admission, AdmissionGate};
use crate::video::client::{ApiError, JobTemplate, VideoApi, VideoStatus};
use crate::video::telegram::{ReplyTarget, Replier};

pub const USAGE_HINT: &str =
    "Please provide a prompt after /generate. Example: /generate A cat riding a bicycle";
pub const ACK_TEXT: &str = "Generating video... Please wait.";
pub const VIDEO_CAPTION: &str = "Here's your video!";
pub const NO_VIDEO_URL: &str = "Could not retrieve video URL from Hailuo AI response.";

/// How often and how long to check on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            max_attempts: 90,
        }
    }
}

/// One `/generate` command.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub requester: i64,
    pub target: ReplyTarget,
    pub prompt: Option<String>,
    pub received_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Final,
    /// Last status check failed; state on the service side is not known.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: String,
    pub prompt: String,
    pub file_id: String,
    pub status: JobStatus,
    pub video_url: Option<String>,
    pub target: ReplyTarget,
}

impl GenerationJob {
    fn apply(&mut self, status: &VideoStatus) {
        self.video_url = status.video_url.clone().filter(|url| !url.is_empty());
        self.status = if self.video_url.is_some() || status.status_final {
            JobStatus::Final
        } else {
            JobStatus::Pending
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered { video_url: String },
    Failed { reason: String },
    TimedOut { attempts: u32 },
}

/// Failures before a job exists. Each one is answered with a single reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    MissingInput,
    /// Rejected by the local admission gate.
    Limited { retry_after_secs: u64 },
    /// The service answered 429.
    TransientRateLimit { retry_after_secs: u64 },
    SubmissionFailure { status: u16, body: String },
    Decode(String),
    Transport(String),
}

impl GenerateError {
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingInput => USAGE_HINT.to_string(),
            Self::Limited { retry_after_secs } => format!(
                "You're sending requests too quickly. Please wait {} seconds.",
                retry_after_secs
            ),
            Self::TransientRateLimit { retry_after_secs } => format!(
                "Too many requests to the video service. Please wait {} seconds.",
                retry_after_secs
            ),
            other => format!("Error generating video: {}", other),
        }
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput => write!(f, "no prompt supplied"),
            Self::Limited { retry_after_secs } => {
                write!(f, "requester over limit, retry after {}s", retry_after_secs)
            }
            Self::TransientRateLimit { retry_after_secs } => {
                write!(f, "service rate limited, retry after {}s", retry_after_secs)
            }
            Self::SubmissionFailure { status, body } => write!(f, "USEAPI returned {}: {}", status, body),
            Self::Decode(e) => write!(f, "unexpected response: {}", e),
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GenerateError {}

impl From<ApiError> for GenerateError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http(msg) => Self::Transport(msg),
            ApiError::RateLimited { retry_after_secs } => Self::TransientRateLimit { retry_after_secs },
            ApiError::Rejected { status, body } => Self::SubmissionFailure { status, body },
            ApiError::Decode(_) | ApiError::MissingField(_) => Self::Decode(e.to_string()),
        }
    }
}

pub struct GenerationWorkflow<A, R> {
    api: Arc<A>,
    replier: Arc<R>,
    admission: Arc<AdmissionGate>,
    template: JobTemplate,
    policy: PollPolicy,
}

impl<A: VideoApi, R: Replier> GenerationWorkflow<A, R> {
    pub fn new(
        api: Arc<A>,
        replier: Arc<R>,
        admission: Arc<AdmissionGate>,
        template: JobTemplate,
        policy: PollPolicy,
    ) -> Self {
        Self {
            api,
            replier,
            admission,
            template,
            policy,
        }
    }

    /// Handle one command end to end.
    ///
    /// Returns `Err` when no job was created; the requester has already been told why.
    #[cfg(test)]
    pub async fn run(&self, request: GenerateRequest) -> Result<JobOutcome, GenerateError> {
        let admission = self.admit(&request);
        self.run_admitted(request, admission).await
    }

    /// Record the request in the requester's window.
    ///
    /// Synchronous so the dispatcher can apply it in arrival order before
    /// handing the rest of the work to a spawned task.
    pub fn admit(&self, request: &GenerateRequest) -> Result<(), GenerateError> {
        match self.admission.admit(request.requester, request.received_at_ms) {
            Admission::Allowed { recent } => {
                info!("Requester {} has {} request(s) in the last 3 minutes", request.requester, recent);
                Ok(())
            }
            Admission::Limited { recent, retry_after_secs } => {
                info!("Requester {} over limit ({} recent)", request.requester, recent);
                Err(GenerateError::Limited { retry_after_secs })
            }
        }
    }

    /// Continue after [`admit`](Self::admit): submit, poll, reply.
    pub async fn run_admitted(
        &self,
        request: GenerateRequest,
        admission: Result<(), GenerateError>,
    ) -> Result<JobOutcome, GenerateError> {
        let submitted = match admission {
            Ok(()) => self.submit(&request).await,
            Err(e) => Err(e),
        };

        match submitted {
            Ok(job) => {
                info!("🎬 Polling {} for \"{}\" (source {})", job.id, job.prompt, job.file_id);
                Ok(self.poll(job).await)
            }
            Err(e) => {
                match &e {
                    GenerateError::MissingInput | GenerateError::Limited { .. } => {
                        info!("Rejected request from {}: {}", request.requester, e)
                    }
                    GenerateError::TransientRateLimit { .. } => warn!("Submission throttled: {}", e),
                    _ => error!("Error generating video: {}", e),
                }
                self.reply(request.target, &e.user_message()).await;
                Err(e)
            }
        }
    }

    /// Validate the prompt and create the job.
    pub async fn submit(&self, request: &GenerateRequest) -> Result<GenerationJob, GenerateError> {
        let prompt = request
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(GenerateError::MissingInput)?;

        self.reply(request.target, ACK_TEXT).await;

        let payload = self.template.request(prompt);
        let id = self.api.submit(&payload).await?;

        Ok(GenerationJob {
            id,
            prompt: prompt.to_string(),
            file_id: payload.file_id,
            status: JobStatus::Pending,
            video_url: None,
            target: request.target,
        })
    }

    /// Check the job until it finishes or the policy runs out.
    pub async fn poll(&self, mut job: GenerationJob) -> JobOutcome {
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                sleep(self.policy.interval).await;
            }

            let status = match self.api.status(&job.id).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    job.status = JobStatus::Unknown;
                    warn!("Status check {} for {} failed: {}", attempt, job.id, e);
                    continue;
                }
                Err(e) => {
                    error!("Status check for {} failed: {}", job.id, e);
                    self.reply(job.target, &format!("Error checking video status: {}", e)).await;
                    return JobOutcome::Failed { reason: e.to_string() };
                }
            };

            job.apply(&status);

            if let Some(video_url) = job.video_url.clone() {
                info!("✅ Video {} ready after {} check(s)", job.id, attempt);
                self.deliver(&job, &video_url).await;
                return JobOutcome::Delivered { video_url };
            }

            if job.status == JobStatus::Final {
                error!("Hailuo AI response for {}: {:?}", job.id, status);
                self.reply(job.target, NO_VIDEO_URL).await;
                return JobOutcome::Failed { reason: NO_VIDEO_URL.to_string() };
            }

            debug!(
                "Video {} pending ({}, {}%)",
                job.id,
                status.status_label.as_deref().unwrap_or("unknown"),
                status.percent.unwrap_or(0)
            );
        }

        let attempts = self.policy.max_attempts;
        warn!("Gave up on video {} after {} status checks", job.id, attempts);
        self.reply(
            job.target,
            &format!(
                "Video generation timed out after {} status checks. Please try again later.",
                attempts
            ),
        )
        .await;
        JobOutcome::TimedOut { attempts }
    }

    async fn deliver(&self, job: &GenerationJob, video_url: &str) {
        if let Err(e) = self.replier.send_video(job.target, video_url, VIDEO_CAPTION).await {
            // Telegram could not fetch the file; the link is still useful
            warn!("Falling back to a link for {}: {}", job.id, e);
            self.reply(job.target, &format!("{} {}", VIDEO_CAPTION, video_url)).await;
        }
    }

    async fn reply(&self, target: ReplyTarget, text: &str) {
        if let Err(e) = self.replier.send_text(target, text).await {
            warn!("Reply to chat {} failed: {}", target.chat_id, e);
        }
    }
}
