use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error detail written when a user cancels a job.
pub const CANCELLED_BY_USER: &str = "Processing was cancelled by the user";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Cancellation is only valid before the job reaches a terminal state
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Resumption metadata persisted when an invocation runs out of time budget.
///
/// `partial_audio_ref` always points at an artifact that was durably stored
/// before this record was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub total_chunks: usize,
    pub next_chunk_index: usize,
    pub partial_audio_ref: String,
    pub saved_at: DateTime<Utc>,
}

/// One document-to-audio conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudiobookJob {
    pub id: Uuid,
    pub title: Option<String>,
    pub source_document_ref: String,
    pub status: JobStatus,
    pub progress: i32,
    pub error_detail: Option<String>,
    pub audio_ref: Option<String>,
    pub duration_seconds: Option<f64>,
    pub checkpoint: Option<Checkpoint>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AudiobookJob {
    /// Build a fresh `pending` job
    pub fn new(id: Uuid, source_document_ref: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            source_document_ref,
            status: JobStatus::Pending,
            progress: 0,
            error_detail: None,
            audio_ref: None,
            duration_seconds: None,
            checkpoint: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when `attempt` is the live processing attempt of this job
    pub fn is_active_attempt(&self, attempt: i32) -> bool {
        self.status == JobStatus::Processing && self.attempt == attempt
    }

    pub fn was_cancelled(&self) -> bool {
        self.status == JobStatus::Failed
            && self.error_detail.as_deref() == Some(CANCELLED_BY_USER)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status,
            progress: self.progress,
            error_detail: self.error_detail.clone(),
            audio_ref: self.audio_ref.clone(),
            duration_seconds: self.duration_seconds,
        }
    }
}

/// What status consumers see, both when polling and on the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// One row of GET /api/audiobooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub document_ref: String,
    pub status: JobStatus,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<AudiobookJob> for JobSummary {
    fn from(job: AudiobookJob) -> Self {
        Self {
            id: job.id,
            title: job.title,
            document_ref: job.source_document_ref,
            status: job.status,
            progress: job.progress,
            audio_ref: job.audio_ref,
            duration_seconds: job.duration_seconds,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_count: i64,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total_count: i64) -> Self {
        let total_pages = ((total_count.max(0) as u64 + limit as u64 - 1) / limit as u64) as u32;
        Self {
            page,
            limit,
            total_count,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// Response for GET /api/audiobooks
#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub audiobooks: Vec<JobSummary>,
    pub pagination: Pagination,
}

/// Request for POST /api/audiobooks
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub document_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

/// Response for POST /api/audiobooks
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub id: Uuid,
}

/// Request for POST /api/audiobooks/:id/duration
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateDurationRequest {
    pub duration_seconds: f64,
}
