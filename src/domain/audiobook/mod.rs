pub mod error;
pub mod events;
pub mod model;
pub mod queue;
pub mod service;

pub use error::AudiobookServiceError;
pub use events::{ObservedJobRepository, ProgressHub};
pub use model::{
    AudiobookJob, Checkpoint, JobListResponse, JobSnapshot, JobStatus, JobSummary, Pagination,
    SubmitJobRequest, SubmitJobResponse, UpdateDurationRequest, CANCELLED_BY_USER,
};
pub use queue::{JobMessage, WorkQueue};
pub use service::{AudiobookService, AudiobookServiceApi};
