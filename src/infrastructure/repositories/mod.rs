pub mod blob_store;
pub mod document_source;
pub mod job_repository;
pub mod memory_job_repository;
pub mod openai_tts_repository;
pub mod pg_job_repository;
pub mod polly_tts_repository;
pub mod s3_blob_store;
pub mod tts_repository;

pub use blob_store::{BlobStore, BlobStoreError, LocalBlobStore};
pub use document_source::{DocumentError, DocumentFetcher, DocumentSource};
pub use job_repository::JobRepository;
pub use memory_job_repository::InMemoryJobRepository;
pub use openai_tts_repository::{OpenAiTtsRepository, OPENAI_MAX_REQUEST_BYTES};
pub use pg_job_repository::PgJobRepository;
pub use polly_tts_repository::{PollyTtsRepository, POLLY_MAX_REQUEST_BYTES};
pub use s3_blob_store::S3BlobStore;
pub use tts_repository::TtsRepository;
