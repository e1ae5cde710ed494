use crate::e2e::helpers::db_pool::TestDatabase;

use audiobook_backend::domain::audiobook::{AudiobookJob, Checkpoint, JobStatus};
use audiobook_backend::error::AppError;
use audiobook_backend::infrastructure::repositories::{JobRepository, PgJobRepository};
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use test_context::{test_context, AsyncTestContext};
use uuid::Uuid;

/// A job store backed by its own database in the shared container
struct PgContext {
    repo: PgJobRepository,
    _db: TestDatabase,
}

impl AsyncTestContext for PgContext {
    fn setup() -> impl std::future::Future<Output = Self> + Send {
        async {
            let db = TestDatabase::create()
                .await
                .expect("Failed to create test database");
            Self {
                repo: PgJobRepository::new(Arc::new(db.pool.clone())),
                _db: db,
            }
        }
    }
}

impl PgContext {
    async fn processing_job(&self) -> (Uuid, i32) {
        let job = AudiobookJob::new(Uuid::new_v4(), "doc.pdf".to_string(), None);
        self.repo.create(&job).await.unwrap();
        let attempt = self.repo.start_attempt(job.id, 5).await.unwrap().unwrap();
        (job.id, attempt)
    }
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_keep_progress_monotonic_in_postgres(ctx: &PgContext) {
    let (id, attempt) = ctx.processing_job().await;

    assert_eq!(ctx.repo.update_progress(id, attempt, 40).await.unwrap(), Some(40));
    assert_eq!(ctx.repo.update_progress(id, attempt, 30).await.unwrap(), Some(40));
    assert_eq!(ctx.repo.update_progress(id, attempt, 250).await.unwrap(), Some(100));

    let job = ctx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.progress, 100);
    assert_eq!(job.status, JobStatus::Processing);
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_reject_writes_from_a_stale_attempt_in_postgres(ctx: &PgContext) {
    let (id, attempt) = ctx.processing_job().await;

    assert!(ctx.repo.fail(id, attempt, "boom").await.unwrap());
    assert!(ctx.repo.reset_for_retry(id, "doc.pdf", None).await.unwrap());
    let next = ctx.repo.start_attempt(id, 5).await.unwrap().unwrap();
    assert_eq!(next, attempt + 1);

    assert_eq!(ctx.repo.update_progress(id, attempt, 80).await.unwrap(), None);
    assert!(!ctx.repo.complete(id, attempt, "audio.mp3", 1.0).await.unwrap());
    assert_eq!(ctx.repo.update_progress(id, next, 20).await.unwrap(), Some(20));
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_reset_progress_on_cancel_in_postgres(ctx: &PgContext) {
    let (id, attempt) = ctx.processing_job().await;
    ctx.repo.update_progress(id, attempt, 60).await.unwrap();

    assert!(ctx.repo.cancel(id).await.unwrap());
    let job = ctx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 0);
    assert!(job.was_cancelled());

    assert_eq!(ctx.repo.update_progress(id, attempt, 70).await.unwrap(), None);
    assert!(!ctx.repo.cancel(id).await.unwrap());
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_clear_the_checkpoint_on_complete_in_postgres(ctx: &PgContext) {
    let (id, attempt) = ctx.processing_job().await;
    let checkpoint = Checkpoint {
        total_chunks: 4,
        next_chunk_index: 2,
        partial_audio_ref: "partials/x.mp3".to_string(),
        saved_at: Utc::now(),
    };
    assert!(ctx.repo.save_checkpoint(id, attempt, &checkpoint).await.unwrap());
    let saved = ctx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(saved.checkpoint.map(|c| c.next_chunk_index), Some(2));

    assert!(ctx.repo.complete(id, attempt, "audiobooks/x.mp3", 3.0).await.unwrap());
    let job = ctx.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.audio_ref.as_deref(), Some("audiobooks/x.mp3"));
    assert_eq!(job.duration_seconds, Some(3.0));
    assert!(job.checkpoint.is_none());
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_list_and_delete_jobs_in_postgres(ctx: &PgContext) {
    let mut ids = Vec::new();
    for i in 0..3 {
        let mut job = AudiobookJob::new(Uuid::new_v4(), format!("doc-{}.pdf", i), None);
        job.created_at = Utc::now() + chrono::Duration::seconds(i);
        ctx.repo.create(&job).await.unwrap();
        ids.push(job.id);
    }

    let (page, total) = ctx.repo.list(0, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

    // Pending jobs are not deletable
    assert!(ctx.repo.delete(ids[0]).await.unwrap().is_none());
    assert!(ctx.repo.cancel(ids[0]).await.unwrap());
    let removed = ctx.repo.delete(ids[0]).await.unwrap().unwrap();
    assert_eq!(removed.id, ids[0]);
    assert!(ctx.repo.find_by_id(ids[0]).await.unwrap().is_none());
}

#[test_context(PgContext)]
#[tokio::test]
async fn it_should_reject_duplicate_job_ids_in_postgres(ctx: &PgContext) {
    let job = AudiobookJob::new(Uuid::new_v4(), "doc.pdf".to_string(), None);
    ctx.repo.create(&job).await.unwrap();
    assert!(matches!(ctx.repo.create(&job).await, Err(AppError::Conflict(_))));
}
