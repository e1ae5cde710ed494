use anyhow::Result;
use audiobook_backend::{
    controllers::audiobook::AudiobookController,
    domain::{
        audiobook::{AudiobookService, ObservedJobRepository, ProgressHub, WorkQueue},
        pipeline::{DurationEstimator, ExtractorKind, JobRunner, PipelineDeps, PipelineSettings, Worker},
        tts::VoiceSelector,
    },
    infrastructure::{
        db::DbPool,
        http::build_router,
        repositories::{DocumentFetcher, InMemoryJobRepository, JobRepository, LocalBlobStore},
    },
};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_context::AsyncTestContext;
use tokio::net::TcpListener;

pub mod api_client;
pub mod db_pool;
pub mod stub_tts;

use api_client::TestClient;
use fixtures::TestFixtures;
use stub_tts::StubTts;

/// Upper bound for a job to reach a terminal state in tests
const JOB_TIMEOUT: Duration = Duration::from_secs(20);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct TestContext {
    pub client: TestClient,
    pub tts: Arc<StubTts>,
    pub fixtures: TestFixtures,
    pub blobs: Arc<LocalBlobStore>,
    pub jobs: Arc<dyn JobRepository>,
    _blob_dir: TempDir,
}

impl AsyncTestContext for TestContext {
    fn setup() -> impl std::future::Future<Output = Self> + Send {
        Self::start(None)
    }

    fn teardown(self) -> impl std::future::Future<Output = ()> + Send {
        async {
            // Temp directories are removed on drop
        }
    }
}

impl TestContext {
    /// Start a server; `pool` only backs the readiness check, jobs stay in memory
    pub async fn start(pool: Option<Arc<DbPool>>) -> Self {
        let fixtures = TestFixtures::new().expect("Failed to create document root");
        let blob_dir = tempfile::tempdir().expect("Failed to create blob root");
        let blobs = Arc::new(LocalBlobStore::new(blob_dir.path()));
        let tts = Arc::new(StubTts::default());
        let hub = ProgressHub::default();
        let jobs: Arc<dyn JobRepository> = Arc::new(ObservedJobRepository::new(
            Arc::new(InMemoryJobRepository::new()),
            hub.clone(),
        ));

        let app = create_app(&fixtures, pool, jobs.clone(), blobs.clone(), tts.clone(), hub);

        // Start server
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            client: TestClient::new(&base_url),
            tts,
            fixtures,
            blobs,
            jobs,
            _blob_dir: blob_dir,
        }
    }
}

/// Same wiring as `main`, with a stub engine and temp-dir storage
fn create_app(
    fixtures: &TestFixtures,
    pool: Option<Arc<DbPool>>,
    jobs: Arc<dyn JobRepository>,
    blobs: Arc<LocalBlobStore>,
    tts: Arc<StubTts>,
    hub: ProgressHub,
) -> Router {
    let settings = PipelineSettings {
        resume_delay: Duration::from_millis(10),
        extraction_timeout: Duration::from_secs(30),
        ..PipelineSettings::default()
    };

    let (queue, receiver) = WorkQueue::new();
    let runner = Arc::new(JobRunner::new(
        PipelineDeps {
            jobs: jobs.clone(),
            documents: Arc::new(DocumentFetcher::new(fixtures.document_root())),
            extractor: ExtractorKind::Layout.build(),
            tts,
            blobs: blobs.clone(),
            voices: Arc::new(VoiceSelector::new(None)),
            estimator: Arc::new(DurationEstimator::standard()),
        },
        queue.clone(),
        settings,
    ));
    tokio::spawn(Worker::new(runner, queue.clone(), 2).run(receiver));

    let service = Arc::new(AudiobookService::new(jobs, blobs, queue, hub));
    let controller = Arc::new(AudiobookController::new(service));

    build_router(pool, controller)
}

impl TestContext {
    /// Submit a document and return the job id
    pub async fn submit(&self, document_ref: &str) -> Result<String> {
        let response = self
            .client
            .post("/api/audiobooks", &serde_json::json!({ "document_ref": document_ref }))
            .await?;
        response.assert_status(hyper::StatusCode::ACCEPTED);
        let id = response
            .body
            .as_ref()
            .and_then(|b| b.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing id in submit response"))?;
        Ok(id.to_string())
    }

    /// Poll the status endpoint until `done` accepts the body
    pub async fn wait_for<F>(&self, job_id: &str, done: F) -> Result<Value>
    where
        F: Fn(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + JOB_TIMEOUT;
        loop {
            let response = self.client.get(&format!("/api/audiobooks/{}", job_id)).await?;
            if let Some(body) = response.body {
                if done(&body) {
                    return Ok(body);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("Job {} did not reach the expected state in time", job_id);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until the job is `completed` or `failed`
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<Value> {
        self.wait_for(job_id, |body| {
            matches!(status_of(body), Some("completed") | Some("failed"))
        })
        .await
    }
}

pub fn status_of(body: &Value) -> Option<&str> {
    body.get("status").and_then(|v| v.as_str())
}
