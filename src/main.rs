use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use audiobook_backend::controllers::audiobook::AudiobookController;
use audiobook_backend::domain::audiobook::{AudiobookService, ObservedJobRepository, ProgressHub, WorkQueue};
use audiobook_backend::domain::pipeline::{recover_unfinished, DurationEstimator, JobRunner, PipelineDeps, Worker};
use audiobook_backend::domain::tts::VoiceSelector;
use audiobook_backend::infrastructure::config::{BlobStoreKind, Config, LogFormat, TtsProvider};
use audiobook_backend::infrastructure::db::{check_connection, create_pool, run_migrations, DbPool};
use audiobook_backend::infrastructure::http::{build_router, start_http_server};
use audiobook_backend::infrastructure::repositories::{
    BlobStore, DocumentFetcher, InMemoryJobRepository, JobRepository, LocalBlobStore,
    OpenAiTtsRepository, PgJobRepository, PollyTtsRepository, S3BlobStore, TtsRepository,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_logging(&config);

    tracing::info!(
        "Starting Audiobook Backend on {}:{}",
        config.host,
        config.port
    );

    // Job store: Postgres when configured, process memory otherwise
    let (pool, store): (Option<Arc<DbPool>>, Arc<dyn JobRepository>) = match &config.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url, config.db_max_connections).await?;
            tracing::info!("Database connection pool created");

            check_connection(&pool).await?;
            tracing::info!("Database connection verified");

            run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");

            let pool = Arc::new(pool);
            (Some(pool.clone()), Arc::new(PgJobRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory and lost on restart");
            (None, Arc::new(InMemoryJobRepository::new()))
        }
    };

    let needs_aws = config.tts_provider == TtsProvider::Polly || config.blob_store == BlobStoreKind::S3;
    let aws_config = if needs_aws {
        tracing::info!("Loading AWS configuration for region: {}", config.aws_region);
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;
        tracing::info!(region = ?aws_config.region(), "AWS configuration loaded");
        Some(aws_config)
    } else {
        None
    };

    let config = Arc::new(config);

    // === DEPENDENCY INJECTION SETUP ===
    // 1. Instantiate repositories and external clients
    tracing::info!("Instantiating repositories...");
    let hub = ProgressHub::default();
    let jobs: Arc<dyn JobRepository> = Arc::new(ObservedJobRepository::new(store, hub.clone()));

    let tts: Arc<dyn TtsRepository> = match (config.tts_provider, &aws_config) {
        (TtsProvider::Polly, Some(aws_config)) => {
            let polly_client = Arc::new(aws_sdk_polly::Client::new(aws_config));
            tracing::info!("AWS Polly client initialized");
            Arc::new(PollyTtsRepository::new(polly_client))
        }
        _ => {
            let api_key = config.openai_api_key.clone().unwrap_or_default();
            let client = async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new().with_api_key(api_key),
            );
            tracing::info!(model = %config.openai_tts_model, "OpenAI TTS client initialized");
            Arc::new(OpenAiTtsRepository::new(Arc::new(client), config.openai_tts_model.clone()))
        }
    };

    let blobs: Arc<dyn BlobStore> = match (config.blob_store, &aws_config, &config.s3_bucket) {
        (BlobStoreKind::S3, Some(aws_config), Some(bucket)) => {
            tracing::info!(bucket = %bucket, "Using S3 blob store");
            Arc::new(S3BlobStore::new(
                Arc::new(aws_sdk_s3::Client::new(aws_config)),
                bucket.clone(),
            ))
        }
        _ => {
            tracing::info!(root = %config.blob_root.display(), "Using local blob store");
            Arc::new(LocalBlobStore::new(config.blob_root.clone()))
        }
    };

    let documents = Arc::new(DocumentFetcher::new(config.document_root.clone()));

    // 2. Instantiate the pipeline and its worker
    tracing::info!("Instantiating pipeline...");
    let (queue, receiver) = WorkQueue::new();
    let runner = Arc::new(JobRunner::new(
        PipelineDeps {
            jobs: jobs.clone(),
            documents,
            extractor: config.extractor.build(),
            tts,
            blobs: blobs.clone(),
            voices: Arc::new(VoiceSelector::new(config.tts_voice.clone())),
            estimator: Arc::new(DurationEstimator::standard()),
        },
        queue.clone(),
        config.pipeline_settings(),
    ));
    let worker = Worker::new(runner, queue.clone(), config.max_concurrent_jobs);
    tokio::spawn(worker.run(receiver));

    let recovered = recover_unfinished(jobs.as_ref(), &queue).await?;
    if recovered > 0 {
        tracing::info!(recovered = recovered, "Re-enqueued unfinished jobs");
    }

    // 3. Instantiate services
    tracing::info!("Instantiating services...");
    let audiobook_service = Arc::new(AudiobookService::new(jobs, blobs, queue, hub));

    // 4. Instantiate controllers
    tracing::info!("Instantiating controllers...");
    let audiobook_controller = Arc::new(AudiobookController::new(audiobook_service));

    // Start HTTP server with all routes
    start_http_server(config, build_router(pool, audiobook_controller)).await?;

    Ok(())
}

fn init_logging(config: &Config) {
    if config.log_format == LogFormat::Json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "audiobook_backend=debug,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "audiobook_backend=debug,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
