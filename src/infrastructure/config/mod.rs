use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::pipeline::{ExtractorKind, PipelineSettings};
use crate::infrastructure::repositories::{OPENAI_MAX_REQUEST_BYTES, POLLY_MAX_REQUEST_BYTES};

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means jobs live in memory and are lost on restart
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub log_format: LogFormat,
    // TTS
    pub tts_provider: TtsProvider,
    pub aws_region: String,
    pub openai_api_key: Option<String>,
    pub openai_tts_model: String,
    pub tts_voice: Option<String>,
    // Storage
    pub blob_store: BlobStoreKind,
    pub blob_root: PathBuf,
    pub s3_bucket: Option<String>,
    pub document_root: PathBuf,
    // Pipeline
    pub extractor: ExtractorKind,
    pub chunk_max_bytes: usize,
    pub concurrency_small: usize,
    pub concurrency_large: usize,
    pub large_document_chunks: usize,
    pub inter_batch_delay_ms: u64,
    pub processing_budget_secs: Option<u64>,
    pub checkpoint_safety_margin_secs: u64,
    pub resume_delay_ms: u64,
    pub max_concurrent_jobs: usize,
    pub extraction_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    Polly,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BlobStoreKind {
    Local,
    S3,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .as_str()
        {
            "production" => Environment::Production,
            _ => Environment::Development,
        };

        let tts_provider = match env::var("TTS_PROVIDER")
            .unwrap_or_else(|_| "polly".to_string())
            .to_lowercase()
            .as_str()
        {
            "polly" => TtsProvider::Polly,
            "openai" => TtsProvider::OpenAi,
            other => return Err(format!("Unknown TTS_PROVIDER: {}", other).into()),
        };

        // Production stays well under the provider request limit
        let default_chunk_max_bytes = match environment {
            Environment::Production => "3000",
            Environment::Development => "5000",
        };

        let config = Config {
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            environment,
            log_format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            tts_provider,
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "eu-west-1".to_string()),
            openai_api_key: optional_var("OPENAI_API_KEY"),
            openai_tts_model: env::var("OPENAI_TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string()),
            tts_voice: optional_var("TTS_VOICE"),
            blob_store: match env::var("BLOB_STORE")
                .unwrap_or_else(|_| "local".to_string())
                .to_lowercase()
                .as_str()
            {
                "local" => BlobStoreKind::Local,
                "s3" => BlobStoreKind::S3,
                other => return Err(format!("Unknown BLOB_STORE: {}", other).into()),
            },
            blob_root: env::var("BLOB_ROOT")
                .unwrap_or_else(|_| "./data/blobs".to_string())
                .into(),
            s3_bucket: optional_var("S3_BUCKET"),
            document_root: env::var("DOCUMENT_ROOT")
                .unwrap_or_else(|_| "./data/documents".to_string())
                .into(),
            extractor: match env::var("EXTRACTOR")
                .unwrap_or_else(|_| "auto".to_string())
                .to_lowercase()
                .as_str()
            {
                "auto" => ExtractorKind::Auto,
                "pdf-extract" => ExtractorKind::PdfExtract,
                "layout" => ExtractorKind::Layout,
                other => return Err(format!("Unknown EXTRACTOR: {}", other).into()),
            },
            chunk_max_bytes: env::var("CHUNK_MAX_BYTES")
                .unwrap_or_else(|_| default_chunk_max_bytes.to_string())
                .parse()?,
            concurrency_small: env::var("CONCURRENCY_SMALL")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            concurrency_large: env::var("CONCURRENCY_LARGE")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            large_document_chunks: env::var("LARGE_DOCUMENT_CHUNKS")
                .unwrap_or_else(|_| "40".to_string())
                .parse()?,
            inter_batch_delay_ms: env::var("INTER_BATCH_DELAY_MS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            processing_budget_secs: optional_var("PROCESSING_BUDGET_SECS")
                .map(|v| v.parse())
                .transpose()?,
            checkpoint_safety_margin_secs: env::var("CHECKPOINT_SAFETY_MARGIN_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            resume_delay_ms: env::var("RESUME_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_concurrent_jobs: env::var("MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            extraction_timeout_secs: env::var("EXTRACTION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.chunk_max_bytes == 0 {
            return Err("CHUNK_MAX_BYTES must be positive".into());
        }
        let provider_limit = match self.tts_provider {
            TtsProvider::Polly => POLLY_MAX_REQUEST_BYTES,
            TtsProvider::OpenAi => OPENAI_MAX_REQUEST_BYTES,
        };
        if self.chunk_max_bytes > provider_limit {
            tracing::warn!(
                chunk_max_bytes = self.chunk_max_bytes,
                provider_limit = provider_limit,
                "CHUNK_MAX_BYTES exceeds the TTS provider request limit, oversized chunks will be shortened on retry"
            );
        }
        if self.tts_provider == TtsProvider::OpenAi && self.openai_api_key.is_none() {
            return Err("OPENAI_API_KEY is required when TTS_PROVIDER=openai".into());
        }
        if self.blob_store == BlobStoreKind::S3 && self.s3_bucket.is_none() {
            return Err("S3_BUCKET is required when BLOB_STORE=s3".into());
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_max_bytes: self.chunk_max_bytes,
            concurrency_small: self.concurrency_small,
            concurrency_large: self.concurrency_large,
            large_document_chunks: self.large_document_chunks,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            processing_budget: self.processing_budget_secs.map(Duration::from_secs),
            checkpoint_safety_margin: Duration::from_secs(self.checkpoint_safety_margin_secs),
            resume_delay: Duration::from_millis(self.resume_delay_ms),
            extraction_timeout: Duration::from_secs(self.extraction_timeout_secs),
            ..PipelineSettings::default()
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
