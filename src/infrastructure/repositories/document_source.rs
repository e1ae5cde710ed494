use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid document reference: {0}")]
    InvalidRef(String),
    #[error("failed to fetch document: {0}")]
    Fetch(String),
}

/// Read-only access to source documents by reference
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, document_ref: &str) -> Result<Vec<u8>, DocumentError>;
}

/// Resolves `http(s)://` references over the network and anything else as a
/// path relative to the document root
pub struct DocumentFetcher {
    root: PathBuf,
    http_client: reqwest::Client,
}

impl DocumentFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            root: root.into(),
            http_client,
        }
    }

    fn is_remote(document_ref: &str) -> bool {
        document_ref.starts_with("http://") || document_ref.starts_with("https://")
    }

    fn resolve_local(&self, document_ref: &str) -> Result<PathBuf, DocumentError> {
        let relative = Path::new(document_ref.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if document_ref.trim().is_empty() || escapes {
            return Err(DocumentError::InvalidRef(document_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, DocumentError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| DocumentError::Fetch(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DocumentError::NotFound(url.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| DocumentError::Fetch(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DocumentSource for DocumentFetcher {
    async fn fetch(&self, document_ref: &str) -> Result<Vec<u8>, DocumentError> {
        let start_time = std::time::Instant::now();

        let bytes = if Self::is_remote(document_ref) {
            self.fetch_remote(document_ref).await?
        } else {
            let path = self.resolve_local(document_ref)?;
            tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DocumentError::NotFound(document_ref.to_string()),
                _ => DocumentError::Fetch(e.to_string()),
            })?
        };

        tracing::debug!(
            document_ref = document_ref,
            size_bytes = bytes.len(),
            latency_ms = start_time.elapsed().as_millis(),
            "Document fetched"
        );

        Ok(bytes)
    }
}
