use anyhow::{Context, Result};
use ats_common::{IngestMetadata, ServiceConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// One document handed to the ingestion service
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub force: bool,
}

impl IngestRequest {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The RAG service that turns a resume into embeddings and graph entities.
///
/// Implementations must tolerate re-ingesting a document that is already
/// known when `force` is set.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestMetadata>;

    /// Drop everything the service holds for `path`. Only called when the
    /// purge deletion policy is selected.
    async fn forget(&self, path: &str) -> Result<()> {
        debug!(path, "Ingestor keeps no per-document data to forget");
        Ok(())
    }
}

/// Talks to the RAG service over its REST API
pub struct HttpIngestor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIngestor {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn documents_url(&self) -> String {
        format!("{}/documents", self.base_url)
    }
}

#[async_trait]
impl Ingestor for HttpIngestor {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestMetadata> {
        let path = request.path.to_string_lossy().into_owned();
        let file_name = request.file_name();
        let force = if request.force { "true" } else { "false" };

        let response = self
            .client
            .post(self.documents_url())
            .query(&[("path", path.as_str()), ("file_name", file_name.as_str()), ("force", force)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(request.content)
            .send()
            .await
            .with_context(|| format!("Failed to reach ingestion service for {}", path))?;

        let status = response.status();
        let body = response.bytes().await.context("Failed to read ingestion response")?;

        if !status.is_success() {
            anyhow::bail!(
                "Ingestion service returned {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            );
        }

        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(IngestMetadata::default());
        }
        serde_json::from_slice(&body).context("Ingestion service sent an unreadable response")
    }

    async fn forget(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.documents_url())
            .query(&[("path", path)])
            .send()
            .await
            .with_context(|| format!("Failed to reach ingestion service to forget {}", path))?;

        let status = response.status();
        // Already gone is as good as removed.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Ingestion service refused to forget {}: {} {}", path, status, body.trim())
    }
}
