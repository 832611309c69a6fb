//! HTTP client for the archive REST API
//!
//! Endpoints, relative to the configured base:
//!
//! - `POST objects` with an [`ArchiveEnvelope`] body returns `{"cid": ...}`
//! - `GET objects/{cid}` returns the stored envelope
//! - `GET objects` returns `{"objects": [FileDescriptor, ...]}` for the account
//!
//! Requests authenticate with a bearer credential. Status codes map onto
//! [`ChatSyncError`] so the retry layer can tell transient failures from
//! final ones.

use super::{filter_by_owner, ArchiveClient, ArchiveEnvelope, Cid, FileDescriptor, UploadMetadata};
use crate::config::ArchiveConfig;
use crate::error::{ChatSyncError, Result};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    cid: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<FileDescriptor>,
}

/// Archive client over HTTP
#[derive(Debug, Clone)]
pub struct HttpArchiveClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl HttpArchiveClient {
    /// Build a client from configuration and a resolved credential
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Config` if the base URL is invalid or the
    /// HTTP client cannot be built
    pub fn new(config: &ArchiveConfig, api_key: Option<String>) -> Result<Self> {
        url::Url::parse(&config.api_base).map_err(|e| {
            ChatSyncError::Config(format!("Invalid archive URL {}: {}", config.api_base, e))
        })?;

        let mut builder = Client::builder().user_agent(concat!("chatsync/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ChatSyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn credential(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ChatSyncError::MissingCredentials(
                "set archive.api_key, CHATSYNC_ARCHIVE_API_KEY or run `chatsync auth set`"
                    .to_string(),
            )
            .into()
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn transport_error(op: &str, e: reqwest::Error) -> anyhow::Error {
    ChatSyncError::ArchiveTransient(format!("{} request failed: {}", op, e)).into()
}

/// Map a non-success response onto the error taxonomy
async fn check_status(op: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", op, status, body.trim());
    tracing::debug!("Archive error response: {}", detail);

    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatSyncError::Authentication(detail),
        StatusCode::PAYMENT_REQUIRED | StatusCode::PAYLOAD_TOO_LARGE => {
            ChatSyncError::QuotaExceeded(detail)
        }
        StatusCode::NOT_FOUND => ChatSyncError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS if body.to_lowercase().contains("quota") => {
            ChatSyncError::QuotaExceeded(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ChatSyncError::ArchiveTransient(detail)
        }
        s if s.is_server_error() => ChatSyncError::ArchiveTransient(detail),
        _ => ChatSyncError::Archive(detail),
    };
    Err(err.into())
}

#[async_trait::async_trait]
impl ArchiveClient for HttpArchiveClient {
    async fn upload(&self, data: Vec<u8>, metadata: Option<UploadMetadata>) -> Result<Cid> {
        let key = self.credential()?;
        let body = ArchiveEnvelope::wrap(&data, metadata).to_bytes()?;

        tracing::debug!("Uploading {} bytes to archive", body.len());
        let response = self
            .client
            .post(self.endpoint("objects"))
            .bearer_auth(key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("upload", e))?;
        let response = check_status("upload", response).await?;

        let parsed: UploadResponse = response.json().await.map_err(|e| {
            ChatSyncError::Archive(format!("Failed to parse upload response: {}", e))
        })?;
        if parsed.cid.trim().is_empty() {
            return Err(ChatSyncError::Archive("archive returned an empty CID".into()).into());
        }
        Ok(parsed.cid)
    }

    async fn download(&self, cid: &str) -> Result<Vec<u8>> {
        let request = self.client.get(self.endpoint(&format!("objects/{}", cid)));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| transport_error("download", e))?;
        let response = check_status("download", response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("download", e))?;
        ArchiveEnvelope::from_bytes(&bytes)?.into_data()
    }

    async fn list_by_owner(&self, address: &str) -> Result<Vec<FileDescriptor>> {
        let key = self.credential()?;
        let response = self
            .client
            .get(self.endpoint("objects"))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| transport_error("list", e))?;
        let response = check_status("list", response).await?;

        let listed: ListResponse = response.json().await.map_err(|e| {
            ChatSyncError::Archive(format!("Failed to parse listing response: {}", e))
        })?;
        Ok(filter_by_owner(listed.objects, address))
    }
}
