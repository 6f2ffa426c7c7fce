//! HTTP client for the document management backend.
//!
//! A thin reqwest wrapper around the five DMS endpoints: OTP generation
//! and validation, document search, multipart document upload, tag
//! suggestions, and raw file fetch. Response envelopes are normalized at
//! this boundary — callers never probe response shapes themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use dms_api::{DmsClient, SearchRequest};
//!
//! let client = DmsClient::new("https://dms.example.com/api")?;
//! client.generate_otp("+919999999999").await?;
//! let auth = client.validate_otp("+919999999999", "123456").await?;
//! let docs = client.search_documents(&auth.token, &SearchRequest::all()).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{ApiError, Result};
pub use types::{
    normalize_auth, AuthSuccess, DocumentEntry, DocumentRecord, FilePayload, SearchRequest,
    TagRef, UploadOutcome,
};

use bytes::Bytes;
use reqwest::{header, multipart, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use types::Envelope;

/// Chunk size for streamed upload bodies.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// DMS backend client.
#[derive(Clone)]
pub struct DmsClient {
    http_client: Client,
    base_url: String,
}

impl DmsClient {
    /// Create a client for the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request an OTP for the given phone number.
    pub async fn generate_otp(&self, mobile_number: &str) -> Result<()> {
        let response = self
            .http_client
            .post(format!("{}/generateOTP", self.base_url))
            .json(&serde_json::json!({ "mobile_number": mobile_number }))
            .send()
            .await?;

        let envelope: Envelope<Value> = Self::read_envelope(response).await?;
        if !envelope.status {
            let message = envelope
                .message
                .unwrap_or_else(|| "OTP request rejected".to_string());
            warn!(message = %message, "generateOTP rejected");
            return Err(ApiError::Api(message));
        }

        debug!("OTP requested");
        Ok(())
    }

    /// Validate an OTP and extract the session token and identity fields.
    pub async fn validate_otp(&self, mobile_number: &str, otp: &str) -> Result<AuthSuccess> {
        let response = self
            .http_client
            .post(format!("{}/validateOTP", self.base_url))
            .json(&serde_json::json!({ "mobile_number": mobile_number, "otp": otp }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "validateOTP failed");
            return Err(ApiError::Api(error_text));
        }

        let value: Value = response.json().await.map_err(|e| ApiError::Parse(e.to_string()))?;
        if value.get("status").and_then(Value::as_bool) == Some(false) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("OTP validation rejected")
                .to_string();
            return Err(ApiError::Api(message));
        }

        normalize_auth(&value)
    }

    /// Search document entries matching the server-side filter.
    pub async fn search_documents(
        &self,
        token: &str,
        request: &SearchRequest,
    ) -> Result<Vec<DocumentRecord>> {
        let response = self
            .http_client
            .post(format!("{}/searchDocumentEntry", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .json(request)
            .send()
            .await?;

        let envelope: Envelope<Vec<DocumentRecord>> = Self::read_envelope(response).await?;
        if !envelope.status {
            let message = envelope
                .message
                .unwrap_or_else(|| "document search rejected".to_string());
            warn!(message = %message, "searchDocumentEntry rejected");
            return Err(ApiError::Api(message));
        }

        let records = envelope.data.unwrap_or_default();
        debug!(count = records.len(), "document search completed");
        Ok(records)
    }

    /// Upload one document (file bytes + metadata) as a multipart request.
    ///
    /// A `status: false` inside a 200 envelope is a server rejection, not a
    /// transport error, so it is reported through [`UploadOutcome`] rather
    /// than as an `Err`.
    pub async fn upload_document(
        &self,
        token: &str,
        file: FilePayload,
        entry: &DocumentEntry,
    ) -> Result<UploadOutcome> {
        let data_json =
            serde_json::to_string(entry).map_err(|e| ApiError::Parse(e.to_string()))?;

        let total = file.bytes.len();
        let part = match file.progress {
            Some(progress) => {
                progress.send_replace(0.0);
                let bytes = file.bytes;
                let stream = futures::stream::unfold(
                    (bytes, 0usize, progress),
                    |(bytes, offset, progress)| async move {
                        if offset >= bytes.len() {
                            return None;
                        }
                        let end = (offset + UPLOAD_CHUNK_BYTES).min(bytes.len());
                        let chunk = bytes.slice(offset..end);
                        progress.send_replace(end as f32 / bytes.len() as f32);
                        Some((Ok::<Bytes, std::io::Error>(chunk), (bytes, end, progress)))
                    },
                );
                multipart::Part::stream_with_length(
                    reqwest::Body::wrap_stream(stream),
                    total as u64,
                )
            }
            None => multipart::Part::stream(reqwest::Body::from(file.bytes)),
        }
        .file_name(file.file_name)
        .mime_str(&file.mime_type)
        .map_err(|e| ApiError::Parse(format!("invalid mime type: {e}")))?;

        let form = multipart::Form::new().part("file", part).text("data", data_json);

        let response = self
            .http_client
            .post(format!("{}/saveDocumentEntry", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await?;

        let envelope: Envelope<Value> = Self::read_envelope(response).await?;
        let outcome = UploadOutcome {
            success: envelope.status,
            message: envelope.message.unwrap_or_default(),
        };
        debug!(success = outcome.success, "saveDocumentEntry completed");
        Ok(outcome)
    }

    /// Fetch known tags matching a search term, for typeahead.
    pub async fn document_tags(&self, token: &str, term: &str) -> Result<Vec<String>> {
        let response = self
            .http_client
            .post(format!("{}/documentTags", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .json(&serde_json::json!({ "term": term }))
            .send()
            .await?;

        let envelope: Envelope<Vec<TagRef>> = Self::read_envelope(response).await?;
        if !envelope.status {
            let message = envelope
                .message
                .unwrap_or_else(|| "tag lookup rejected".to_string());
            return Err(ApiError::Api(message));
        }

        Ok(envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.tag_name)
            .collect())
    }

    /// Fetch a remote file as raw bytes.
    pub async fn fetch_file(&self, url: &str) -> Result<Bytes> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, url = %url, "file fetch failed");
            return Err(ApiError::Api(error_text));
        }

        response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))
    }

    /// Common handling for `{ status, message, data }` endpoints: map 401
    /// to [`ApiError::Unauthorized`], other non-2xx to [`ApiError::Api`]
    /// with the response body, then deserialize the envelope.
    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "DMS API error");
            return Err(ApiError::Api(error_text));
        }

        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}
