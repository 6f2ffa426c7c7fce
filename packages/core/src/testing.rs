//! Shared test collaborators: a scripted remote API, a scripted file
//! provider, and session-token forging helpers.
//!
//! Used by the unit tests in this crate and the integration tests under
//! `tests/`; kept as a public module so downstream surfaces can drive the
//! core without a live backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use dms_api::{
    ApiError, AuthSuccess, DocumentEntry, DocumentRecord, FilePayload, SearchRequest,
    UploadOutcome,
};
use serde::Serialize;

use crate::error::CoreResult;
use crate::remote::{FileProvider, RemoteApi};
use crate::upload::LocalFile;

/// A scripted failure for the next call to one mock operation.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Api(String),
    Network(String),
    Unauthorized,
}

impl From<ScriptedFailure> for ApiError {
    fn from(failure: ScriptedFailure) -> Self {
        match failure {
            ScriptedFailure::Api(message) => ApiError::Api(message),
            ScriptedFailure::Network(message) => ApiError::Network(message),
            ScriptedFailure::Unauthorized => ApiError::Unauthorized,
        }
    }
}

/// Scripted in-memory stand-in for the DMS backend.
///
/// Call counters are public so tests can assert exactly how many remote
/// calls an operation issued. Failures are one-shot: they fail the next
/// call to that operation and are then consumed.
#[derive(Default)]
pub struct MockRemoteApi {
    pub generate_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub tags_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,

    latency: Option<Duration>,
    auth_token: Mutex<String>,
    documents: Mutex<Vec<DocumentRecord>>,
    tags: Mutex<Vec<String>>,
    file_bytes: Mutex<Vec<u8>>,
    uploaded: Mutex<Vec<DocumentEntry>>,

    next_generate_failure: Mutex<Option<ScriptedFailure>>,
    next_validate_failure: Mutex<Option<ScriptedFailure>>,
    next_search_failure: Mutex<Option<ScriptedFailure>>,
    next_upload_failure: Mutex<Option<ScriptedFailure>>,
    next_fetch_failure: Mutex<Option<ScriptedFailure>>,
    next_upload_rejection: Mutex<Option<String>>,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, for racing concurrent callers in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.lock().unwrap() = token.into();
    }

    pub fn set_documents(&self, documents: Vec<DocumentRecord>) {
        *self.documents.lock().unwrap() = documents;
    }

    pub fn set_tags(&self, tags: Vec<String>) {
        *self.tags.lock().unwrap() = tags;
    }

    pub fn set_file_bytes(&self, bytes: Vec<u8>) {
        *self.file_bytes.lock().unwrap() = bytes;
    }

    pub fn fail_generate(&self, failure: ScriptedFailure) {
        *self.next_generate_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_validate(&self, failure: ScriptedFailure) {
        *self.next_validate_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_search(&self, failure: ScriptedFailure) {
        *self.next_search_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_upload(&self, failure: ScriptedFailure) {
        *self.next_upload_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_fetch(&self, failure: ScriptedFailure) {
        *self.next_fetch_failure.lock().unwrap() = Some(failure);
    }

    /// Make the next upload come back as a 200 envelope with
    /// `status: false` and the given message.
    pub fn reject_upload(&self, message: impl Into<String>) {
        *self.next_upload_rejection.lock().unwrap() = Some(message.into());
    }

    /// Entries of every successful upload, in order.
    pub fn uploaded_entries(&self) -> Vec<DocumentEntry> {
        self.uploaded.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take(slot: &Mutex<Option<ScriptedFailure>>) -> Option<ScriptedFailure> {
        slot.lock().unwrap().take()
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn generate_otp(&self, _mobile_number: &str) -> Result<(), ApiError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        match Self::take(&self.next_generate_failure) {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    async fn validate_otp(&self, _mobile_number: &str, _otp: &str) -> Result<AuthSuccess, ApiError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(failure) = Self::take(&self.next_validate_failure) {
            return Err(failure.into());
        }
        Ok(AuthSuccess {
            token: self.auth_token.lock().unwrap().clone(),
            user_id: None,
            user_name: None,
            roles: Vec::new(),
        })
    }

    async fn search_documents(
        &self,
        _token: &str,
        _request: &SearchRequest,
    ) -> Result<Vec<DocumentRecord>, ApiError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        match Self::take(&self.next_search_failure) {
            Some(failure) => Err(failure.into()),
            None => Ok(self.documents.lock().unwrap().clone()),
        }
    }

    async fn upload_document(
        &self,
        _token: &str,
        _file: FilePayload,
        entry: &DocumentEntry,
    ) -> Result<UploadOutcome, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(failure) = Self::take(&self.next_upload_failure) {
            return Err(failure.into());
        }
        if let Some(message) = self.next_upload_rejection.lock().unwrap().take() {
            return Ok(UploadOutcome {
                success: false,
                message,
            });
        }

        // Reflect the upload in subsequent searches, like the backend.
        let mut uploaded = self.uploaded.lock().unwrap();
        uploaded.push(entry.clone());
        let record = DocumentRecord {
            document_id: format!("doc-{}", uploaded.len()),
            major_head: entry.major_head.clone(),
            minor_head: entry.minor_head.clone(),
            tags: entry.tags.clone(),
            uploaded_by: entry.user_id.clone(),
            document_date: entry.document_date,
            file_url: format!("https://files.example.com/doc-{}.bin", uploaded.len()),
            document_remarks: entry.document_remarks.clone(),
        };
        drop(uploaded);
        self.documents.lock().unwrap().push(record);

        Ok(UploadOutcome {
            success: true,
            message: "Document uploaded successfully".to_string(),
        })
    }

    async fn document_tags(&self, _token: &str, _term: &str) -> Result<Vec<String>, ApiError> {
        self.tags_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn fetch_file(&self, _url: &str) -> Result<Bytes, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        match Self::take(&self.next_fetch_failure) {
            Some(failure) => Err(failure.into()),
            None => Ok(Bytes::from(self.file_bytes.lock().unwrap().clone())),
        }
    }
}

/// Scripted device pickers.
#[derive(Default)]
pub struct MockFileProvider {
    document: Mutex<Option<LocalFile>>,
    photo: Mutex<Option<LocalFile>>,
}

impl MockFileProvider {
    /// `None` plays a user cancelling the picker.
    pub fn set_document(&self, file: Option<LocalFile>) {
        *self.document.lock().unwrap() = file;
    }

    /// `None` plays a user backing out of the camera.
    pub fn set_photo(&self, file: Option<LocalFile>) {
        *self.photo.lock().unwrap() = file;
    }
}

#[async_trait]
impl FileProvider for MockFileProvider {
    async fn pick_document(&self) -> CoreResult<Option<LocalFile>> {
        Ok(self.document.lock().unwrap().clone())
    }

    async fn capture_photo(&self) -> CoreResult<Option<LocalFile>> {
        Ok(self.photo.lock().unwrap().clone())
    }
}

#[derive(Serialize)]
struct ForgedClaims {
    sub: String,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

fn encode_claims(claims: &ForgedClaims) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
    )
    .expect("token encoding cannot fail")
}

/// A signed token whose `exp` lies `expires_in_secs` from now (negative
/// for an already-expired token).
pub fn forge_token(sub: &str, expires_in_secs: i64) -> String {
    let now = Utc::now().timestamp();
    encode_claims(&ForgedClaims {
        sub: sub.to_string(),
        iat: now,
        exp: Some(now + expires_in_secs),
    })
}

/// A signed token with no `exp` claim at all.
pub fn forge_token_without_exp(sub: &str) -> String {
    encode_claims(&ForgedClaims {
        sub: sub.to_string(),
        iat: Utc::now().timestamp(),
        exp: None,
    })
}

/// A document record with the given id, category, and uploader, and
/// fixed values everywhere else.
pub fn record(document_id: &str, major_head: &str, uploaded_by: &str) -> DocumentRecord {
    DocumentRecord {
        document_id: document_id.to_string(),
        major_head: major_head.to_string(),
        minor_head: "General".to_string(),
        tags: Vec::new(),
        uploaded_by: uploaded_by.to_string(),
        document_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"),
        file_url: format!("https://files.example.com/{document_id}.pdf"),
        document_remarks: String::new(),
    }
}
