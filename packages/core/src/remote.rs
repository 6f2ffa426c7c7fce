//! Collaborator seams: the remote API and the device file pickers.
//!
//! The core talks to the outside world only through these traits, so
//! tests (and previews) can substitute scripted implementations.

use async_trait::async_trait;
use bytes::Bytes;
use dms_api::{
    ApiError, AuthSuccess, DmsClient, DocumentEntry, DocumentRecord, FilePayload, SearchRequest,
    UploadOutcome,
};

use crate::error::CoreResult;
use crate::upload::LocalFile;

/// The remote document management API, as consumed by the core.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
    async fn generate_otp(&self, mobile_number: &str) -> Result<(), ApiError>;

    async fn validate_otp(&self, mobile_number: &str, otp: &str) -> Result<AuthSuccess, ApiError>;

    async fn search_documents(
        &self,
        token: &str,
        request: &SearchRequest,
    ) -> Result<Vec<DocumentRecord>, ApiError>;

    async fn upload_document(
        &self,
        token: &str,
        file: FilePayload,
        entry: &DocumentEntry,
    ) -> Result<UploadOutcome, ApiError>;

    async fn document_tags(&self, token: &str, term: &str) -> Result<Vec<String>, ApiError>;

    async fn fetch_file(&self, url: &str) -> Result<Bytes, ApiError>;
}

#[async_trait]
impl RemoteApi for DmsClient {
    async fn generate_otp(&self, mobile_number: &str) -> Result<(), ApiError> {
        DmsClient::generate_otp(self, mobile_number).await
    }

    async fn validate_otp(&self, mobile_number: &str, otp: &str) -> Result<AuthSuccess, ApiError> {
        DmsClient::validate_otp(self, mobile_number, otp).await
    }

    async fn search_documents(
        &self,
        token: &str,
        request: &SearchRequest,
    ) -> Result<Vec<DocumentRecord>, ApiError> {
        DmsClient::search_documents(self, token, request).await
    }

    async fn upload_document(
        &self,
        token: &str,
        file: FilePayload,
        entry: &DocumentEntry,
    ) -> Result<UploadOutcome, ApiError> {
        DmsClient::upload_document(self, token, file, entry).await
    }

    async fn document_tags(&self, token: &str, term: &str) -> Result<Vec<String>, ApiError> {
        DmsClient::document_tags(self, token, term).await
    }

    async fn fetch_file(&self, url: &str) -> Result<Bytes, ApiError> {
        DmsClient::fetch_file(self, url).await
    }
}

/// Device file acquisition (document picker, camera).
///
/// Methods resolve to `Ok(None)` when the user backs out, so cancellation
/// is a value, not an error, and never leaves a half-built task behind.
#[async_trait]
pub trait FileProvider: Send + Sync + 'static {
    async fn pick_document(&self) -> CoreResult<Option<LocalFile>>;

    async fn capture_photo(&self) -> CoreResult<Option<LocalFile>>;
}
