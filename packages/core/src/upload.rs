//! Upload orchestration: local file acquisition, validation, and the
//! multipart transfer with progress, cancellation, and repository
//! invalidation.

use std::path::PathBuf;
use std::sync::Arc;

use dms_api::{ApiError, DocumentEntry, FilePayload};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::remote::{FileProvider, RemoteApi};
use crate::repository::DocumentRepository;
use crate::session::SessionStore;
use chrono::NaiveDate;

/// Where a file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    DocumentPicker,
    CameraCapture,
}

/// A locally acquired file, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Metadata attached to an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub major_head: String,
    pub minor_head: String,
    pub document_date: NaiveDate,
    pub remarks: String,
    pub tags: Vec<String>,
}

/// Per-task lifecycle: `Pending → Transferring → Succeeded | Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadStatus {
    Pending,
    Transferring,
    Succeeded,
    Failed {
        message: String,
        /// Distinguishes user cancellation from remote failure.
        canceled: bool,
    },
}

/// One upload attempt's worth of file + metadata, with observable status
/// and progress. Create it after acquisition, submit it through the
/// orchestrator, and discard it once a terminal state is acknowledged.
pub struct UploadTask {
    pub id: Uuid,
    file: LocalFile,
    metadata: UploadMetadata,
    status: watch::Sender<UploadStatus>,
    progress: Arc<watch::Sender<f32>>,
}

impl UploadTask {
    pub fn new(file: LocalFile, metadata: UploadMetadata) -> Self {
        let (status, _) = watch::channel(UploadStatus::Pending);
        let (progress, _) = watch::channel(0.0);
        Self {
            id: Uuid::new_v4(),
            file,
            metadata,
            status,
            progress: Arc::new(progress),
        }
    }

    pub fn file(&self) -> &LocalFile {
        &self.file
    }

    pub fn metadata(&self) -> &UploadMetadata {
        &self.metadata
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    /// Observe status transitions.
    pub fn watch_status(&self) -> watch::Receiver<UploadStatus> {
        self.status.subscribe()
    }

    /// Fraction of the payload handed to the transport, 0.0..=1.0.
    pub fn progress(&self) -> f32 {
        *self.progress.borrow()
    }

    /// Observe progress updates.
    pub fn watch_progress(&self) -> watch::Receiver<f32> {
        self.progress.subscribe()
    }

    fn fail(&self, message: impl Into<String>, canceled: bool) {
        self.status.send_replace(UploadStatus::Failed {
            message: message.into(),
            canceled,
        });
    }
}

/// Takes a locally referenced file plus metadata and produces a durable
/// remote record.
pub struct UploadOrchestrator<A: RemoteApi, F: FileProvider> {
    api: Arc<A>,
    files: Arc<F>,
    sessions: Arc<SessionStore>,
    repository: Arc<DocumentRepository<A>>,
    max_camera_file_bytes: u64,
}

impl<A: RemoteApi, F: FileProvider> UploadOrchestrator<A, F> {
    pub fn new(
        api: Arc<A>,
        files: Arc<F>,
        sessions: Arc<SessionStore>,
        repository: Arc<DocumentRepository<A>>,
        max_camera_file_bytes: u64,
    ) -> Self {
        Self {
            api,
            files,
            sessions,
            repository,
            max_camera_file_bytes,
        }
    }

    /// Acquire a file from the picker or the camera.
    ///
    /// `Ok(None)` means the user backed out; no task exists afterwards.
    /// Camera captures beyond the configured bound are rejected outright
    /// rather than truncated.
    pub async fn acquire_file(&self, source: FileSource) -> CoreResult<Option<LocalFile>> {
        let picked = match source {
            FileSource::DocumentPicker => self.files.pick_document().await?,
            FileSource::CameraCapture => self.files.capture_photo().await?,
        };
        let Some(file) = picked else {
            debug!(?source, "file acquisition canceled by user");
            return Ok(None);
        };

        if file.size == 0 {
            return Err(CoreError::validation("file", "selected file is empty"));
        }
        if source == FileSource::CameraCapture && file.size > self.max_camera_file_bytes {
            return Err(CoreError::FileTooLarge {
                size: file.size,
                limit: self.max_camera_file_bytes,
            });
        }

        debug!(name = %file.name, size = file.size, "file acquired");
        Ok(Some(file))
    }

    /// Transfer the task's file and metadata to the remote store.
    ///
    /// All preconditions are checked before any network traffic; a task
    /// already transferring is rejected, not queued. On success the
    /// repository snapshot is invalidated. Cancelling through `cancel`
    /// aborts the transfer and leaves the task `Failed` with a canceled
    /// marker. Retry is a fresh `submit` of the same task.
    pub async fn submit(&self, task: &UploadTask, cancel: CancellationToken) -> CoreResult<()> {
        validate_metadata(&task.metadata)?;
        if task.file.size == 0 {
            return Err(CoreError::validation("file", "selected file is empty"));
        }
        let session = self.sessions.require().await?;

        let mut gate: CoreResult<()> = Ok(());
        task.status.send_if_modified(|status| match status {
            UploadStatus::Pending | UploadStatus::Failed { .. } => {
                *status = UploadStatus::Transferring;
                true
            }
            UploadStatus::Transferring => {
                gate = Err(CoreError::Busy);
                false
            }
            UploadStatus::Succeeded => {
                gate = Err(CoreError::State("task already succeeded".into()));
                false
            }
        });
        gate?;
        task.progress.send_replace(0.0);

        let bytes = match tokio::fs::read(&task.file.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                task.fail(format!("could not read file: {e}"), false);
                return Err(CoreError::Storage(e.to_string()));
            }
        };

        let tags: Vec<String> = task
            .metadata
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .collect();
        let entry = DocumentEntry {
            major_head: task.metadata.major_head.trim().to_string(),
            minor_head: task.metadata.minor_head.trim().to_string(),
            document_date: task.metadata.document_date,
            document_remarks: task.metadata.remarks.trim().to_string(),
            tags,
            user_id: session.subject_id.clone().unwrap_or_default(),
        };
        let payload = FilePayload {
            file_name: task.file.name.clone(),
            mime_type: task.file.mime_type.clone(),
            bytes: bytes.into(),
            progress: Some(task.progress.clone()),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(task = %task.id, "upload canceled");
                task.fail("upload canceled", true);
                return Err(CoreError::Canceled);
            }
            result = self.api.upload_document(&session.token, payload, &entry) => result,
        };

        match result {
            Ok(outcome) if outcome.success => {
                task.progress.send_replace(1.0);
                task.status.send_replace(UploadStatus::Succeeded);
                // The remote store changed; the next read should refresh.
                self.repository.invalidate();
                debug!(task = %task.id, "upload succeeded");
                Ok(())
            }
            Ok(outcome) => {
                let message = if outcome.message.is_empty() {
                    "upload rejected by server".to_string()
                } else {
                    outcome.message
                };
                warn!(task = %task.id, message = %message, "upload rejected");
                task.fail(&message, false);
                Err(CoreError::Api(message))
            }
            Err(ApiError::Unauthorized) => {
                task.fail("session is no longer valid", false);
                Err(CoreError::SessionInvalid)
            }
            Err(err) => {
                let message = match &err {
                    ApiError::Api(m) if !m.is_empty() => m.clone(),
                    other => other.to_string(),
                };
                warn!(task = %task.id, error = %message, "upload failed");
                task.fail(&message, false);
                Err(err.into())
            }
        }
    }
}

fn validate_metadata(metadata: &UploadMetadata) -> CoreResult<()> {
    if metadata.major_head.trim().is_empty() {
        return Err(CoreError::validation("major_head", "category is required"));
    }
    if metadata.minor_head.trim().is_empty() {
        return Err(CoreError::validation(
            "minor_head",
            "sub-category is required",
        ));
    }
    if metadata.remarks.trim().is_empty() {
        return Err(CoreError::validation("remarks", "remarks are required"));
    }
    if metadata.tags.is_empty() {
        return Err(CoreError::validation(
            "tags",
            "at least one tag is required",
        ));
    }
    if metadata.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(CoreError::validation("tags", "tags must not be blank"));
    }
    Ok(())
}
