//! End-to-end flows across the core components, driven against the
//! scripted collaborators from `docvault_core::testing`.

use std::sync::Arc;

use docvault_core::testing::{forge_token, record, MockFileProvider, MockRemoteApi};
use docvault_core::{
    CoreError, DocumentRepository, FileKeyValueStore, FilterCriteria, LocalFile,
    MemoryKeyValueStore, OtpChallengeManager, OtpStatus, PreviewCache, SearchRequest,
    SessionStore, UploadMetadata, UploadOrchestrator, UploadStatus, UploadTask,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    api: Arc<MockRemoteApi>,
    sessions: Arc<SessionStore>,
    otp: OtpChallengeManager<MockRemoteApi>,
    repository: Arc<DocumentRepository<MockRemoteApi>>,
    orchestrator: UploadOrchestrator<MockRemoteApi, MockFileProvider>,
    preview_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let api = Arc::new(MockRemoteApi::new());
    let sessions = Arc::new(SessionStore::new(
        Arc::new(MemoryKeyValueStore::new()),
        "session_token",
    ));
    let otp = OtpChallengeManager::new(api.clone(), sessions.clone(), 6);
    let repository = Arc::new(DocumentRepository::new(api.clone(), sessions.clone()));
    let orchestrator = UploadOrchestrator::new(
        api.clone(),
        Arc::new(MockFileProvider::default()),
        sessions.clone(),
        repository.clone(),
        5 * 1024 * 1024,
    );
    Harness {
        api,
        sessions,
        otp,
        repository,
        orchestrator,
        preview_dir: tempfile::tempdir().expect("temp dir"),
    }
}

fn upload_fixture(dir: &tempfile::TempDir) -> (LocalFile, UploadMetadata) {
    let path = dir.path().join("statement.pdf");
    std::fs::write(&path, b"%PDF-1.4 statement").expect("write fixture");
    let file = LocalFile {
        path,
        name: "statement.pdf".into(),
        mime_type: "application/pdf".into(),
        size: 18,
    };
    let metadata = UploadMetadata {
        major_head: "Professional".into(),
        minor_head: "Finance".into(),
        document_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date"),
        remarks: "June bank statement".into(),
        tags: vec!["statement".into(), "bank".into()],
    };
    (file, metadata)
}

#[tokio::test]
async fn test_otp_to_search_to_upload_round_trip() {
    let h = harness();
    h.api.set_auth_token(forge_token("dharmesh", 3600));
    h.api.set_documents(vec![record("1", "Personal", "dharmesh")]);

    // Authenticate.
    h.otp.request_code("9999999999").await.expect("OTP sent");
    let (session, _) = h.otp.verify_code("123456").await.expect("OTP verified");
    assert_eq!(session.subject_id.as_deref(), Some("dharmesh"));
    assert_eq!(h.otp.challenge().await.status, OtpStatus::Verified);

    // The persisted session backs the repository.
    let snapshot = h.repository.refresh(&SearchRequest::all()).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(!h.repository.is_stale());

    // Upload, observe invalidation, refresh, and find the new record.
    let (file, metadata) = upload_fixture(&h.preview_dir);
    let task = UploadTask::new(file, metadata.clone());
    h.orchestrator
        .submit(&task, CancellationToken::new())
        .await
        .expect("upload succeeds");
    assert_eq!(task.status(), UploadStatus::Succeeded);
    assert!(h.repository.is_stale());

    let snapshot = h.repository.refresh(&SearchRequest::all()).await.unwrap();
    let uploaded = snapshot
        .iter()
        .find(|r| r.document_remarks == metadata.remarks)
        .expect("uploaded record is searchable");
    assert_eq!(uploaded.major_head, metadata.major_head);
    assert_eq!(uploaded.minor_head, metadata.minor_head);
    assert_eq!(uploaded.tags, metadata.tags);
    assert_eq!(uploaded.document_date, metadata.document_date);
    assert_eq!(uploaded.uploaded_by, "dharmesh");

    // The new record filters and previews like any other.
    let filtered = h.repository.filter_locally(&FilterCriteria {
        tags: Some(vec!["bank".into()]),
        ..FilterCriteria::default()
    });
    assert_eq!(filtered.len(), 1);

    h.api.set_file_bytes(b"%PDF-1.4 statement".to_vec());
    let cache = PreviewCache::new(h.api.clone(), h.preview_dir.path().join("previews"));
    let artifact = cache
        .resolve(&uploaded.document_id, &uploaded.file_url)
        .await
        .expect("preview resolves");
    assert!(artifact.local_path.exists());
}

#[tokio::test]
async fn test_expired_session_routes_back_through_otp() {
    let h = harness();
    h.api.set_documents(vec![record("1", "Personal", "dharmesh")]);

    // Plant an expired session the way a stale install would have one.
    h.sessions.save(&forge_token("dharmesh", -60)).await.ok();
    let result = h.repository.refresh(&SearchRequest::all()).await;
    assert!(matches!(result, Err(CoreError::SessionInvalid)));

    // Re-authenticating repairs the flow.
    h.api.set_auth_token(forge_token("dharmesh", 3600));
    h.otp.request_code("9999999999").await.unwrap();
    h.otp.verify_code("123456").await.unwrap();
    let snapshot = h.repository.refresh(&SearchRequest::all()).await.unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn test_logout_invalidates_everything_downstream() {
    let h = harness();
    h.api.set_auth_token(forge_token("dharmesh", 3600));
    h.api.set_documents(vec![record("1", "Personal", "dharmesh")]);
    h.otp.request_code("9999999999").await.unwrap();
    h.otp.verify_code("123456").await.unwrap();
    h.repository.refresh(&SearchRequest::all()).await.unwrap();

    h.sessions.clear().await.unwrap();

    assert!(matches!(
        h.repository.refresh(&SearchRequest::all()).await,
        Err(CoreError::SessionInvalid)
    ));
    let (file, metadata) = upload_fixture(&h.preview_dir);
    let task = UploadTask::new(file, metadata);
    assert!(matches!(
        h.orchestrator.submit(&task, CancellationToken::new()).await,
        Err(CoreError::SessionInvalid)
    ));

    // The last snapshot is still readable locally; failures are
    // non-destructive.
    assert_eq!(h.repository.records().len(), 1);
}

#[tokio::test]
async fn test_session_survives_restart_via_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.json");
    let token = forge_token("dharmesh", 3600);

    {
        let sessions = SessionStore::new(Arc::new(FileKeyValueStore::new(&path)), "session_token");
        sessions.save(&token).await.unwrap();
    }

    // A fresh store over the same file sees the same session.
    let sessions = SessionStore::new(Arc::new(FileKeyValueStore::new(&path)), "session_token");
    let session = sessions.load().await.unwrap().expect("session persisted");
    assert_eq!(session.token, token);
    assert_eq!(session.subject_id.as_deref(), Some("dharmesh"));
}
