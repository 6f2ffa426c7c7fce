//! Document snapshot and filtered views.
//!
//! The repository is the sole writer of the document snapshot: `refresh`
//! replaces it wholesale from one remote search, `filter_locally` serves
//! synchronous subsets of it, and nothing else ever mutates it. Readers
//! see the old snapshot or the new one, never a mix.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use dms_api::{DocumentRecord, SearchRequest};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::remote::RemoteApi;
use crate::session::SessionStore;

/// Client-side filter over the current snapshot. Unset fields constrain
/// nothing; this is held by the caller and never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub major_head: Option<String>,
    pub minor_head: Option<String>,
    pub tags: Option<Vec<String>>,
    pub uploaded_by: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

struct RefreshGate {
    last_query: Option<SearchRequest>,
}

/// Maintains the authoritative document snapshot.
pub struct DocumentRepository<A: RemoteApi> {
    api: Arc<A>,
    sessions: Arc<SessionStore>,
    snapshot: RwLock<Arc<Vec<DocumentRecord>>>,
    stale: AtomicBool,
    generation: AtomicU64,
    refresh_gate: Mutex<RefreshGate>,
}

impl<A: RemoteApi> DocumentRepository<A> {
    pub fn new(api: Arc<A>, sessions: Arc<SessionStore>) -> Self {
        Self {
            api,
            sessions,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            stale: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            refresh_gate: Mutex::new(RefreshGate { last_query: None }),
        }
    }

    /// The current snapshot (possibly empty, possibly stale).
    pub fn records(&self) -> Arc<Vec<DocumentRecord>> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    /// Whether the snapshot should be refreshed before the next read
    /// (set after a successful upload).
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Mark the snapshot stale so the next read refreshes.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Replace the snapshot with the result of one remote search.
    ///
    /// Requires a valid session; a 401-equivalent surfaces as
    /// [`CoreError::SessionInvalid`] and is never retried here. On any
    /// failure the previous snapshot is retained. Concurrent refreshes of
    /// an equal query collapse into one remote call whose result all
    /// callers share.
    pub async fn refresh(&self, query: &SearchRequest) -> CoreResult<Arc<Vec<DocumentRecord>>> {
        let session = self.sessions.require().await?;

        let entered = self.generation.load(Ordering::Acquire);
        let mut gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != entered
            && gate.last_query.as_ref() == Some(query)
        {
            // Someone else refreshed this exact query while we waited;
            // adopt their snapshot instead of searching again.
            return Ok(self.records());
        }

        let records = self.api.search_documents(&session.token, query).await?;
        debug!(count = records.len(), "snapshot replaced");

        let snapshot = Arc::new(records);
        *self.snapshot.write().expect("snapshot lock poisoned") = snapshot.clone();
        self.stale.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);
        gate.last_query = Some(query.clone());
        Ok(snapshot)
    }

    /// Pure, synchronous filter over the current snapshot.
    ///
    /// Logical AND across supplied fields; within `tags`, OR across the
    /// listed tags. Text fields match case-insensitively as substrings,
    /// dates as an inclusive calendar range. Never touches the network
    /// and never yields a record outside the snapshot.
    pub fn filter_locally(&self, criteria: &FilterCriteria) -> Vec<DocumentRecord> {
        let snapshot = self.records();
        snapshot
            .iter()
            .filter(|record| matches_criteria(record, criteria))
            .cloned()
            .collect()
    }

    /// Known tags matching a term, for typeahead. Requires a session.
    pub async fn tag_suggestions(&self, term: &str) -> CoreResult<Vec<String>> {
        let session = self.sessions.require().await?;
        Ok(self.api.document_tags(&session.token, term).await?)
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn text_matches(value: &str, wanted: &Option<String>) -> bool {
    match wanted.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(needle) => contains_ci(value, needle),
    }
}

fn matches_criteria(record: &DocumentRecord, criteria: &FilterCriteria) -> bool {
    if !text_matches(&record.major_head, &criteria.major_head)
        || !text_matches(&record.minor_head, &criteria.minor_head)
        || !text_matches(&record.uploaded_by, &criteria.uploaded_by)
    {
        return false;
    }

    if let Some(wanted) = criteria
        .tags
        .as_deref()
        .filter(|tags| !tags.is_empty())
    {
        let any = wanted.iter().any(|wanted_tag| {
            record
                .tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(wanted_tag))
        });
        if !any {
            return false;
        }
    }

    if let Some(from) = criteria.from_date {
        if record.document_date < from {
            return false;
        }
    }
    if let Some(to) = criteria.to_date {
        if record.document_date > to {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryKeyValueStore;
    use crate::testing::{forge_token, record, MockRemoteApi, ScriptedFailure};
    use std::time::Duration;

    async fn repo_with_session(
        api: Arc<MockRemoteApi>,
    ) -> (DocumentRepository<MockRemoteApi>, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryKeyValueStore::new()),
            "session_token",
        ));
        sessions.save(&forge_token("user-1", 3600)).await.unwrap();
        (DocumentRepository::new(api, sessions.clone()), sessions)
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![record("1", "Personal", "John"), record("2", "Professional", "HR")]);
        let (repo, _) = repo_with_session(api.clone()).await;

        assert!(repo.is_stale());
        let snapshot = repo.refresh(&SearchRequest::all()).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(!repo.is_stale());

        api.set_documents(vec![record("3", "Personal", "Tom")]);
        let snapshot = repo.refresh(&SearchRequest::all()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].document_id, "3");
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_session_invalid() {
        let api = Arc::new(MockRemoteApi::new());
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryKeyValueStore::new()),
            "session_token",
        ));
        let repo = DocumentRepository::new(api.clone(), sessions);

        let result = repo.refresh(&SearchRequest::all()).await;
        assert!(matches!(result, Err(CoreError::SessionInvalid)));
        assert_eq!(
            api.search_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_unauthorized_refresh_signals_session_invalid() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![record("1", "Personal", "John")]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        api.fail_search(ScriptedFailure::Unauthorized);
        let result = repo.refresh(&SearchRequest::all()).await;
        assert!(matches!(result, Err(CoreError::SessionInvalid)));
        // Prior snapshot untouched.
        assert_eq!(repo.records().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_retains_previous_snapshot() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![record("1", "Personal", "John")]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        api.fail_search(ScriptedFailure::Network("connection reset".into()));
        let result = repo.refresh(&SearchRequest::all()).await;
        assert!(matches!(result, Err(CoreError::Network(_))));
        assert_eq!(repo.records().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse_into_one_call() {
        let api = Arc::new(MockRemoteApi::new().with_latency(Duration::from_millis(50)));
        api.set_documents(vec![record("1", "Personal", "John")]);
        let (repo, _) = repo_with_session(api.clone()).await;
        let repo = Arc::new(repo);

        let first = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.refresh(&SearchRequest::all()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = repo.refresh(&SearchRequest::all()).await.unwrap();

        let first = first.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            api.search_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_queued_refresh_with_different_query_still_searches() {
        let api = Arc::new(MockRemoteApi::new().with_latency(Duration::from_millis(30)));
        api.set_documents(vec![record("1", "Personal", "John")]);
        let (repo, _) = repo_with_session(api.clone()).await;
        let repo = Arc::new(repo);

        let first = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.refresh(&SearchRequest::all()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let narrower = SearchRequest {
            major_head: Some("Personal".into()),
            ..SearchRequest::all()
        };
        repo.refresh(&narrower).await.unwrap();

        first.await.unwrap().unwrap();
        assert_eq!(
            api.search_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    fn dated(id: &str, date: (i32, u32, u32)) -> DocumentRecord {
        let mut r = record(id, "Personal", "John");
        r.document_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        r
    }

    #[tokio::test]
    async fn test_filter_with_no_criteria_returns_full_snapshot() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![
            record("1", "Personal", "John"),
            record("2", "Professional", "HR"),
            record("3", "Personal", "Tom"),
        ]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        let filtered = repo.filter_locally(&FilterCriteria::default());
        let snapshot = repo.records();
        assert_eq!(filtered, **snapshot);
    }

    #[tokio::test]
    async fn test_filter_is_case_insensitive_substring() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![
            record("1", "Personal", "John"),
            record("2", "Professional", "HR"),
        ]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        let filtered = repo.filter_locally(&FilterCriteria {
            major_head: Some("pRoFe".into()),
            ..FilterCriteria::default()
        });
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].document_id, "2");

        // Blank strings constrain nothing.
        let filtered = repo.filter_locally(&FilterCriteria {
            major_head: Some("   ".into()),
            ..FilterCriteria::default()
        });
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_tags_or_within_and_across_fields() {
        let api = Arc::new(MockRemoteApi::new());
        let mut a = record("1", "Personal", "John");
        a.tags = vec!["passport".into(), "travel".into()];
        let mut b = record("2", "Personal", "John");
        b.tags = vec!["invoice".into()];
        let mut c = record("3", "Professional", "HR");
        c.tags = vec!["passport".into()];
        api.set_documents(vec![a, b, c]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        // OR within tags: passport or invoice.
        let filtered = repo.filter_locally(&FilterCriteria {
            tags: Some(vec!["Passport".into(), "invoice".into()]),
            ..FilterCriteria::default()
        });
        assert_eq!(filtered.len(), 3);

        // AND with major_head narrows it.
        let filtered = repo.filter_locally(&FilterCriteria {
            tags: Some(vec!["passport".into()]),
            major_head: Some("personal".into()),
            ..FilterCriteria::default()
        });
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].document_id, "1");
    }

    #[tokio::test]
    async fn test_filter_date_range_is_inclusive() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_documents(vec![
            dated("1", (2024, 1, 10)),
            dated("2", (2024, 2, 15)),
            dated("3", (2024, 3, 20)),
        ]);
        let (repo, _) = repo_with_session(api.clone()).await;
        repo.refresh(&SearchRequest::all()).await.unwrap();

        let filtered = repo.filter_locally(&FilterCriteria {
            from_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            to_date: NaiveDate::from_ymd_opt(2024, 2, 15),
            ..FilterCriteria::default()
        });
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].document_id, "1");
        assert_eq!(filtered[1].document_id, "2");
    }

    #[tokio::test]
    async fn test_tag_suggestions_require_session() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_tags(vec!["invoice".into(), "passport".into()]);
        let (repo, sessions) = repo_with_session(api.clone()).await;

        let tags = repo.tag_suggestions("in").await.unwrap();
        assert_eq!(tags, vec!["invoice", "passport"]);

        sessions.clear().await.unwrap();
        let result = repo.tag_suggestions("in").await;
        assert!(matches!(result, Err(CoreError::SessionInvalid)));
    }
}
