//! Preview cache: resolves a remote document reference to a locally
//! renderable artifact, downloading at most once per document.
//!
//! Concurrent `resolve` calls for one document share a single in-flight
//! fetch and its outcome. A failed fetch is never cached as a success;
//! the next fresh call retries it. The cache is content-type agnostic —
//! it only guarantees bytes at a local path — and is not durable across
//! process restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::remote::RemoteApi;

/// A document made locally renderable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewArtifact {
    pub document_id: String,
    pub local_path: PathBuf,
}

enum Entry {
    Ready(PathBuf),
    Failed {
        session_invalid: bool,
        message: String,
    },
    InFlight(Arc<Notify>),
}

enum Action {
    Hit(PathBuf),
    SharedFailure(CoreError),
    Wait(Arc<Notify>),
    Fetch(Arc<Notify>),
}

type EntryMap = Arc<Mutex<HashMap<String, Entry>>>;

/// Single-flight download cache keyed by document id.
pub struct PreviewCache<A: RemoteApi> {
    api: Arc<A>,
    dir: PathBuf,
    entries: EntryMap,
}

impl<A: RemoteApi> PreviewCache<A> {
    pub fn new(api: Arc<A>, dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            dir: dir.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return a local artifact for the document, downloading if needed.
    ///
    /// Cache hits return immediately. If another call is already fetching
    /// the same document, this call awaits that fetch and shares its
    /// outcome. A `Failed` entry left by an earlier call is retried.
    pub async fn resolve(&self, document_id: &str, remote_url: &str) -> CoreResult<PreviewArtifact> {
        let mut waited = false;
        loop {
            let action = {
                let mut entries = self.entries.lock().expect("preview lock poisoned");
                if !entries.contains_key(document_id) {
                    let notify = Arc::new(Notify::new());
                    entries.insert(document_id.to_string(), Entry::InFlight(notify.clone()));
                    Action::Fetch(notify)
                } else {
                    let entry = entries.get_mut(document_id).expect("checked above");
                    match entry {
                        Entry::Ready(path) => Action::Hit(path.clone()),
                        Entry::InFlight(notify) => Action::Wait(notify.clone()),
                        Entry::Failed {
                            session_invalid,
                            message,
                        } => {
                            if waited {
                                // We awaited this exact fetch; report its
                                // failure rather than silently retrying.
                                Action::SharedFailure(failure_error(*session_invalid, message))
                            } else {
                                let notify = Arc::new(Notify::new());
                                *entry = Entry::InFlight(notify.clone());
                                Action::Fetch(notify)
                            }
                        }
                    }
                }
            };

            match action {
                Action::Hit(local_path) => {
                    return Ok(PreviewArtifact {
                        document_id: document_id.to_string(),
                        local_path,
                    })
                }
                Action::SharedFailure(err) => return Err(err),
                Action::Wait(notify) => {
                    waited = true;
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    // The flight may have settled between releasing the
                    // lock and registering; re-check before sleeping.
                    let still_in_flight = {
                        let entries = self.entries.lock().expect("preview lock poisoned");
                        matches!(
                            entries.get(document_id),
                            Some(Entry::InFlight(current)) if Arc::ptr_eq(current, &notify)
                        )
                    };
                    if still_in_flight {
                        notified.await;
                    }
                }
                Action::Fetch(notify) => {
                    return self.fetch(document_id, remote_url, notify).await;
                }
            }
        }
    }

    async fn fetch(
        &self,
        document_id: &str,
        remote_url: &str,
        notify: Arc<Notify>,
    ) -> CoreResult<PreviewArtifact> {
        // Settles the entry even if this future is dropped mid-download,
        // so waiters are never stranded on a flight that no longer exists.
        let mut guard = FlightGuard {
            entries: self.entries.clone(),
            document_id: document_id.to_string(),
            notify,
            armed: true,
        };

        let result = self.download(document_id, remote_url).await;
        match &result {
            Ok(local_path) => {
                debug!(document_id, path = %local_path.display(), "preview cached");
                guard.finish(Entry::Ready(local_path.clone()));
            }
            Err(err) => {
                warn!(document_id, error = %err, "preview fetch failed");
                guard.finish(Entry::Failed {
                    session_invalid: matches!(err, CoreError::SessionInvalid),
                    message: err.to_string(),
                });
            }
        }

        result.map(|local_path| PreviewArtifact {
            document_id: document_id.to_string(),
            local_path,
        })
    }

    async fn download(&self, document_id: &str, remote_url: &str) -> CoreResult<PathBuf> {
        let bytes = self.api.fetch_file(remote_url).await?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let name = format!("{:x}", Sha256::digest(document_id.as_bytes()));
        let path = self
            .dir
            .join(format!("{name}.{}", extension_of(remote_url)));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(path)
    }

    /// Drop the cached artifact for a document, deleting its file.
    ///
    /// An entry still fetching is left alone so its waiters settle; evict
    /// again once it has. Missing entries and files are not errors.
    pub async fn evict(&self, document_id: &str) -> CoreResult<()> {
        let removed = {
            let mut entries = self.entries.lock().expect("preview lock poisoned");
            let in_flight = matches!(entries.get(document_id), Some(Entry::InFlight(_)));
            if in_flight {
                None
            } else {
                entries.remove(document_id)
            }
        };
        if let Some(Entry::Ready(path)) = removed {
            remove_artifact(&path).await?;
        }
        Ok(())
    }

    /// Evict every settled entry.
    pub async fn clear(&self) -> CoreResult<()> {
        let paths: Vec<PathBuf> = {
            let mut entries = self.entries.lock().expect("preview lock poisoned");
            let mut paths = Vec::new();
            entries.retain(|_, entry| match entry {
                Entry::InFlight(_) => true,
                Entry::Ready(path) => {
                    paths.push(path.clone());
                    false
                }
                Entry::Failed { .. } => false,
            });
            paths
        };
        for path in paths {
            remove_artifact(&path).await?;
        }
        Ok(())
    }
}

struct FlightGuard {
    entries: EntryMap,
    document_id: String,
    notify: Arc<Notify>,
    armed: bool,
}

impl FlightGuard {
    fn settle(&self, entry: Entry) {
        let mut entries = self.entries.lock().expect("preview lock poisoned");
        // Only overwrite our own flight; an evicted-and-replaced entry
        // belongs to someone else.
        let ours = matches!(
            entries.get(&self.document_id),
            Some(Entry::InFlight(current)) if Arc::ptr_eq(current, &self.notify)
        );
        if ours {
            entries.insert(self.document_id.clone(), entry);
        }
        drop(entries);
        self.notify.notify_waiters();
    }

    fn finish(&mut self, entry: Entry) {
        self.armed = false;
        self.settle(entry);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.settle(Entry::Failed {
                session_invalid: false,
                message: "preview fetch aborted".to_string(),
            });
        }
    }
}

fn failure_error(session_invalid: bool, message: &str) -> CoreError {
    if session_invalid {
        CoreError::SessionInvalid
    } else {
        CoreError::Api(message.to_string())
    }
}

async fn remove_artifact(path: &std::path::Path) -> CoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::Storage(e.to_string())),
    }
}

/// File extension from a URL path, defaulting to `bin`. The presentation
/// layer decides renderability; this only names the artifact on disk.
fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemoteApi, ScriptedFailure};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn cache(api: Arc<MockRemoteApi>, dir: &tempfile::TempDir) -> PreviewCache<MockRemoteApi> {
        PreviewCache::new(api, dir.path().join("previews"))
    }

    #[tokio::test]
    async fn test_second_resolve_is_a_cache_hit() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_file_bytes(b"%PDF-1.4".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(api.clone(), &dir);

        let first = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        assert!(first.local_path.exists());
        assert_eq!(first.local_path.extension().unwrap(), "pdf");

        let second = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let api = Arc::new(MockRemoteApi::new().with_latency(Duration::from_millis(50)));
        api.set_file_bytes(b"bytes".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache(api.clone(), &dir));

        let racer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .resolve("doc-1", "https://files.example.com/doc-1.pdf")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let ours = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();

        let theirs = racer.await.unwrap().unwrap();
        assert_eq!(ours, theirs);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached_and_next_call_retries() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_file_bytes(b"bytes".to_vec());
        api.fail_fetch(ScriptedFailure::Network("connection reset".into()));
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(api.clone(), &dir);

        let first = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await;
        assert!(first.is_err());

        // The scripted failure is consumed; a fresh call refetches and
        // succeeds.
        let second = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        assert!(second.local_path.exists());
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiters_share_the_failure() {
        let api = Arc::new(MockRemoteApi::new().with_latency(Duration::from_millis(50)));
        api.fail_fetch(ScriptedFailure::Api("gone".into()));
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache(api.clone(), &dir));

        let racer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .resolve("doc-1", "https://files.example.com/doc-1.pdf")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await;

        assert!(racer.await.unwrap().is_err());
        assert!(waiter.is_err());
        // The waiter shared the outcome instead of fetching again.
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evict_deletes_artifact_and_allows_refetch() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_file_bytes(b"bytes".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(api.clone(), &dir);

        let artifact = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        cache.evict("doc-1").await.unwrap();
        assert!(!artifact.local_path.exists());
        // Evicting again is a no-op.
        cache.evict("doc-1").await.unwrap();

        cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_evicts_everything() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_file_bytes(b"bytes".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(api.clone(), &dir);

        let a = cache
            .resolve("doc-1", "https://files.example.com/doc-1.pdf")
            .await
            .unwrap();
        let b = cache
            .resolve("doc-2", "https://files.example.com/doc-2.png")
            .await
            .unwrap();
        cache.clear().await.unwrap();
        assert!(!a.local_path.exists());
        assert!(!b.local_path.exists());
    }

    #[test]
    fn test_extension_of_urls() {
        assert_eq!(extension_of("https://x.example.com/a/b/report.PDF"), "pdf");
        assert_eq!(extension_of("https://x.example.com/photo.jpeg?sig=abc"), "jpeg");
        assert_eq!(extension_of("https://x.example.com/blob"), "bin");
        assert_eq!(extension_of("https://x.example.com/odd.tarball"), "bin");
    }
}
