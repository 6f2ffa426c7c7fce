//! Session & document-sync core for the DocVault mobile client.
//!
//! Everything the screens need that is not presentation: establishing and
//! persisting a session from a phone/OTP challenge, keeping the local
//! document collection consistent with the remote search API, driving
//! multi-step uploads with progress and cancellation, and resolving
//! remote documents to locally renderable files.
//!
//! The UI layer is a collaborator, not a dependency: it calls these
//! components and renders their state, and the components never reference
//! a UI type. The remote backend and the device pickers are injected
//! through the [`remote::RemoteApi`] and [`remote::FileProvider`] traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docvault_core::{
//!     CoreConfig, DocumentRepository, FileKeyValueStore, OtpChallengeManager, SessionStore,
//! };
//!
//! let config = CoreConfig::from_env()?;
//! let api = Arc::new(dms_api::DmsClient::new(&config.api_base_url)?);
//! let storage = Arc::new(FileKeyValueStore::new("session.json"));
//! let sessions = Arc::new(SessionStore::new(storage, &config.session_storage_key));
//!
//! let otp = OtpChallengeManager::new(api.clone(), sessions.clone(), config.otp_code_length);
//! otp.request_code("+919999999999").await?;
//! let (session, user) = otp.verify_code("123456").await?;
//!
//! let repository = DocumentRepository::new(api, sessions);
//! let snapshot = repository.refresh(&docvault_core::SearchRequest::all()).await?;
//! ```

pub mod config;
pub mod error;
pub mod otp;
pub mod preview;
pub mod remote;
pub mod repository;
pub mod session;
pub mod testing;
pub mod upload;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use otp::{AuthUser, OtpChallenge, OtpChallengeManager, OtpStatus};
pub use preview::{PreviewArtifact, PreviewCache};
pub use remote::{FileProvider, RemoteApi};
pub use repository::{DocumentRepository, FilterCriteria};
pub use session::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Session, SessionStore};
pub use upload::{
    FileSource, LocalFile, UploadMetadata, UploadOrchestrator, UploadStatus, UploadTask,
};

// Canonical wire types, re-exported so callers rarely need `dms_api`
// directly.
pub use dms_api::{DocumentRecord, SearchRequest};
