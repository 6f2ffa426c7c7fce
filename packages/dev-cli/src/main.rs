//! Developer CLI for driving the DocVault core against a live backend.
//!
//! Stands in for the mobile UI during development: sign in with phone +
//! OTP, list and filter documents, upload files, fetch previews.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Input;
use dms_api::DmsClient;
use tokio_util::sync::CancellationToken;

use docvault_core::{
    CoreConfig, CoreError, CoreResult, DocumentRepository, FileKeyValueStore, FileProvider,
    FileSource, FilterCriteria, LocalFile, OtpChallengeManager, PreviewCache, SearchRequest,
    SessionStore, UploadMetadata, UploadOrchestrator, UploadTask,
};

#[derive(Parser)]
#[command(name = "dev", about = "DocVault developer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with phone number + OTP
    Login,
    /// Forget the stored session
    Logout,
    /// List documents, with optional local filters
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        sub_category: Option<String>,
        /// May be given multiple times; a document matches any of them
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        uploaded_by: Option<String>,
    },
    /// Upload a file with metadata
    Upload {
        path: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        sub_category: String,
        /// Document date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        remarks: String,
        /// May be given multiple times; at least one is required
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
    },
    /// Download a document's file into the preview cache
    Fetch { document_id: String },
    /// Suggest known tags matching a term
    Tags { term: String },
}

/// The CLI's "picker": hands the orchestrator whatever path the user
/// passed on the command line.
#[derive(Default)]
struct CliFileProvider {
    next: Mutex<Option<LocalFile>>,
}

impl CliFileProvider {
    fn stage(&self, file: LocalFile) {
        *self.next.lock().expect("provider lock poisoned") = Some(file);
    }
}

#[async_trait]
impl FileProvider for CliFileProvider {
    async fn pick_document(&self) -> CoreResult<Option<LocalFile>> {
        Ok(self.next.lock().expect("provider lock poisoned").take())
    }

    async fn capture_photo(&self) -> CoreResult<Option<LocalFile>> {
        Ok(None)
    }
}

struct App {
    config: CoreConfig,
    sessions: Arc<SessionStore>,
    otp: OtpChallengeManager<DmsClient>,
    repository: Arc<DocumentRepository<DmsClient>>,
    orchestrator: UploadOrchestrator<DmsClient, CliFileProvider>,
    provider: Arc<CliFileProvider>,
    preview: PreviewCache<DmsClient>,
}

impl App {
    fn build() -> Result<Self> {
        let config = CoreConfig::from_env().context("loading configuration")?;
        let api =
            Arc::new(DmsClient::new(config.api_base_url.as_str()).context("creating API client")?);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("docvault");
        let storage = Arc::new(FileKeyValueStore::new(data_dir.join("session.json")));
        let sessions = Arc::new(SessionStore::new(
            storage,
            config.session_storage_key.as_str(),
        ));

        let otp = OtpChallengeManager::new(api.clone(), sessions.clone(), config.otp_code_length);
        let repository = Arc::new(DocumentRepository::new(api.clone(), sessions.clone()));
        let provider = Arc::new(CliFileProvider::default());
        let orchestrator = UploadOrchestrator::new(
            api.clone(),
            provider.clone(),
            sessions.clone(),
            repository.clone(),
            config.max_camera_file_bytes,
        );
        let preview = PreviewCache::new(api, config.preview_cache_dir.clone());

        Ok(Self {
            config,
            sessions,
            otp,
            repository,
            orchestrator,
            provider,
            preview,
        })
    }

    async fn login(&self) -> Result<()> {
        let phone: String = Input::new()
            .with_prompt("Phone number (with country code)")
            .interact_text()?;
        self.otp.request_code(&phone).await.map_err(friendly)?;
        println!("Code sent to {phone}");

        let code: String = Input::new()
            .with_prompt(format!("{}-digit code", self.config.otp_code_length))
            .interact_text()?;
        let (session, user) = self.otp.verify_code(&code).await.map_err(friendly)?;

        let name = user
            .display_name
            .or(user.subject_id)
            .unwrap_or_else(|| "there".to_string());
        println!("{} Signed in as {}", "✓".green(), name.bold());
        if let Some(expires_at) = session.expires_at {
            println!("  session valid until {expires_at}");
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.sessions.clear().await.map_err(friendly)?;
        println!("{} Session cleared", "✓".green());
        Ok(())
    }

    async fn list(&self, criteria: FilterCriteria) -> Result<()> {
        self.repository
            .refresh(&SearchRequest::all())
            .await
            .map_err(friendly)?;
        let records = self.repository.filter_locally(&criteria);

        if records.is_empty() {
            println!("No documents match.");
            return Ok(());
        }
        for record in &records {
            println!(
                "{}  {} / {}  {}  {}",
                record.document_id.bold(),
                record.major_head,
                record.minor_head,
                record.document_date,
                record.tags.join(", ").dimmed(),
            );
            if !record.document_remarks.is_empty() {
                println!("      {}", record.document_remarks.dimmed());
            }
        }
        println!("{} document(s)", records.len());
        Ok(())
    }

    async fn upload(
        &self,
        path: PathBuf,
        metadata: UploadMetadata,
    ) -> Result<()> {
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("path has no file name"))?;
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        self.provider.stage(LocalFile {
            path,
            name,
            mime_type,
            size: meta.len(),
        });

        let file = self
            .orchestrator
            .acquire_file(FileSource::DocumentPicker)
            .await
            .map_err(friendly)?
            .ok_or_else(|| anyhow!("no file staged"))?;

        let task = UploadTask::new(file, metadata);
        let mut progress = task.watch_progress();
        let watcher = tokio::spawn(async move {
            use std::io::Write;
            while progress.changed().await.is_ok() {
                let fraction = *progress.borrow();
                print!("\rUploading… {:>3.0}%", fraction * 100.0);
                std::io::stdout().flush().ok();
            }
        });

        let result = self
            .orchestrator
            .submit(&task, CancellationToken::new())
            .await;
        watcher.abort();
        println!();
        result.map_err(friendly)?;
        println!("{} Uploaded (task {})", "✓".green(), task.id);
        Ok(())
    }

    async fn fetch(&self, document_id: String) -> Result<()> {
        let snapshot = self
            .repository
            .refresh(&SearchRequest::all())
            .await
            .map_err(friendly)?;
        let record = snapshot
            .iter()
            .find(|r| r.document_id == document_id)
            .ok_or_else(|| anyhow!("no document with id {document_id}"))?;

        let artifact = self
            .preview
            .resolve(&record.document_id, &record.file_url)
            .await
            .map_err(friendly)?;
        println!(
            "{} Fetched to {}",
            "✓".green(),
            artifact.local_path.display()
        );
        Ok(())
    }

    async fn tags(&self, term: String) -> Result<()> {
        let tags = self.repository.tag_suggestions(&term).await.map_err(friendly)?;
        if tags.is_empty() {
            println!("No tags match '{term}'.");
        } else {
            println!("{}", tags.join("\n"));
        }
        Ok(())
    }
}

/// Turn core errors into actionable CLI messages.
fn friendly(err: CoreError) -> anyhow::Error {
    match err {
        CoreError::SessionInvalid => anyhow!("session is missing or expired — run `dev login`"),
        other => anyhow!(other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let app = App::build()?;

    match cli.command {
        Command::Login => app.login().await,
        Command::Logout => app.logout().await,
        Command::List {
            category,
            sub_category,
            tags,
            uploaded_by,
        } => {
            app.list(FilterCriteria {
                major_head: category,
                minor_head: sub_category,
                tags: (!tags.is_empty()).then_some(tags),
                uploaded_by,
                ..FilterCriteria::default()
            })
            .await
        }
        Command::Upload {
            path,
            category,
            sub_category,
            date,
            remarks,
            tags,
        } => {
            let metadata = UploadMetadata {
                major_head: category,
                minor_head: sub_category,
                document_date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
                remarks,
                tags,
            };
            app.upload(path, metadata).await
        }
        Command::Fetch { document_id } => app.fetch(document_id).await,
        Command::Tags { term } => app.tags(term).await,
    }
}
