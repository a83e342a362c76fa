use anyhow::{Context, Result};
use clap::Parser;
use driftsync_core::changeset::AttributeValue;
use driftsync_core::conflict::ConflictPolicy;
use driftsync_core::engine::VacuumOutcome;
use driftsync_core::graph::{MemoryGraph, ObjectStore};
use driftsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use driftsync_core::model::ObjectId;
use driftsync_core::remote::FolderTransport;
use driftsync_core::{
    CancelToken, ClientId, ClientInfo, DocumentId, DocumentInfo, SyncConfig, SyncContext,
    SyncManager,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "driftsync")]
#[command(author, version, about = "Synchronize object graphs over a shared folder", long_about = None)]
struct Args {
    /// Application identifier (the root directory on the medium)
    #[arg(short, long, default_value = "driftsync")]
    app_id: String,

    /// Path to the shared folder acting as the medium
    #[arg(short, long, default_value = "~/driftsync-medium")]
    medium: String,

    /// Local data directory (identity, sealed sets, marks, graph)
    #[arg(short, long, default_value = "~/.driftsync")]
    data_dir: String,

    /// Encryption password, if the application is encrypted
    #[arg(short, long)]
    password: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Register this client with the application
    Register {
        /// Human-readable device description
        #[arg(default_value = "driftsync client")]
        description: String,
    },

    /// Register a document for synchronization
    RegisterDoc {
        document: String,
        /// Logical container path stored with the document
        #[arg(default_value = "")]
        container: String,
    },

    /// Run one sync cycle for a document
    Sync { document: String },

    /// Set an attribute on an object and publish the change
    Set {
        document: String,
        object: String,
        attribute: String,
        value: String,
    },

    /// Delete an object and publish the change
    DeleteObject { document: String, object: String },

    /// Print an object's attributes
    Get { document: String, object: String },

    /// List clients registered with the application
    Clients {
        /// Also list each client's documents
        #[arg(long)]
        with_documents: bool,
    },

    /// List documents previously synchronized by any client
    Docs,

    /// Upload this client's whole store for peers to bootstrap from
    UploadStore { document: String },

    /// Bootstrap from the freshest peer whole store
    Download { document: String },

    /// Remove superseded change sets, if every peer has applied them
    Vacuum { document: String },

    /// Tombstone a document and remove it from the medium
    DeleteDoc { document: String },

    /// Watch the medium and sync automatically until interrupted
    Watch { document: String },
}

/// Client identity persisted across invocations
#[derive(Debug, Serialize, Deserialize)]
struct Identity {
    client_id: ClientId,
    description: String,
}

fn load_or_create_identity(data_dir: &Path, description: &str) -> Result<Identity> {
    let path = data_dir.join("identity.json");
    if path.exists() {
        let bytes = std::fs::read(&path).context("reading identity file")?;
        return Ok(serde_json::from_slice(&bytes).context("parsing identity file")?);
    }

    let identity =
        Identity { client_id: ClientId::generate(), description: description.to_string() };
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, serde_json::to_vec_pretty(&identity)?)?;
    info!(client = %identity.client_id, "created new client identity");
    Ok(identity)
}

/// Persisted graph image for one document
fn graph_path(data_dir: &Path, doc: &DocumentId) -> PathBuf {
    data_dir.join(doc.as_str()).join("graph.bin")
}

async fn load_graph(data_dir: &Path, doc: &DocumentId) -> Result<Arc<MemoryGraph>> {
    let graph = Arc::new(MemoryGraph::new());
    let path = graph_path(data_dir, doc);
    if path.exists() {
        let bytes = std::fs::read(&path).context("reading local graph")?;
        graph.load_snapshot(&bytes).await.context("loading local graph")?;
    }
    Ok(graph)
}

async fn save_graph(data_dir: &Path, doc: &DocumentId, graph: &MemoryGraph) -> Result<()> {
    let bytes = graph.current_graph_snapshot().await.context("serializing local graph")?;
    let path = graph_path(data_dir, doc);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &bytes)?;
    Ok(())
}

struct Cli {
    manager: Arc<SyncManager>,
    data_dir: PathBuf,
    password: Option<String>,
}

impl Cli {
    async fn open(args: &Args, description: &str) -> Result<Self> {
        let data_dir = PathBuf::from(shellexpand::tilde(&args.data_dir).into_owned());
        let medium = PathBuf::from(shellexpand::tilde(&args.medium).into_owned());
        std::fs::create_dir_all(&medium).context("creating medium directory")?;

        let identity = load_or_create_identity(&data_dir, description)?;

        let mut config = SyncConfig::from_env().context("loading configuration")?;
        config.storage.data_dir = data_dir.clone();

        let ctx = SyncContext {
            app_id: args.app_id.clone(),
            client: ClientInfo::new(
                identity.client_id,
                identity.description,
                serde_json::json!({ "agent": "driftsync-cli" }),
            ),
            transport: Arc::new(FolderTransport::new(medium)),
            config,
            policy: ConflictPolicy::default(),
        };

        Ok(Cli {
            manager: Arc::new(SyncManager::new(ctx)),
            data_dir,
            password: args.password.clone(),
        })
    }

    async fn register(&self) -> Result<()> {
        self.manager
            .register(self.password.as_deref(), CancelToken::new())
            .await
            .context("client registration failed")?;
        Ok(())
    }

    async fn open_document(&self, doc: &DocumentId) -> Result<Arc<MemoryGraph>> {
        let graph = load_graph(&self.data_dir, doc).await?;
        let info = DocumentInfo::new(doc.clone(), String::new());
        self.manager
            .register_document(&info, graph.clone(), CancelToken::new())
            .await
            .context("document registration failed")?;
        Ok(graph)
    }

    async fn sync_and_save(&self, doc: &DocumentId, graph: &MemoryGraph) -> Result<()> {
        let report = self
            .manager
            .synchronize(doc, CancelToken::new())
            .await
            .context("sync cycle failed")?;
        save_graph(&self.data_dir, doc, graph).await?;

        if report.bootstrapped {
            println!("backlog too deep; adopted a peer's whole-store snapshot");
        }
        println!(
            "applied {} set(s), {} conflict(s) resolved{}",
            report.applied_sets,
            report.conflicts_resolved,
            report
                .published
                .map(|id| format!(", published {}", id))
                .unwrap_or_default()
        );
        if !report.skipped_corrupt.is_empty() {
            for id in &report.skipped_corrupt {
                eprintln!("warning: skipped corrupt set {}", id);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::from_str(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    match &args.command {
        Command::Register { description } => {
            let cli = Cli::open(&args, description).await?;
            cli.register().await?;
            println!("registered as {}", cli.manager.client_id());
        }

        Command::RegisterDoc { document, container } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = load_graph(&cli.data_dir, &doc).await?;
            let info = DocumentInfo::new(doc.clone(), container.clone());
            cli.manager
                .register_document(&info, graph, CancelToken::new())
                .await
                .context("document registration failed")?;
            println!("registered document {}", doc);
        }

        Command::Sync { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = cli.open_document(&doc).await?;
            cli.sync_and_save(&doc, &graph).await?;
        }

        Command::Set { document, object, attribute, value } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = cli.open_document(&doc).await?;

            let object = ObjectId::new(object.clone());
            let text = AttributeValue::Text(value.clone());
            let record = driftsync_core::changeset::ChangeRecord::update(
                object.clone(),
                cli.manager.client_id().clone(),
                [(attribute.clone(), text.clone())].into_iter().collect(),
                Default::default(),
            );
            graph.apply_record(&record).await?;
            cli.manager
                .with_tracker(&doc, |tracker| {
                    tracker.record_update(object, attribute.clone(), text)
                })
                .await?;

            cli.sync_and_save(&doc, &graph).await?;
        }

        Command::DeleteObject { document, object } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = cli.open_document(&doc).await?;

            let object = ObjectId::new(object.clone());
            let record = driftsync_core::changeset::ChangeRecord::delete(
                object.clone(),
                cli.manager.client_id().clone(),
            );
            graph.apply_record(&record).await?;
            cli.manager
                .with_tracker(&doc, |tracker| tracker.record_delete(object))
                .await?;

            cli.sync_and_save(&doc, &graph).await?;
        }

        Command::Get { document, object } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            let doc = DocumentId::new(document.clone());
            let graph = load_graph(&cli.data_dir, &doc).await?;
            let object = ObjectId::new(object.clone());
            match graph.get(&object) {
                Some(obj) => {
                    for (name, value) in &obj.attributes {
                        println!("{} = {}", name, value);
                    }
                    for (name, targets) in &obj.relationships {
                        let ids: Vec<&str> = targets.iter().map(|t| t.as_str()).collect();
                        println!("{} -> [{}]", name, ids.join(", "));
                    }
                }
                None if graph.is_deleted(&object) => println!("(deleted)"),
                None => println!("(not found)"),
            }
        }

        Command::Clients { with_documents } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let clients = cli
                .manager
                .request_client_list(*with_documents, CancelToken::new())
                .await?;
            for client in clients {
                println!("{}  {}", client.info.client_id, client.info.description);
                for doc in &client.documents {
                    println!("    {}", doc);
                }
            }
        }

        Command::Docs => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let docs = cli
                .manager
                .request_previously_synchronized_documents(CancelToken::new())
                .await?;
            for doc in docs {
                println!("{}  {}", doc.document_id, doc.container_path);
            }
        }

        Command::UploadStore { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            cli.open_document(&doc).await?;
            cli.manager.upload_whole_store(&doc, CancelToken::new()).await?;
            println!("uploaded whole store for {}", doc);
        }

        Command::Download { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = cli.open_document(&doc).await?;
            let report = cli.manager.request_download(&doc, CancelToken::new()).await?;
            save_graph(&cli.data_dir, &doc, &graph).await?;
            println!("adopted whole store, then applied {} newer set(s)", report.applied_sets);
        }

        Command::Vacuum { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            cli.open_document(&doc).await?;
            match cli.manager.vacuum(&doc, CancelToken::new()).await? {
                VacuumOutcome::Vacuumed { removed_remote, removed_local, cutoff } => {
                    println!(
                        "removed {} remote and {} local set(s) through {}",
                        removed_remote, removed_local, cutoff
                    );
                }
                VacuumOutcome::Unsafe { reason } => println!("vacuum refused: {}", reason),
            }
        }

        Command::DeleteDoc { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            cli.manager.delete_document(&doc, CancelToken::new()).await?;
            println!("deleted document {}", doc);
        }

        Command::Watch { document } => {
            let cli = Cli::open(&args, "driftsync client").await?;
            cli.register().await?;
            let doc = DocumentId::new(document.clone());
            let graph = cli.open_document(&doc).await?;

            // Catch up first, then follow remote activity
            cli.sync_and_save(&doc, &graph).await?;

            let cancel = CancelToken::new();
            cli.manager.enable_auto_sync(&doc, cancel.clone()).await?;
            println!("watching {}; press Ctrl-C to stop", doc);

            tokio::signal::ctrl_c().await?;
            cancel.cancel();
            save_graph(&cli.data_dir, &doc, &graph).await?;
            println!("stopped");
        }
    }

    Ok(())
}
