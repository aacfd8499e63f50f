use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use drawbridge_core::config::{Config, LoggingConfig};
use drawbridge_core::{Document, Folder, FolderKind, StoreHandle, TemplateSource};

#[derive(Parser)]
#[command(
    name = "drawbridge",
    about = "Manage the folders and drawings of a Drawbridge workspace",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show workspace status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Folder management
    Folders {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Document management
    Docs {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Recently deleted documents
    Trash {
        #[command(subcommand)]
        action: TrashAction,
    },

    /// Merge an elements array (JSON file) into a document's scene
    Merge { document: Uuid, elements: PathBuf },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[derive(Subcommand)]
enum FolderAction {
    /// List all folders, newest first
    List,
    /// Create a folder
    Create { name: String },
    /// Rename a folder
    Rename { folder: Uuid, name: String },
    /// Set or clear a folder's icon
    Icon { folder: Uuid, icon: Option<String> },
    /// Delete a folder, moving its documents to the trash
    Delete { folder: Uuid },
}

#[derive(Subcommand)]
enum DocAction {
    /// List documents in a folder (default folder when omitted)
    List { folder: Option<Uuid> },
    /// Create a document from the template
    Create { folder: Option<Uuid> },
    /// Rename a document
    Rename { document: Uuid, name: String },
    /// Move a document to another folder
    Move { document: Uuid, folder: Uuid },
    /// Move a document to the trash
    Trash { document: Uuid },
    /// Restore a trashed document to its previous folder
    Restore { document: Uuid },
    /// Permanently delete a trashed document
    Delete { document: Uuid },
    /// Print a document as JSON
    Show { document: Uuid },
}

#[derive(Subcommand)]
enum TrashAction {
    /// List trashed documents
    List,
    /// Permanently delete everything in the trash
    Empty,
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = logging
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.into());
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for directive in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Ignoring log filter {directive:?}: {e}"),
        }
    }

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn print_folder(folder: &Folder) {
    let kind = match folder.kind {
        FolderKind::Default => "default",
        FolderKind::Normal => "folder",
        FolderKind::Trash => "trash",
    };
    let icon = folder.icon.as_deref().unwrap_or("-");
    println!("{}  {kind:<7}  {icon:<8}  {}", folder.id, folder.name);
}

fn print_document(doc: &Document) {
    println!(
        "{}  {}  {}",
        doc.id,
        doc.updated_at.format("%Y-%m-%d %H:%M"),
        doc.name
    );
}

async fn folder_of_kind(store: &StoreHandle, kind: FolderKind) -> anyhow::Result<Folder> {
    store
        .list_folders()
        .await?
        .into_iter()
        .find(|f| f.kind == kind)
        .with_context(|| format!("workspace has no {kind:?} folder"))
}

async fn resolve_folder(store: &StoreHandle, folder: Option<Uuid>) -> anyhow::Result<Uuid> {
    match folder {
        Some(id) => Ok(id),
        None => Ok(folder_of_kind(store, FolderKind::Default).await?.id),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_logging(cli.verbose, config.logging.as_ref());

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let template = TemplateSource::from_override(config.template_path());
    let store_dir = config.store_dir();
    tracing::debug!(path = %store_dir.display(), template = %template.describe(), "Opening workspace");
    let store = StoreHandle::open(store_dir.clone(), template.clone()).await?;

    let result = run(cli.command, &store, &config_path, &store_dir, &template).await;
    let closed = store.close().await;
    result?;
    closed?;
    Ok(())
}

async fn run(
    command: Commands,
    store: &StoreHandle,
    config_path: &std::path::Path,
    store_dir: &std::path::Path,
    template: &TemplateSource,
) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let folders = store.list_folders().await?;
            let mut documents = 0;
            for folder in &folders {
                documents += store.list_documents(folder.id).await?.len();
            }
            println!("Drawbridge v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Workspace: {}", store_dir.display());
            println!("Template: {}", template.describe());
            println!("Folders: {}", folders.len());
            println!("Documents: {documents}");
        }
        Commands::Config { .. } => {}
        Commands::Folders { action } => match action {
            FolderAction::List => {
                for folder in store.list_folders().await? {
                    print_folder(&folder);
                }
            }
            FolderAction::Create { name } => print_folder(&store.create_folder(name).await?),
            FolderAction::Rename { folder, name } => {
                print_folder(&store.rename_folder(folder, name).await?)
            }
            FolderAction::Icon { folder, icon } => {
                print_folder(&store.set_folder_icon(folder, icon).await?)
            }
            FolderAction::Delete { folder } => {
                let moved = store.delete_folder(folder).await?;
                println!("Deleted folder; {moved} document(s) moved to the trash");
            }
        },
        Commands::Docs { action } => match action {
            DocAction::List { folder } => {
                let folder = resolve_folder(store, folder).await?;
                for doc in store.list_documents(folder).await? {
                    print_document(&doc);
                }
            }
            DocAction::Create { folder } => {
                let folder = resolve_folder(store, folder).await?;
                print_document(&store.create_document(folder).await?);
            }
            DocAction::Rename { document, name } => {
                print_document(&store.rename_document(document, name).await?)
            }
            DocAction::Move { document, folder } => {
                print_document(&store.move_document(document, folder).await?)
            }
            DocAction::Trash { document } => {
                print_document(&store.trash_document(document).await?)
            }
            DocAction::Restore { document } => {
                print_document(&store.restore_document(document).await?)
            }
            DocAction::Delete { document } => {
                store.delete_document(document).await?;
                println!("Deleted {document}");
            }
            DocAction::Show { document } => {
                let doc = store.document(document).await?;
                println!("{}", serde_json::to_string_pretty(&doc)?);
            }
        },
        Commands::Trash { action } => match action {
            TrashAction::List => {
                let trash = folder_of_kind(store, FolderKind::Trash).await?;
                for doc in store.list_documents(trash.id).await? {
                    print_document(&doc);
                }
            }
            TrashAction::Empty => {
                let removed = store.empty_trash().await?;
                println!("Removed {removed} document(s)");
            }
        },
        Commands::Merge { document, elements } => {
            let raw = tokio::fs::read_to_string(&elements)
                .await
                .with_context(|| format!("reading {}", elements.display()))?;
            if store.update_elements(document, raw).await? {
                store.save().await?;
                println!("Merged elements into {document}");
            } else {
                println!("{document} has no scene to merge into; left unchanged");
            }
        }
    }
    Ok(())
}
