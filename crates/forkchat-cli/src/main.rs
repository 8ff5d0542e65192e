//! forkchat CLI
//!
//! Command-line interface for branching conversation sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forkchat_core::{AppConfig, Provenance, Session};
use forkchat_tree::storage::codec;
use forkchat_tree::{ConversationNode, NodePatch, SessionStorage, TreeStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forkchat")]
#[command(about = "forkchat - branching conversation trees")]
#[command(version)]
struct Cli {
    /// Data directory (default: ~/.forkchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data dir>/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty session
    New {
        /// Session name
        name: String,
    },

    /// List stored sessions, newest first
    List,

    /// Show a session as an outline
    Show {
        session: String,
    },

    /// Record a question and its answer
    Add {
        session: String,

        #[arg(short, long)]
        question: String,

        #[arg(short, long)]
        answer: String,

        /// Parent node id or name (omit for a new root)
        #[arg(short, long)]
        parent: Option<String>,

        /// Section of the parent's answer the question is about
        #[arg(short, long)]
        section: Option<usize>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        tokens: Option<u64>,

        #[arg(long)]
        cost: Option<f64>,
    },

    /// List the answer sections of a node
    Sections {
        session: String,
        node: String,
    },

    /// Print the context (or full prompt) for a follow-up on a node
    Context {
        session: String,
        node: String,

        #[arg(short, long)]
        section: Option<usize>,

        /// Follow-up question; prints the full prompt when given
        #[arg(short, long)]
        question: Option<String>,
    },

    /// Delete a node and its subtree
    Delete {
        session: String,
        node: String,
    },

    /// Toggle a node's collapsed flag
    Collapse {
        session: String,
        node: String,
    },

    /// Toggle a node's bookmark
    Bookmark {
        session: String,
        node: String,
    },

    /// Recompute canvas positions
    Layout {
        session: String,
    },

    /// Show session statistics
    Stats {
        session: String,
    },

    /// Write the session document as JSON
    Export {
        session: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a session document
    Import {
        file: PathBuf,

        /// Replace the tree of an existing session instead of adding a new one
        /// (without it the import is stored under a fresh session id)
        #[arg(long)]
        into: Option<String>,
    },

    /// Remove a stored session
    Remove {
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Logs go to stderr so exported JSON on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(data_dir = ?config.data_dir, "Using data directory");
    let storage = config.storage();

    match cli.command {
        Commands::New { name } => cmd_new(&config, &storage, name).await,
        Commands::List => cmd_list(&storage).await,
        Commands::Show { session } => cmd_show(&config, &storage, &session).await,
        Commands::Add {
            session,
            question,
            answer,
            parent,
            section,
            model,
            provider,
            tokens,
            cost,
        } => {
            let provenance = Provenance {
                model,
                provider,
                tokens,
                cost,
                ..Default::default()
            };
            let request = AddRequest {
                parent,
                section,
                question,
                answer,
                provenance,
            };
            cmd_add(&config, &storage, &session, request).await
        }
        Commands::Sections { session, node } => {
            cmd_sections(&config, &storage, &session, &node).await
        }
        Commands::Context {
            session,
            node,
            section,
            question,
        } => cmd_context(&config, &storage, &session, &node, section, question).await,
        Commands::Delete { session, node } => cmd_delete(&config, &storage, &session, &node).await,
        Commands::Collapse { session, node } => {
            cmd_collapse(&config, &storage, &session, &node).await
        }
        Commands::Bookmark { session, node } => {
            cmd_bookmark(&config, &storage, &session, &node).await
        }
        Commands::Layout { session } => cmd_layout(&config, &storage, &session).await,
        Commands::Stats { session } => cmd_stats(&config, &storage, &session).await,
        Commands::Export { session, output } => {
            cmd_export(&config, &storage, &session, output).await
        }
        Commands::Import { file, into } => cmd_import(&config, &storage, &file, into).await,
        Commands::Remove { session } => cmd_remove(&storage, &session).await,
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = match (&cli.config, &cli.data_dir) {
        (Some(path), _) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, Some(dir)) => AppConfig::load_or_default(&dir.join("config.yaml")),
        (None, None) => AppConfig::load(),
    };

    Ok(match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir.clone()),
        None => config,
    })
}

async fn open(config: &AppConfig, storage: &SessionStorage, id: &str) -> Result<Session> {
    let session = Session::load_from_storage(storage, id)
        .await
        .with_context(|| format!("Failed to open session {}", id))?;
    Ok(session.with_config(config))
}

/// Resolve a node by id, or by its display name when that is unique.
fn resolve_node<'a>(store: &'a TreeStore, key: &str) -> Result<&'a ConversationNode> {
    if let Some(node) = store.get_node(key) {
        return Ok(node);
    }

    let matches: Vec<&ConversationNode> = store
        .iter_depth_first()
        .map(|(_, node)| node)
        .filter(|node| node.name == key)
        .collect();

    match matches.as_slice() {
        [node] => Ok(*node),
        [] => anyhow::bail!("No node with id or name {}", key),
        _ => anyhow::bail!("Name {} is ambiguous, use the node id", key),
    }
}

fn resolve_id(session: &Session, key: &str) -> Result<String> {
    Ok(resolve_node(session.store(), key)?.id.clone())
}

async fn cmd_new(config: &AppConfig, storage: &SessionStorage, name: String) -> Result<()> {
    config.ensure_dirs().context("Failed to create data directory")?;

    let session = Session::create(name);
    session.save(storage).await?;

    println!("✓ Created session {} ({})", session.name(), session.id());
    Ok(())
}

async fn cmd_list(storage: &SessionStorage) -> Result<()> {
    let summaries = storage.list().await?;

    if summaries.is_empty() {
        println!("No sessions yet. Create one with: forkchat new <name>");
        return Ok(());
    }

    for summary in summaries {
        println!(
            "{}  {:<24} {:>4} nodes  {}",
            summary.id,
            summary.name,
            summary.total_nodes,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_show(config: &AppConfig, storage: &SessionStorage, id: &str) -> Result<()> {
    let session = open(config, storage, id).await?;

    println!("{} ({})", session.name(), session.id());
    println!();
    if session.store().is_empty() {
        println!("  (empty)");
    } else {
        print!("{}", session.store().tree().to_outline());
    }
    Ok(())
}

struct AddRequest {
    parent: Option<String>,
    section: Option<usize>,
    question: String,
    answer: String,
    provenance: Provenance,
}

async fn cmd_add(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    request: AddRequest,
) -> Result<()> {
    let mut session = open(config, storage, id).await?;

    let parent_id = match &request.parent {
        Some(key) => Some(resolve_id(&session, key)?),
        None => None,
    };

    let prepared = session.ask(parent_id.as_deref(), request.section, &request.question)?;
    let node_id = session.record_answer(&prepared, request.answer, request.provenance)?;
    session.save(storage).await?;

    let node = resolve_node(session.store(), &node_id)?;
    println!("✓ Added {} ({})", node.name, node.id);
    Ok(())
}

async fn cmd_sections(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    key: &str,
) -> Result<()> {
    let session = open(config, storage, id).await?;
    let node = resolve_node(session.store(), key)?;
    let sections = session.store().sections_for(&node.id).unwrap_or_default();

    if sections.is_empty() {
        println!("{} has no answer sections.", node.name);
        return Ok(());
    }

    for section in sections {
        println!("[{}] {}", section.index, section.text);
    }
    Ok(())
}

async fn cmd_context(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    key: &str,
    section: Option<usize>,
    question: Option<String>,
) -> Result<()> {
    let session = open(config, storage, id).await?;
    let node_id = resolve_id(&session, key)?;

    let prepared = session.ask(Some(node_id.as_str()), section, question.as_deref().unwrap_or(""))?;
    match question {
        Some(_) => println!("{}", prepared.prompt),
        None => println!("{}", prepared.context),
    }
    Ok(())
}

async fn cmd_delete(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    key: &str,
) -> Result<()> {
    let mut session = open(config, storage, id).await?;
    let node_id = resolve_id(&session, key)?;

    let removed = session.store_mut().delete_node(&node_id)?;
    session.save(storage).await?;

    println!("✓ Deleted {} node(s)", removed.len());
    Ok(())
}

async fn cmd_collapse(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    key: &str,
) -> Result<()> {
    let mut session = open(config, storage, id).await?;
    let node_id = resolve_id(&session, key)?;

    let collapsed = session.store_mut().toggle_collapse(&node_id)?;
    session.save(storage).await?;

    println!("✓ {} {}", key, if collapsed { "collapsed" } else { "expanded" });
    Ok(())
}

async fn cmd_bookmark(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    key: &str,
) -> Result<()> {
    let mut session = open(config, storage, id).await?;
    let node = resolve_node(session.store(), key)?;
    let node_id = node.id.clone();
    let bookmarked = !node.is_bookmarked;

    session
        .store_mut()
        .update_node(&node_id, NodePatch::new().bookmarked(bookmarked))?;
    session.save(storage).await?;

    println!(
        "✓ {} {}",
        key,
        if bookmarked { "bookmarked" } else { "unbookmarked" }
    );
    Ok(())
}

async fn cmd_layout(config: &AppConfig, storage: &SessionStorage, id: &str) -> Result<()> {
    let mut session = open(config, storage, id).await?;

    let report = session.auto_layout();
    session.save(storage).await?;

    println!(
        "✓ Laid out {} node(s), depth {}",
        report.positions.len(),
        report.max_depth
    );
    if let Err(e) = report.check() {
        println!("✗ {}", e);
    }
    Ok(())
}

async fn cmd_stats(config: &AppConfig, storage: &SessionStorage, id: &str) -> Result<()> {
    let session = open(config, storage, id).await?;
    let stats = session.store().stats();
    let info = session.info();

    println!("{} ({})", info.name, info.id);
    println!();
    println!("  Nodes:      {}", stats.total_nodes);
    println!("  Roots:      {}", stats.total_roots);
    println!("  Bookmarks:  {}", session.store().bookmarked().len());
    println!("  Tokens:     {}", stats.total_tokens);
    println!("  Cost:       ${:.4}", stats.total_cost);
    println!("  Created:    {}", info.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Updated:    {}", info.updated_at.format("%Y-%m-%d %H:%M"));
    Ok(())
}

async fn cmd_export(
    config: &AppConfig,
    storage: &SessionStorage,
    id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let session = open(config, storage, id).await?;
    let json = codec::to_json(&session.export_document())?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Exported to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_import(
    config: &AppConfig,
    storage: &SessionStorage,
    file: &Path,
    into: Option<String>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document = codec::from_json(&text).context("Invalid session document")?;

    let session = match into {
        Some(id) => {
            let mut session = open(config, storage, &id).await?;
            session.import_document(document)?;
            session
        }
        None => {
            config.ensure_dirs().context("Failed to create data directory")?;
            Session::import_new(document)?
        }
    };
    session.save(storage).await?;

    println!(
        "✓ Imported {} node(s) into {} ({})",
        session.store().len(),
        session.name(),
        session.id()
    );
    Ok(())
}

async fn cmd_remove(storage: &SessionStorage, id: &str) -> Result<()> {
    storage
        .delete(id)
        .await
        .with_context(|| format!("Failed to remove session {}", id))?;
    println!("✓ Removed session {}", id);
    Ok(())
}
