//! # RepoLens CLI (`lens`)
//!
//! ## Usage
//!
//! ```bash
//! lens --config ./config/repolens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lens init` | Create the SQLite database and its schema |
//! | `lens repo add <owner/name>` | Register a repository |
//! | `lens repo list` | List registered repositories |
//! | `lens repo remove <repo>` | Delete a repository and everything derived from it |
//! | `lens sync <repo>` | Fetch the repository tree and contents |
//! | `lens tree <repo>` | Print the directory tree |
//! | `lens show <repo> <path>` | Print one file, fetching it if needed |
//! | `lens analyze <repo> [--file <path>]` | Analyze the repository or one file |
//! | `lens explain-symbol <repo> <path> <name>` | Explain one declaration |
//! | `lens chat <repo> <message> [--file <path>]` | Ask a question |
//! | `lens history <repo> [--file <path>]` | Print a conversation |
//!
//! `<repo>` is either a repository id or `owner/name`. Logs go to stderr
//! (filter with `RUST_LOG`); results go to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use repolens::config::{self, Config};
use repolens::context::Lens;
use repolens::conversation::ChatOutcome;
use repolens::progress::ProgressMode;
use repolens::{db, migrate};
use repolens_core::models::{ContextScope, Repository};
use repolens_core::LensError;

/// RepoLens: repository ingestion and AI-assisted code comprehension.
#[derive(Parser)]
#[command(name = "lens", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repolens.toml")]
    config: PathBuf,

    /// User the repositories and conversations belong to.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage registered repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Fetch the repository tree and file contents from GitHub.
    Sync {
        repo: String,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json_progress: bool,
    },

    /// Print the directory tree of the last successful sync.
    Tree { repo: String },

    /// Print one file, fetching its content if the sync skipped it.
    Show {
        repo: String,
        path: String,

        /// List the file's symbols instead of its content.
        #[arg(long)]
        symbols: bool,
    },

    /// Analyze the whole repository, or one file with `--file`.
    Analyze {
        repo: String,

        #[arg(long)]
        file: Option<String>,
    },

    /// Explain a function, class or type declared in a file.
    ExplainSymbol {
        repo: String,
        path: String,
        name: String,
    },

    /// Ask a question about the repository, or one file with `--file`.
    Chat {
        repo: String,
        message: String,

        #[arg(long)]
        file: Option<String>,
    },

    /// Print a stored conversation.
    History {
        repo: String,

        #[arg(long)]
        file: Option<String>,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register `owner/name` at a branch, tag or commit.
    Add {
        spec: String,

        #[arg(long = "ref", default_value = "main")]
        reference: String,
    },
    List,
    Remove { repo: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg.db).await?;
        migrate::run_migrations(&pool).await?;
        println!("Database initialized at {}", cfg.db.path.display());
        return Ok(());
    }

    let result = run(cli, &cfg).await;
    if let Err(err) = &result {
        if let Some(hint) = retry_hint(err) {
            eprintln!("{}", hint);
        }
    }
    result
}

/// Hint printed after errors that may clear up on their own.
fn retry_hint(err: &anyhow::Error) -> Option<String> {
    let lens_err = err.chain().find_map(|e| e.downcast_ref::<LensError>())?;
    lens_err.is_retryable().then(|| {
        format!(
            "hint: {} is temporary, try again later",
            lens_err.code()
        )
    })
}

async fn run(cli: Cli, cfg: &Config) -> Result<()> {
    let lens = Lens::from_config(cfg).await?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Init => {}
        Commands::Repo { action } => match action {
            RepoAction::Add { spec, reference } => {
                let (owner, name) = split_spec(&spec)?;
                let repo = lens
                    .ingestor
                    .add_repository(user, owner, name, &reference)
                    .await?;
                println!("{}  {}@{}  {}", repo.id, repo.full_name(), repo.reference, repo.status);
            }
            RepoAction::List => {
                let repos = lens.ingestor.list_repositories(user).await?;
                if repos.is_empty() {
                    println!("No repositories. Add one with `lens repo add owner/name`.");
                }
                for repo in repos {
                    print_repository(&repo);
                }
            }
            RepoAction::Remove { repo } => {
                let repo = resolve(&lens, user, &repo).await?;
                lens.ingestor.remove_repository(&repo.id).await?;
                println!("Removed {}", repo.full_name());
            }
        },
        Commands::Sync { repo, json_progress } => {
            let repo = resolve(&lens, user, &repo).await?;
            let mode = if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            let report = lens
                .ingestor
                .start_sync(&repo.id, mode.reporter())
                .await
                .with_context(|| format!("sync of {} failed", repo.full_name()))?;

            println!("{}: {} files ({} ms)", repo.full_name(), report.files, report.duration_ms);
            println!(
                "  fetched {}  oversized {}  binary {}  excluded {}  symbols {}",
                report.fetched, report.oversized, report.binary, report.excluded, report.symbols
            );
            if let Some(partial) = &report.partial {
                println!(
                    "  unavailable {} of {}: {}",
                    partial.unavailable.len(),
                    partial.attempted,
                    partial.unavailable.join(", ")
                );
            }
            if !report.heuristics.is_empty() {
                println!("{}", report.heuristics.describe());
            }
        }
        Commands::Tree { repo } => {
            let repo = resolve(&lens, user, &repo).await?;
            let tree = lens.ingestor.file_tree(&repo.id).await?;
            print!("{}", tree.render());
        }
        Commands::Show { repo, path, symbols } => {
            let repo = resolve(&lens, user, &repo).await?;
            if symbols {
                for symbol in lens.ingestor.symbols(&repo.id, &path).await? {
                    println!(
                        "{:>5}-{:<5} {:<10} {}",
                        symbol.start_line,
                        symbol.end_line,
                        symbol.kind.as_str(),
                        symbol.name
                    );
                }
            } else {
                let file = lens.ingestor.file(&repo.id, &path).await?;
                match file.content {
                    Some(content) => print!("{}", content),
                    None => println!("({} bytes, no text content)", file.size),
                }
            }
        }
        Commands::Analyze { repo, file } => {
            let repo = resolve(&lens, user, &repo).await?;
            let json = match file {
                Some(path) => serde_json::to_string_pretty(
                    &lens.analysis.analyze_file(&repo.id, &path).await?,
                )?,
                None => serde_json::to_string_pretty(&lens.analysis.analyze(&repo.id).await?)?,
            };
            println!("{}", json);
        }
        Commands::ExplainSymbol { repo, path, name } => {
            let repo = resolve(&lens, user, &repo).await?;
            let explained = lens
                .analysis
                .explain_symbol_in_file(&repo.id, &path, &name)
                .await?;
            println!("{}", serde_json::to_string_pretty(&explained)?);
        }
        Commands::Chat {
            repo,
            message,
            file,
        } => {
            let repo = resolve(&lens, user, &repo).await?;
            let outcome = lens
                .conversations
                .send(user, &repo.id, &scope_of(file.as_deref()), &message)
                .await?;
            println!("{}", outcome.reply());
            if let ChatOutcome::ProviderFailed { error, .. } = outcome {
                return Err(anyhow::Error::new(error).context("completion provider failed"));
            }
        }
        Commands::History { repo, file } => {
            let repo = resolve(&lens, user, &repo).await?;
            match lens
                .conversations
                .history(user, &repo.id, &scope_of(file.as_deref()))
                .await?
            {
                Some(conversation) => {
                    for message in &conversation.messages {
                        println!("[{}] {}\n", message.role.as_str(), message.content);
                    }
                }
                None => println!("No conversation yet."),
            }
        }
    }

    Ok(())
}

fn split_spec(spec: &str) -> Result<(&str, &str)> {
    match spec.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => bail!("expected owner/name, got '{}'", spec),
    }
}

fn scope_of(file: Option<&str>) -> ContextScope {
    match file {
        Some(path) => ContextScope::file(path),
        None => ContextScope::repository(),
    }
}

/// Find a repository by id, or by `owner/name` among the user's.
async fn resolve(lens: &Lens, user: &str, spec: &str) -> Result<Repository> {
    if !spec.contains('/') {
        return Ok(lens.ingestor.get_repository(spec).await?);
    }
    let matches: Vec<Repository> = lens
        .ingestor
        .list_repositories(user)
        .await?
        .into_iter()
        .filter(|r| r.full_name().eq_ignore_ascii_case(spec))
        .collect();
    match matches.len() {
        0 => bail!("no repository named {} for user {}", spec, user),
        1 => Ok(matches.into_iter().next().context("repository vanished")?),
        _ => bail!(
            "{} is registered at several refs; use its id (see `lens repo list`)",
            spec
        ),
    }
}

fn print_repository(repo: &Repository) {
    let synced = repo
        .synced_at
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{}  {}@{}  {}  synced {}",
        repo.id,
        repo.full_name(),
        repo.reference,
        repo.status,
        synced
    );
    if let Some(reason) = &repo.last_error {
        println!("    last error: {}", reason);
    }
}
