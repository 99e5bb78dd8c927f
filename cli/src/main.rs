//! Quill command line host.
//!
//! Wires the core operations to a settings store in the user's data
//! directory and prints every result envelope as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use quill_core::agents::{
    CloudGenerator, GeminiClient, NullRegistry, OllamaRegistry, ProviderRegistry,
};
use quill_core::db::{init_db, init_memory_db, DbPool};
use quill_core::logging::recent_events;
use quill_core::{
    Deadlines, Envelope, MemorySettingsStore, QuillError, ReadinessPolicy, SettingsPatch,
    SettingsStore, SqliteSettingsStore, TextOps,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tiered text assistant: on-device, cloud, then local stub", long_about = None)]
struct Cli {
    /// Directory holding quill.db (defaults to the platform data dir)
    #[arg(long, env = "QUILL_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Keep settings in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Base URL of the cloud generation endpoint
    #[arg(long, env = "QUILL_CLOUD_ENDPOINT", global = true)]
    cloud_endpoint: Option<String>,

    /// Local model runtime to use as the on-device tier
    #[arg(long, env = "QUILL_LOCAL_URL", global = true)]
    local_url: Option<String>,

    /// Model served by the local runtime
    #[arg(long, env = "QUILL_LOCAL_MODEL", global = true, default_value = "llama3.2")]
    local_model: String,

    /// Treat models that still need downloading as usable
    #[arg(long, global = true)]
    lenient: bool,

    #[arg(long, global = true)]
    acquire_timeout_secs: Option<u64>,

    #[arg(long, global = true)]
    exec_timeout_secs: Option<u64>,

    /// Record tier decisions in the event journal
    #[arg(long, global = true)]
    journal: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize text (argument or stdin)
    Summarize {
        text: Option<String>,
        #[arg(long)]
        sentences: Option<usize>,
    },
    Translate {
        text: Option<String>,
        /// Target language code
        #[arg(long)]
        to: Option<String>,
        /// Source language code
        #[arg(long)]
        from: Option<String>,
    },
    Proofread {
        text: Option<String>,
    },
    Rewrite {
        text: Option<String>,
        /// Free-text style, e.g. "more formal and shorter"
        #[arg(long)]
        style: Option<String>,
    },
    Write {
        prompt: Option<String>,
    },
    /// Ask for a structured (JSON) answer
    Prompt {
        prompt: Option<String>,
    },
    Simplify {
        text: Option<String>,
        /// Reading level, e.g. "grade 3"
        #[arg(long)]
        level: Option<String>,
    },
    /// Report on-device capability readiness
    Capabilities,
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Read JSON requests from stdin, one per line, and answer each
    Batch,
    /// Show recent journal entries
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        cloud_fallback: Option<bool>,
        /// Empty string removes the stored key
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        target_lang: Option<String>,
        #[arg(long)]
        sentences: Option<usize>,
    },
}

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "Quill", "Quill") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("Quill")
    }
}

struct Host {
    pool: DbPool,
    ops: TextOps,
}

fn build_host(cli: &Cli) -> Result<Host> {
    let pool = if cli.ephemeral {
        init_memory_db()?
    } else {
        let dir = cli.data_dir.clone().unwrap_or_else(workspace_dir);
        debug!("data directory {}", dir.display());
        init_db(dir)?
    };

    let settings: Arc<dyn SettingsStore> = if cli.ephemeral {
        Arc::new(MemorySettingsStore::default())
    } else {
        Arc::new(SqliteSettingsStore::new(pool.clone()))
    };

    let registry: Arc<dyn ProviderRegistry> = match &cli.local_url {
        Some(url) => {
            info!("using local runtime {url} with model {}", cli.local_model);
            Arc::new(OllamaRegistry::new(url.as_str(), cli.local_model.as_str())?)
        }
        None => Arc::new(NullRegistry),
    };

    let mut cloud = GeminiClient::new()?;
    if let Some(endpoint) = &cli.cloud_endpoint {
        cloud = cloud.with_base_url(endpoint.as_str());
    }
    let cloud: Arc<dyn CloudGenerator> = Arc::new(cloud);

    let mut deadlines = Deadlines::default();
    if let Some(secs) = cli.acquire_timeout_secs {
        deadlines.acquisition = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.exec_timeout_secs {
        deadlines.execution = Duration::from_secs(secs);
    }
    let policy = if cli.lenient {
        ReadinessPolicy::Lenient
    } else {
        ReadinessPolicy::Strict
    };

    let mut ops = TextOps::new(registry, cloud, settings)
        .with_policy(policy)
        .with_deadlines(deadlines);
    if cli.journal {
        ops = ops.with_journal(pool.clone());
    }
    Ok(Host { pool, ops })
}

async fn input_or_stdin(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("failed to read stdin")?;
    Ok(buffer)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_envelope(envelope: &Envelope) -> Result<ExitCode> {
    info!("answered by {} tier", envelope.source().label());
    print_json(envelope)?;
    Ok(if envelope.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_batch(ops: &TextOps) -> Result<ExitCode> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match serde_json::from_str(&line) {
            Ok(message) => ops.dispatch_json(message).await,
            Err(err) => Envelope::failure(&QuillError::InvalidRequest(err.to_string())),
        };
        all_ok &= envelope.is_ok();
        println!("{}", serde_json::to_string(&envelope)?);
    }
    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let host = build_host(&cli)?;
    let ops = &host.ops;

    match cli.command {
        Command::Summarize { text, sentences } => {
            let text = input_or_stdin(text).await?;
            print_envelope(&ops.summarize(&text, sentences).await)
        }
        Command::Translate { text, to, from } => {
            let text = input_or_stdin(text).await?;
            print_envelope(&ops.translate(&text, to.as_deref(), from.as_deref()).await)
        }
        Command::Proofread { text } => {
            let text = input_or_stdin(text).await?;
            print_envelope(&ops.proofread(&text).await)
        }
        Command::Rewrite { text, style } => {
            let text = input_or_stdin(text).await?;
            print_envelope(&ops.rewrite(&text, style.as_deref()).await)
        }
        Command::Write { prompt } => {
            let prompt = input_or_stdin(prompt).await?;
            print_envelope(&ops.write(&prompt).await)
        }
        Command::Prompt { prompt } => {
            let prompt = input_or_stdin(prompt).await?;
            print_envelope(&ops.prompt_structured(&prompt).await)
        }
        Command::Simplify { text, level } => {
            let text = input_or_stdin(text).await?;
            print_envelope(&ops.simplify(&text, level.as_deref()).await)
        }
        Command::Capabilities => {
            print_json(&ops.detect_capabilities().await)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Settings { action } => {
            let store = ops.settings_store();
            match action {
                SettingsCommand::Show => {}
                SettingsCommand::Set {
                    cloud_fallback,
                    api_key,
                    model,
                    target_lang,
                    sentences,
                } => {
                    store
                        .set(SettingsPatch {
                            use_cloud_fallback: cloud_fallback,
                            cloud_api_key: api_key,
                            cloud_model: model,
                            default_target_lang: target_lang,
                            max_summary_sentences: sentences,
                        })
                        .await?;
                }
            }
            print_json(&store.get().await?.redacted())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch => run_batch(ops).await,
        Command::Events { limit } => {
            let pool = host.pool.clone();
            let events = tokio::task::spawn_blocking(move || -> Result<_> {
                let conn = pool.get()?;
                Ok(recent_events(&conn, limit)?)
            })
            .await??;
            print_json(&events)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli).await
}
