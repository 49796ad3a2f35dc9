use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sigmirror::{
    Checkpoint, CollectionStatus, MirrorConfig, SignatureMirror, SyncStatus, TracingProgressSink,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sigmirror", version, about = "Local mirror of 4-byte selector and event signatures")]
struct Args {
    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show checkpoints and record counts
    Status,
    /// Run a sync campaign and log progress until both collections finish
    Sync,
    /// Run a sync campaign and print every progress event as it arrives
    Watch,
    /// Query the local mirror
    Lookup {
        #[command(subcommand)]
        query: Lookup,
    },
}

#[derive(Subcommand, Debug)]
enum Lookup {
    /// Method signatures for a 4-byte selector
    Selector { selector: String },
    /// Selector for a method signature
    Method { method: String },
    /// Event signatures for a topic0 hash
    Signature { signature: String },
    /// Topic0 hash for an event signature
    Event { event: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load_config(args: &Args) -> anyhow::Result<MirrorConfig> {
    let mut config = match &args.config {
        Some(path) => MirrorConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MirrorConfig::default(),
    };
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;
    let mirror = SignatureMirror::open(config)
        .await
        .context("failed to open signature mirror")?;

    let code = match args.command {
        Command::Status => {
            print_status(&mirror).await?;
            ExitCode::SUCCESS
        }
        Command::Sync => {
            let report = mirror.sync(&TracingProgressSink).await;
            tracing::info!(
                "🏁 同步结束: methods={:?}, events={:?}",
                report.methods.status(),
                report.events.status()
            );
            exit_code(report.is_successful())
        }
        Command::Watch => {
            let mut events = mirror.sync_stream().await.merged();
            let mut ok = true;
            while let Some(progress) = events.next().await {
                if progress.status == SyncStatus::Failed {
                    ok = false;
                }
                println!(
                    "[{}] {:<10} {}",
                    progress.collection,
                    format!("{:?}", progress.status),
                    progress.message
                );
            }
            exit_code(ok)
        }
        Command::Lookup { query } => {
            let found = lookup(&mirror, query).await?;
            exit_code(found)
        }
    };

    mirror.shutdown();
    Ok(code)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn print_status(mirror: &SignatureMirror) -> anyhow::Result<()> {
    let status = mirror.status().await?;
    let journal_mode = mirror.journal_mode().await?;

    println!("Database   : {}", status.db_path.display());
    println!("Journal    : {}", journal_mode);
    println!("Schema     : V{} (sigmirror {})", status.db_version, status.sdk_version);
    println!();
    print_collection(&status.methods);
    print_collection(&status.events);
    Ok(())
}

fn print_collection(status: &CollectionStatus) {
    println!("[{}]", status.collection);
    println!("Page       : {}", status.checkpoint.last_page);
    println!("ID         : {}", status.checkpoint.last_seen_id);
    println!("Records    : {}", status.records);
    println!("Last sync  : {}", format_synced_at(&status.checkpoint));
    println!();
}

fn format_synced_at(checkpoint: &Checkpoint) -> String {
    checkpoint
        .last_synced_at_utc()
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %:z").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// 打印查询结果；无匹配时返回 false
async fn lookup(mirror: &SignatureMirror, query: Lookup) -> anyhow::Result<bool> {
    let found = match query {
        Lookup::Selector { selector } => print_all(mirror.methods_by_selector(&selector).await?),
        Lookup::Method { method } => print_one(mirror.selector_by_method(&method).await?),
        Lookup::Signature { signature } => {
            print_all(mirror.events_by_signature(&signature).await?)
        }
        Lookup::Event { event } => print_one(mirror.signature_by_event(&event).await?),
    };
    if !found {
        eprintln!("no match");
    }
    Ok(found)
}

fn print_all(values: Vec<String>) -> bool {
    for value in &values {
        println!("{}", value);
    }
    !values.is_empty()
}

fn print_one(value: Option<String>) -> bool {
    print_all(value.into_iter().collect())
}
