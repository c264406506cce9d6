use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use travel_import::importer::{ImportConfig, ImportKind, ImportPipeline};
use travel_import::util::db::Db;
use travel_import::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "travel-import", version, about = "Bulk catalogue import from CSV/XLSX sheets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one sheet of a single entity kind
    Import(ImportArgs),
    /// Apply pending schema migrations and exit
    Migrate,
    /// Print a redacted snapshot of the effective configuration
    CheckEnv,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// hotels, hotel_rooms, checkin_places, categories or cuisines
    #[arg(long, short, value_parser = parse_kind)]
    kind: ImportKind,
    /// Sheet to import (.csv, .txt or .xlsx)
    path: PathBuf,
    /// Print the outcome as JSON instead of summary lines
    #[arg(long)]
    json: bool,
    /// Maximum simultaneous image downloads (FETCH_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-request timeout in seconds (FETCH_TIMEOUT_SECS)
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Directory images are written under (CONTENT_ROOT)
    #[arg(long)]
    content_root: Option<PathBuf>,
    /// Smallest body accepted as an image (MIN_IMAGE_BYTES)
    #[arg(long)]
    min_image_bytes: Option<usize>,
    /// Abandon the run after this many seconds (IMPORT_MAX_RUNTIME_SECS)
    #[arg(long)]
    max_runtime_secs: Option<u64>,
}

fn parse_kind(raw: &str) -> Result<ImportKind, String> {
    raw.parse::<ImportKind>().map_err(|e| e.to_string())
}

impl ImportArgs {
    fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::from_env();
        if let Some(n) = self.concurrency {
            config.fetch_concurrency = n.max(1);
        }
        if let Some(secs) = self.timeout_secs {
            config.fetch_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(root) = &self.content_root {
            config.content_root = root.clone();
        }
        if let Some(min) = self.min_image_bytes {
            config.min_image_bytes = min;
        }
        if let Some(secs) = self.max_runtime_secs {
            config.max_runtime = Duration::from_secs(secs.max(1));
        }
        config
    }
}

async fn connect() -> Result<Db> {
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNECTIONS", 5u32);
    Db::connect(&env_util::db_url(), max_conns).await
}

async fn run_import(args: ImportArgs) -> Result<()> {
    let config = args.config();
    let max_runtime = config.max_runtime;
    info!(
        target = "import",
        kind = %args.kind,
        path = %args.path.display(),
        concurrency = config.fetch_concurrency,
        content_root = %config.content_root.display(),
        "import requested"
    );

    let db = connect().await?;
    let mut pipeline = ImportPipeline::from_config(db, config)?;
    let finished =
        tokio::time::timeout(max_runtime, pipeline.run_path(args.kind, &args.path)).await;
    let outcome = match finished {
        Ok(result) => result?,
        Err(_) => {
            return Err(anyhow!(
                "import abandoned after {}s in phase {}",
                max_runtime.as_secs(),
                pipeline.phase()
            ))
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for line in outcome.summary_lines() {
            println!("{line}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    travel_import::tracing::init_tracing("info,sqlx=warn")?;
    env_util::bootstrap_cli("travel-import");

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Import(args) => run_import(args).await,
        Command::Migrate => {
            let db = connect().await?;
            db.run_migrations().await.context("migration failed")?;
            info!(target = "bootstrap", "schema up to date");
            Ok(())
        }
        Command::CheckEnv => env_util::preflight_check(
            "travel-import",
            &[],
            &[
                "DATABASE_URL",
                "DB_MAX_CONNECTIONS",
                "AUTO_MIGRATE",
                "CONTENT_ROOT",
                "FETCH_CONCURRENCY",
                "FETCH_TIMEOUT_SECS",
                "MIN_IMAGE_BYTES",
                "IMPORT_MAX_RUNTIME_SECS",
            ],
        ),
    };
    if let Err(e) = &result {
        error!(target = "bootstrap", error = %format!("{e:#}"), "command failed");
    }
    result
}
