use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use file_relay_api::{RecordCatalog, RelayConfig, UploadRequest, DEFAULT_STORE_PATH};
use file_relay_core::ContentKind;
use file_relay_store_csv::CsvRecordStore;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "relayctl")]
#[command(about = "Inspect and maintain a file relay record store")]
struct Cli {
    #[arg(long, env = "RELAY_STORE", default_value = DEFAULT_STORE_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
}

#[derive(Debug, Subcommand)]
enum StoreCommand {
    Init,
    Validate,
    Trim(TrimArgs),
    Reformat(ReformatArgs),
}

#[derive(Debug, Args)]
struct TrimArgs {
    #[arg(long)]
    keep: usize,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ReformatArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    List,
    Show(ShowArgs),
    Lookup(LookupArgs),
    Add(AddArgs),
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    handle: String,
}

#[derive(Debug, Args)]
struct LookupArgs {
    #[arg(long)]
    content_ref: String,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    content_ref: String,
    #[arg(long)]
    kind: KindArg,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Document,
    Photo,
    Video,
    Unknown,
}

impl From<KindArg> for ContentKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Document => Self::Document,
            KindArg::Photo => Self::Photo,
            KindArg::Video => Self::Video,
            KindArg::Unknown => Self::Unknown,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Store { command } => run_store(command, &cli.db),
        Command::Record { command } => run_record(command, &cli.db),
    }
}

fn run_store(command: StoreCommand, db: &Path) -> Result<()> {
    tracing::debug!(?command, db = %db.display(), "running store command");
    let store = CsvRecordStore::new(db);
    match command {
        StoreCommand::Init => {
            let created = store.initialize()?;
            emit_json(serde_json::json!({
                "path": store.path(),
                "created": created
            }))
        }
        StoreCommand::Validate => {
            let report = file_relay_store_csv::validate(store.path())?;
            emit_json(serde_json::to_value(report)?)
        }
        StoreCommand::Trim(args) => {
            let summary =
                file_relay_store_csv::trim(store.path(), args.out.as_deref(), args.keep)?;
            emit_json(serde_json::to_value(summary)?)
        }
        StoreCommand::Reformat(args) => {
            let summary = file_relay_store_csv::reformat(store.path(), &args.out)?;
            emit_json(serde_json::to_value(summary)?)
        }
    }
}

fn open_catalog(db: &Path) -> Result<RecordCatalog> {
    let config = RelayConfig { store_path: db.to_path_buf(), ..RelayConfig::default() };
    RecordCatalog::open(&config)
        .with_context(|| format!("failed to open record store {}", db.display()))
}

fn run_record(command: RecordCommand, db: &Path) -> Result<()> {
    tracing::debug!(?command, db = %db.display(), "running record command");
    match command {
        RecordCommand::List => {
            let (records, summary) = CsvRecordStore::new(db).load_all_with_summary()?;
            if !summary.header_present && !records.is_empty() {
                tracing::warn!(db = %db.display(), "record store has no header row");
            }
            emit_json(serde_json::json!({
                "records": records,
                "summary": summary
            }))
        }
        RecordCommand::Show(args) => {
            let catalog = open_catalog(db)?;
            let record = catalog.handle_retrieve(&args.handle).with_context(|| {
                format!("no record for handle {}", args.handle.trim())
            })?;
            emit_json(serde_json::to_value(record)?)
        }
        RecordCommand::Lookup(args) => {
            let found = CsvRecordStore::new(db).find_by_content_ref(&args.content_ref)?;
            emit_json(serde_json::json!({
                "found": found.is_some(),
                "record": found
            }))
        }
        RecordCommand::Add(args) => {
            let catalog = open_catalog(db)?;
            let outcome = catalog.handle_upload(UploadRequest {
                content_ref: args.content_ref,
                display_name: args.name,
                content_kind: args.kind.into(),
            })?;
            emit_json(serde_json::json!({
                "record": outcome.record,
                "deduplicated": outcome.deduplicated
            }))
        }
    }
}
