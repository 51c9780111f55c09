use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use contact_index_api::{ContactIndexApi, ContactIndexConfig};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "cardidx")]
#[command(about = "Keep a directory of vCards and its SQLite index in sync")]
struct Cli {
    /// Index database (default: $CONTACT_INDEX_DB or ./contact_index.sqlite3)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Card store directory (default: $CONTACT_INDEX_CARDS_DIR or ./cards)
    #[arg(long)]
    cards: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    /// Reconcile the index with the card store
    Sync,
    /// Reconcile, then list every valid card
    List,
    /// Show the display fields of one card
    Show(ShowArgs),
    /// Write a new card and index it
    Create(MutateArgs),
    /// Rename the contact in a card, creating the card if it is not tracked
    Update(MutateArgs),
    Query {
        #[command(subcommand)]
        command: Box<QueryCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Stats,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    file: String,
}

#[derive(Debug, Args)]
struct MutateArgs {
    #[arg(long)]
    file: String,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    /// Every contact, ordered by name
    All,
    /// Contacts born in one month, oldest first
    BornIn(BornInArgs),
}

#[derive(Debug, Args)]
struct BornInArgs {
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
    month: u8,
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

fn emit<T: Serialize>(value: &T) -> Result<()> {
    emit_json(serde_json::to_value(value)?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ContactIndexConfig::from_env().with_overrides(cli.db, cli.cards);
    let api = ContactIndexApi::new(config);

    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Sync => emit(&api.sync()?),
        Command::List => {
            emit_json(serde_json::json!({ "cards": api.list_summaries()? }))
        }
        Command::Show(args) => emit(&api.get_detail(&args.file)),
        Command::Create(args) => emit(&api.create(&args.name, &args.file)?),
        Command::Update(args) => emit(&api.update(&args.file, &args.name)?),
        Command::Query { command } => run_query(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &ContactIndexApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => emit(&api.integrity_check()?),
        DbCommand::Stats => emit(&api.stats()?),
    }
}

fn run_query(command: QueryCommand, api: &ContactIndexApi) -> Result<()> {
    match command {
        QueryCommand::All => emit_json(serde_json::json!({ "contacts": api.list_contacts()? })),
        QueryCommand::BornIn(args) => emit_json(serde_json::json!({
            "month": args.month,
            "contacts": api.born_in_month(args.month)?
        })),
    }
}
