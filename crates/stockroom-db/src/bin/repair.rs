//! # stockroom-repair
//!
//! Administrative maintenance of a Stockroom database.
//!
//! ## Usage
//! ```bash
//! # Tables with main / auxiliary row counts
//! cargo run -p stockroom-db --bin stockroom-repair -- list
//! cargo run -p stockroom-db --bin stockroom-repair -- list --json
//!
//! # Re-create missing auxiliary rows for every table
//! cargo run -p stockroom-db --bin stockroom-repair -- mirror
//!
//! # Drop and recreate one table
//! cargo run -p stockroom-db --bin stockroom-repair -- --db ./shop.db purge rates
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info,stockroom=debug,sqlx=warn`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use stockroom_db::{Database, DbConfig, RepairOp};
use tracing_subscriber::EnvFilter;

/// Stockroom repair tool.
#[derive(Parser, Debug)]
#[command(name = "stockroom-repair")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database file (overrides config file and STOCKROOM_DB_PATH).
    #[arg(short, long, global = true)]
    db: Option<PathBuf>,

    /// Path to stockroom.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List managed tables with their row counts.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Release every registered row lock of a table, orphans included.
    Unlock {
        table: Option<String>,

        /// Unlock every table.
        #[arg(long, conflicts_with = "table")]
        force_all: bool,
    },

    /// Drop and recreate a table (all rows are lost).
    Purge {
        table: String,
    },

    /// Create every missing table.
    Assure,

    /// Drop the row caches.
    Refresh,

    /// Re-create missing auxiliary rows.
    Mirror {
        /// Limit to one table.
        table: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct TableReport {
    table: &'static str,
    rows: i64,
    aux_rows: i64,
}

impl TableReport {
    fn consistent(&self) -> bool {
        self.rows == self.aux_rows
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let mut config = DbConfig::load(cli.config)?;
    if let Some(path) = cli.db {
        config.database_path = path;
    }

    let db = Database::open(&config).await?;
    let code = execute(&db, cli.command).await?;
    db.close().await;
    Ok(code)
}

async fn execute(db: &Database, command: Commands) -> CliResult<ExitCode> {
    let registry = db.registry();

    match command {
        Commands::List { json } => {
            let reports = table_reports(db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("{:<16} {:>10} {:>10}", "TABLE", "ROWS", "AUX ROWS");
                for report in &reports {
                    let marker = if report.consistent() { "" } else { "  (run mirror)" };
                    println!(
                        "{:<16} {:>10} {:>10}{}",
                        report.table, report.rows, report.aux_rows, marker
                    );
                }
            }
        }

        Commands::Unlock { table, force_all } => {
            let tables = match (table, force_all) {
                (Some(table), _) => vec![table],
                (None, true) => registry
                    .backable_tables()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                (None, false) => {
                    eprintln!("Name a table or pass --force-all");
                    return Ok(ExitCode::from(2));
                }
            };
            for table in &tables {
                if !registry.broadcast(table, RepairOp::ForceUnlock).await? {
                    eprintln!("Unknown table: {table}");
                    return Ok(ExitCode::from(2));
                }
            }
            println!("Released row locks on {} table(s)", tables.len());
        }

        Commands::Purge { table } => {
            if !registry.broadcast(&table, RepairOp::ForcePurge).await? {
                eprintln!("Unknown table: {table}");
                return Ok(ExitCode::from(2));
            }
            println!("Purged {table}");
        }

        Commands::Assure => {
            let count = registry.assure_all().await?;
            println!("Assured {count} table(s)");
        }

        Commands::Refresh => {
            let count = registry.broadcast_all(RepairOp::RefreshCache).await?;
            println!("Refreshed {count} cache(s)");
        }

        Commands::Mirror { table } => match table {
            Some(table) => {
                if !registry.broadcast(&table, RepairOp::MirrorAuxRows).await? {
                    eprintln!("Unknown table: {table}");
                    return Ok(ExitCode::from(2));
                }
                println!("Mirrored {table}");
            }
            None => {
                let count = registry.broadcast_all(RepairOp::MirrorAuxRows).await?;
                println!("Mirrored {count} table(s)");
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

async fn table_reports(db: &Database) -> CliResult<Vec<TableReport>> {
    let conn = db.connection();
    let mut reports = Vec::new();

    for table in db.registry().backable_tables() {
        let rows = conn
            .fetch_count(&conn.prepare(format!("SELECT COUNT(*) FROM {table}")))
            .await?;
        let aux_rows = conn
            .fetch_count(&conn.prepare(format!("SELECT COUNT(*) FROM {table}_aux")))
            .await?;
        reports.push(TableReport {
            table,
            rows,
            aux_rows,
        });
    }

    Ok(reports)
}
