//! Admin CLI entry point.

use std::process::ExitCode;

use admin::{Admin, AdminError, Command, Config};
use clap::Parser;
use ledger_store::PostgresLedgerStore;
use sqlx::postgres::PgPoolOptions;

#[derive(Debug, Parser)]
#[command(
    name = "inventory-admin",
    about = "Audited maintenance operations for the uniform inventory ledger",
    version
)]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Database connection URL. Falls back to `DATABASE_URL` when omitted.
    #[arg(long = "database-url", global = true, value_name = "url")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

async fn run(cli: Cli, config: Config) -> Result<bool, AdminError> {
    let database_url = match cli.database_url {
        Some(url) => url,
        None => config.database_url()?.to_string(),
    };
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await?;
    let store = PostgresLedgerStore::new(pool);

    if let Command::Migrate = cli.command {
        store.run_migrations().await?;
        tracing::info!("migrations applied");
        return Ok(true);
    }

    let admin = Admin::new(store, cli.json);
    let mut stdout = std::io::stdout().lock();
    let outcome = admin.run(cli.command, &mut stdout).await?;
    Ok(outcome.healthy)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    admin::telemetry::init(&config);

    match run(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}
