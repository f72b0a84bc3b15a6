use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use table_sync::{config, utils::logging, SyncClient};

/// Copy rows missing from a destination database's tables out of a source
/// database with the same table layout
#[derive(Debug, Parser)]
#[command(name = "table_sync", version, about)]
struct Cli {
    /// Path to the TOML or YAML configuration file
    #[arg(short, long, default_value = "table_sync.toml")]
    config: String,

    /// Only compare rows whose filter column holds this value
    #[arg(short, long)]
    filter_value: Option<String>,

    /// Compute the differences without writing to the destination
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    if cli.dry_run {
        config.sync.dry_run = true;
    }

    if !logging::init_logging(&config.logging)? {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("table_sync=info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let client = SyncClient::new(config)
        .await
        .context("connecting to databases")?;
    let report = client.run(cli.filter_value.as_deref()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for table in &report.tables {
            println!(
                "{}: {} to insert, {} to update, {} to delete; \
                 wrote {} inserted, {} updated, {} deleted",
                table.table,
                table.changes.inserts,
                table.changes.updates,
                table.changes.deletes,
                table.inserted,
                table.updated,
                table.deleted
            );
        }
        for skipped in &report.skipped {
            println!("{}: skipped ({})", skipped.table, skipped.reason);
        }
    }

    Ok(())
}
