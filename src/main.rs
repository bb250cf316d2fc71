use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use pgsubset::collect::{self, CollectorContext};
use pgsubset::config::Settings;
use pgsubset::db::connect_with_retry;
use pgsubset::fdw::FdwStaging;
use pgsubset::schema::loader;
use pgsubset::stats::{Stage, StatisticManager};
use pgsubset::{transfer, validate};

#[derive(Parser)]
#[command(author, version, about = "Copies a referentially-closed tenant subset of a PostgreSQL \
database into a structurally identical destination", long_about = None)]
struct Cli {
    /// Collect and validate only; leave the destination untouched
    #[arg(long)]
    dry_run: bool,

    /// Write stage and transfer statistics to this file as JSON
    #[arg(long, value_name = "PATH")]
    stats_json: Option<String>,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long)]
    debug: bool,
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenv().ok();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Arc::new(Settings::from_env()?);

    info!("init src database");
    let src_pool =
        connect_with_retry(&settings.src.url(), settings.connection_pool_size).await?;
    info!("init dst database");
    let dst_pool =
        connect_with_retry(&settings.dst.url(), settings.connection_pool_size).await?;

    let mut stats = StatisticManager::new();

    stats.mark(Stage::PrepareStructure);
    let mut model = loader::load_structure(&dst_pool, &settings).await?;
    stats.mark(Stage::PrepareStructure);

    if !cli.dry_run {
        stats.mark(Stage::TruncateTables);
        transfer::truncate_tables(&dst_pool, &settings, &model).await?;
        stats.mark(Stage::TruncateTables);
    }

    stats.mark(Stage::FillRowCounts);
    loader::fill_row_counts(&mut model, &src_pool, settings.connection_pool_size).await?;
    stats.mark(Stage::FillRowCounts);

    let model = Arc::new(model);
    let ctx = CollectorContext::new(
        model.clone(),
        src_pool.clone(),
        dst_pool.clone(),
        settings.clone(),
    );

    collect::run_stages(&ctx, &mut stats).await?;

    if !cli.dry_run {
        let staging = FdwStaging::new(&settings, &dst_pool);
        let table_names: Vec<String> = model.tables().map(|t| t.name.clone()).collect();
        staging.enable(&table_names).await?;
        transfer::disable_triggers(&dst_pool).await?;

        stats.mark(Stage::TransferData);
        let transfer_result = transfer::transfer_collected(&ctx).await;
        stats.mark(Stage::TransferData);

        // Triggers and the staging schema come back up even when the copy
        // failed part way through.
        let triggers_result = transfer::enable_triggers(&dst_pool).await;
        let staging_result = staging.disable().await;
        transfer_result?;
        triggers_result?;
        staging_result?;

        stats.mark(Stage::UpdateSequences);
        transfer::set_max_sequences(&dst_pool, &model, settings.connection_pool_size).await?;
        stats.mark(Stage::UpdateSequences);
    }

    let is_valid = validate::run_validators(&dst_pool, &model, &settings).await?;

    stats.log_stage_samples();
    stats.log_transfer_counts(&model);
    if let Some(path) = &cli.stats_json {
        let report = stats.report(&model);
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("statistics written to {path}");
    }

    if !is_valid {
        anyhow::bail!("validation failed: key column values outside the requested tenant set");
    }
    Ok(())
}
