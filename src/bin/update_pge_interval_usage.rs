use std::{error::Error, path::Path, path::PathBuf};

use clap::Parser;
use jiff::Zoned;
use log::{error, info};
use pge_usage::{
    api::opower::client::{OpowerClient, OpowerEndpoints},
    config::{parse_max_concurrency, SyncConfig},
    db::interval_usage_archive::IntervalUsageArchive,
    sync::run_sync,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Overrides INTERVAL_DATA_DIR
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides PGE_USERNAME
    #[arg(short, long)]
    username: Option<String>,

    /// Max number of months to download at the same time, at least 1
    #[arg(long, value_parser = parse_max_concurrency)]
    max_concurrency: Option<usize>,
}

/// Run this job once a month, after the utility has closed the previous month.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if Path::new(&env_file).exists() {
        dotenvy::from_path(Path::new(&env_file))?;
    }
    let mut config = SyncConfig::from_env_with_username(args.username)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(n) = args.max_concurrency {
        config.max_concurrent_downloads = Some(n);
    }

    // fail before touching the network if the password is not there
    let password = config.password()?;
    let archive = IntervalUsageArchive::new(&config.data_dir);
    let mut client = OpowerClient::new(OpowerEndpoints::pge(), config.username.clone(), password)?;

    let report = run_sync(&mut client, &archive, &config, Zoned::now().date()).await?;
    for (month, e) in report.failed() {
        error!("{}: {}", month, e);
    }
    let months = report.into_result()?;
    info!("done, {} month(s) updated", months.len());

    Ok(())
}
