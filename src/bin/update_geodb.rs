use std::{path::Path, path::PathBuf, sync::Arc, time::Instant};

use clap::Parser;
use geodb_sync::{
    config::{load_config, Settings},
    convert::CommandLineTools,
    dataset::GeonorgeClient,
    db::postgres::PgCluster,
    error::Result,
    sync::{RefreshOutcome, SwapCoordinator, TargetOutcome},
};
use log::{error, info};
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Path to the config file, defaults to config.yml in APP_FILES_DIR
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop staging databases left behind by earlier runs before starting
    #[arg(long, default_value_t = false)]
    sweep_stale: bool,
}

/// Make an ASCII table from the outcomes
fn ascii_table(outcomes: &[TargetOutcome]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Database", "Outcome", "Backup"]);
    for target in outcomes {
        let backup = match &target.outcome {
            RefreshOutcome::Refreshed { backup: Some(backup) } => backup.clone(),
            _ => String::new(),
        };
        builder.push_record(vec![
            target.db_name.clone(),
            target.outcome.to_string(),
            backup,
        ]);
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

async fn run(args: &Args, coordinator: &mut SwapCoordinator) -> Result<i32> {
    if args.sweep_stale {
        let dropped = coordinator.sweep_stale_staging().await?;
        info!("{} leftover staging database(s) deleted", dropped.len());
    }
    let report = coordinator.run().await?;
    Ok(report.exit_code())
}

/// Refresh the configured databases if the dataset has been updated.
/// Exits with 0 when something was refreshed, 2 when there was nothing to do
/// and 1 on failure.
#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if Path::new(&env_file).exists() {
        if let Err(e) = dotenvy::from_path(&env_file) {
            error!("Could not load {}: {}", env_file, e);
            std::process::exit(1);
        }
    }

    let start = Instant::now();
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let config_path = args.config.clone().unwrap_or_else(|| settings.config_path());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut coordinator = SwapCoordinator::new(
        Arc::new(PgCluster::new(&settings.pg)),
        Arc::new(GeonorgeClient::new(&settings)),
        Arc::new(CommandLineTools::new(settings.tools.clone(), settings.pg.clone())),
        config,
        settings.new_download_dir(),
        settings.pg.password.clone(),
    );

    let code = match run(&args, &mut coordinator).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    if !coordinator.outcomes().is_empty() {
        println!("{}", ascii_table(coordinator.outcomes()));
    }
    info!("Done in {:.2} sec.", start.elapsed().as_secs_f64());
    std::process::exit(code);
}
