use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod db;
mod forecast;
mod insights;
mod models;
mod optimize;
mod report;
mod sarima;
mod series;
#[cfg(test)]
mod test_support;

use config::DbArgs;

#[derive(Parser)]
#[command(name = "contamination-forecast")]
#[command(about = "Seasonal contamination forecasts and predictive search suggestions", long_about = None)]
struct Cli {
    #[command(flatten)]
    db: DbArgs,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print ranked predictive search suggestions as JSON
    Suggest,
    /// Forecast a single route
    Forecast {
        #[arg(long)]
        route_id: i32,
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u16).range(1..))]
        horizon: u16,
    },
    /// Forecast a daily series read from a CSV file (date,count)
    ForecastCsv {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u16).range(1..))]
        horizon: u16,
    },
    /// Generate a markdown forecast report
    Report {
        #[arg(long, default_value = "predictive-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let structured_errors = matches!(cli.command, Commands::Suggest);
    match run(cli).await {
        Err(err) if structured_errors => {
            eprintln!("{}", failure_payload(&err));
            debug!(error = ?err, "predictive search generation failed");
            std::process::exit(1);
        }
        other => other,
    }
}

fn failure_payload(err: &anyhow::Error) -> serde_json::Value {
    serde_json::json!({
        "error": format!("{err:#}"),
        "searches": [],
    })
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn connect(db: &DbArgs) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config::MAX_CONNECTIONS)
        .connect_with(db.connect_options()?)
        .await
        .context("failed to connect to Postgres")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Suggest => {
            let pool = connect(&cli.db).await?;
            let report = insights::generate(&pool).await?;
            pool.close().await;
            println!("{}", serde_json::to_string_pretty(&report.suggestions)?);
        }
        Commands::Forecast { route_id, horizon } => {
            let pool = connect(&cli.db).await?;
            let observations =
                db::fetch_daily_series(&pool, Some(route_id), insights::ROUTE_HISTORY_DAYS).await?;
            pool.close().await;
            let result = forecast::forecast_observations(&observations, usize::from(horizon));
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::ForecastCsv { csv, horizon } => {
            let observations = series::load_csv(&csv)?;
            let result = forecast::forecast_observations(&observations, usize::from(horizon));
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Report { out } => {
            let pool = connect(&cli.db).await?;
            let report = insights::generate(&pool).await?;
            pool.close().await;
            std::fs::write(&out, report::build_report(&report, Utc::now()))
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
