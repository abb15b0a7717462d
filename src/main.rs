use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use station_qc::config::Config;
use station_qc::db::{ReadingRepository, StationRepository};
use station_qc::services::{SpatialQcService, StationQcService};
use station_qc::utils::spatial_cutoff;
use station_qc::QcRegistry;

#[derive(Parser)]
#[command(name = "station-qc")]
#[command(about = "Quality control for sensor station measurements", long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the active QC registry as JSON
    Config,
    /// Run the temporal checks over one station's readings
    Station {
        #[arg(long)]
        station_id: String,
        /// Inclusive start, RFC 3339
        #[arg(long)]
        start: DateTime<Utc>,
        /// Exclusive end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
        /// Parameters to check (default: all configured ones the station reports)
        #[arg(long, value_delimiter = ',')]
        parameters: Vec<String>,
    },
    /// Run the isolation and buddy check across all stations
    Spatial {
        #[arg(long)]
        parameter: String,
        #[arg(long)]
        start: DateTime<Utc>,
        /// Exclusive end; defaults to now, leaving out the newest grid slot
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// Size of the chunks the range is fetched in
        #[arg(long, default_value = "24")]
        chunk_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,station_qc=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env();
    info!("Starting station QC with config: {:?}", config);
    let registry = Arc::new(config.load_registry()?);

    match cli.command {
        Command::Config => {
            println!("{}", registry.to_json_pretty()?);
        }
        Command::Station {
            station_id,
            start,
            end,
            parameters,
        } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            run_station(&pool, &config, registry, &station_id, start, end, parameters).await?;
        }
        Command::Spatial {
            parameter,
            start,
            end,
            chunk_hours,
        } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            run_spatial(&pool, &config, registry, &parameter, start, end, chunk_hours).await?;
        }
    }

    Ok(())
}

async fn connect(database_url: Option<&str>) -> Result<PgPool, Box<dyn std::error::Error>> {
    let database_url = database_url.ok_or("--database-url or DATABASE_URL is required")?;
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    info!("Database connection established");
    Ok(pool)
}

async fn run_station(
    pool: &PgPool,
    config: &Config,
    registry: Arc<QcRegistry>,
    station_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    parameters: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let station = StationRepository::new(pool.clone())
        .find_by_id(station_id)
        .await?
        .ok_or_else(|| format!("station {station_id} not found"))?;

    let parameters: Vec<String> = if parameters.is_empty() {
        registry
            .parameters
            .iter()
            .map(|p| p.parameter.clone())
            .filter(|p| station.kind.reports(p))
            .collect()
    } else {
        parameters
    };
    let parameters: Vec<&str> = parameters.iter().map(String::as_str).collect();

    let repo = ReadingRepository::new(pool.clone()).with_slot(config.grid);
    let batch = repo.find_batch(&station, &parameters, start, end).await?;
    if batch.is_empty() {
        warn!("No readings for {} between {} and {}", station_id, start, end);
    }

    let service = StationQcService::from_config(Arc::new(repo), registry, config);
    let frame = service.apply_qc(&batch).await?;
    println!("{}", serde_json::to_string_pretty(&frame)?);
    Ok(())
}

async fn run_spatial(
    pool: &PgPool,
    config: &Config,
    registry: Arc<QcRegistry>,
    parameter: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    chunk_hours: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = ReadingRepository::new(pool.clone()).with_slot(config.grid);
    let service = SpatialQcService::from_config(Arc::new(repo), registry, config);

    let grid = service.grid();
    let end = end.unwrap_or_else(|| spatial_cutoff(Utc::now(), grid));
    let chunk = TimeDelta::hours(chunk_hours.max(1));
    let mut chunks = Vec::new();
    let mut chunk_start = start;
    while chunk_start < end {
        // chunk edges sit between grid slots so no slot is split
        let mut chunk_end = spatial_cutoff(chunk_start + chunk, grid).min(end);
        if chunk_end <= chunk_start {
            chunk_end = (chunk_start + chunk).min(end);
        }
        chunks.push((chunk_start, chunk_end));
        chunk_start = chunk_end;
    }

    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let mut rows = Vec::new();
    for (chunk_start, chunk_end) in chunks {
        pb.set_message(chunk_start.format("%Y-%m-%d %H:%M").to_string());
        rows.extend(service.run_range(parameter, chunk_start, chunk_end).await?);
        pb.inc(1);
    }
    let flagged = rows.iter().filter(|r| r.qc_flagged).count();
    pb.finish_with_message(format!("{} rows, {} flagged", rows.len(), flagged));

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
