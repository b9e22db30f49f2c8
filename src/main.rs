use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod anomaly;
mod db;
mod engine;
mod error;
mod generation;
mod indicators;
mod models;
mod period;
mod report;
mod scheduler;
mod settings;
mod trajectory;

use models::Grade;
use settings::Settings;

#[derive(Parser)]
#[command(name = "trajectory-reports")]
#[command(about = "Cohort trajectory and FIMPES indicator reports", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./trajectory.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small example cohort set
    Seed,
    /// Import enrolment rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Check that the database is reachable
    TestConnection,
    /// Generate trajectory reports now
    Generate {
        /// Grades to generate (LL, EL, ML); defaults to the configured list
        #[arg(long, num_args = 1..)]
        grades: Vec<Grade>,
        #[arg(long)]
        year_start: Option<i32>,
        #[arg(long)]
        year_end: Option<i32>,
        /// Output directory; defaults to reports.output_dir
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate every configured grade once a day
    Schedule,
}

struct Request<'a> {
    grades: &'a [Grade],
    year_start: i32,
    year_end: i32,
    out_dir: &'a Path,
}

async fn generate_grade(
    pool: &PgPool,
    settings: &Settings,
    grade: Grade,
    request: &Request<'_>,
) -> anyhow::Result<Vec<PathBuf>> {
    let records = db::fetch_enrollments(pool, grade, request.year_start, request.year_end).await?;
    let consolidated = db::fetch_consolidated(pool, request.year_start, request.year_end).await?;
    let options = settings.reports.engine_options()?;
    let report = engine::run(&records, options)?;

    if !report.anomalies.is_empty() {
        warn!(%grade, anomalies = ?report.anomalies.counts(), "data-quality anomalies found");
    }

    report::write_report_files(
        request.out_dir,
        grade,
        (request.year_start, request.year_end),
        Local::now().date_naive(),
        &records,
        &consolidated,
        &report,
    )
}

/// Generates every requested grade concurrently; fails if any grade fails.
async fn generate_all(pool: &PgPool, settings: &Settings, request: &Request<'_>) -> anyhow::Result<()> {
    if request.year_start > request.year_end {
        anyhow::bail!(
            "year range {}-{} is inverted",
            request.year_start,
            request.year_end
        );
    }
    info!(
        grades = ?request.grades,
        year_start = request.year_start,
        year_end = request.year_end,
        "generating reports"
    );

    let results = join_all(
        request
            .grades
            .iter()
            .map(|grade| generate_grade(pool, settings, *grade, request)),
    )
    .await;

    let mut failed = 0usize;
    for (grade, result) in request.grades.iter().zip(results) {
        match result {
            Ok(paths) => {
                for path in paths {
                    println!("{grade}: {}", path.display());
                }
            }
            Err(err) => {
                failed += 1;
                error!(%grade, error = ?err, "report generation failed");
                eprintln!("{grade}: failed: {err:#}");
            }
        }
    }

    println!(
        "Generated {}/{} reports.",
        request.grades.len() - failed,
        request.grades.len()
    );
    if failed > 0 {
        anyhow::bail!("{failed} report(s) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // .env is optional; a missing file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    let pool = db::connect(&settings.database).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} attendance rows from {}.", csv.display());
        }
        Commands::TestConnection => {
            db::ping(&pool).await?;
            println!("Connection OK.");
        }
        Commands::Generate {
            grades,
            year_start,
            year_end,
            out,
        } => {
            let grades = if grades.is_empty() {
                settings.reports.grades.clone()
            } else {
                grades
            };
            let out_dir = out.unwrap_or_else(|| settings.reports.output_dir.clone());
            let request = Request {
                grades: &grades,
                year_start: year_start.unwrap_or(settings.reports.year_start),
                year_end: year_end.unwrap_or(settings.reports.year_end),
                out_dir: &out_dir,
            };
            generate_all(&pool, &settings, &request).await?;
        }
        Commands::Schedule => {
            let request = Request {
                grades: &settings.reports.grades,
                year_start: settings.reports.year_start,
                year_end: settings.reports.year_end,
                out_dir: &settings.reports.output_dir,
            };
            scheduler::run_daily(&settings.scheduler, || generate_all(&pool, &settings, &request))
                .await?;
        }
    }

    Ok(())
}
