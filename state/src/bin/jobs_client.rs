use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use clap::Parser;
use dirs::home_dir;
use reprice_state::ProductFailure;
use reprice_state::RecalculationJobStatus;
use reprice_state::state_db_filename;
use sqlx::QueryBuilder;
use sqlx::Sqlite;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;

/// Failures printed under each job before eliding the rest.
const MAX_PRINTED_FAILURES: usize = 3;

#[derive(Debug, Parser)]
#[command(name = "reprice-jobs")]
#[command(about = "List recalculation runs recorded in the reprice state database")]
struct Args {
    /// Path to REPRICE_HOME. Defaults to $REPRICE_HOME or ~/.reprice.
    #[arg(long, env = "REPRICE_HOME")]
    home: Option<PathBuf>,

    /// Direct path to the SQLite database. Overrides --home.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Number of runs to show, newest first.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Only show the run currently in flight.
    #[arg(long)]
    running: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: String,
    status: String,
    trigger_source: String,
    triggered_by: String,
    total_products: Option<i64>,
    processed_products: i64,
    failed_products: i64,
    error_details_json: String,
    created_at: i64,
    completed_at: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let db_path = resolve_db_path(&args);
    let pool = open_read_only_pool(db_path.as_path()).await?;

    let rows = fetch_jobs(&pool, args.limit, args.running).await?;
    if rows.is_empty() {
        println!("no recalculation runs recorded");
        return Ok(());
    }
    for row in rows {
        println!("{}", format_row(&row)?);
    }
    Ok(())
}

fn resolve_db_path(args: &Args) -> PathBuf {
    if let Some(db) = args.db.as_ref() {
        return db.clone();
    }

    let home = args.home.clone().unwrap_or_else(default_reprice_home);
    home.join(state_db_filename())
}

fn default_reprice_home() -> PathBuf {
    if let Some(home) = home_dir() {
        return home.join(".reprice");
    }
    PathBuf::from(".reprice")
}

async fn open_read_only_pool(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));

    let display = path.display();
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open sqlite db at {display}"))
}

async fn fetch_jobs(
    pool: &SqlitePool,
    limit: usize,
    running_only: bool,
) -> anyhow::Result<Vec<JobRow>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT id, status, trigger_source, triggered_by, total_products, processed_products, failed_products, error_details_json, created_at, completed_at FROM recalculation_jobs WHERE 1 = 1",
    );
    if running_only {
        builder
            .push(" AND status = ")
            .push_bind(RecalculationJobStatus::Running.as_str());
    }
    builder.push(" ORDER BY created_at DESC, rowid DESC");
    builder
        .push(" LIMIT ")
        .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

    builder
        .build_query_as::<JobRow>()
        .fetch_all(pool)
        .await
        .context("failed to fetch recalculation jobs")
}

fn format_row(row: &JobRow) -> anyhow::Result<String> {
    let created = format_timestamp(row.created_at);
    let completed = row
        .completed_at
        .map_or_else(|| "-".to_string(), format_timestamp);
    let total = row
        .total_products
        .map_or_else(|| "?".to_string(), |total| total.to_string());
    let mut line = format!(
        "{created} {status:<9} {id} source={source} by={user} processed={processed} failed={failed} total={total} completed={completed}",
        status = row.status,
        id = row.id,
        source = row.trigger_source,
        user = row.triggered_by,
        processed = row.processed_products,
        failed = row.failed_products,
    );

    let failures: Vec<ProductFailure> = serde_json::from_str(row.error_details_json.as_str())
        .with_context(|| format!("invalid error details on job {}", row.id))?;
    for failure in failures.iter().take(MAX_PRINTED_FAILURES) {
        let product = if failure.product_id.is_empty() {
            "<run>"
        } else {
            failure.product_id.as_str()
        };
        line.push_str(&format!("\n    {product}: {}", failure.message));
    }
    if failures.len() > MAX_PRINTED_FAILURES {
        let hidden = failures.len() - MAX_PRINTED_FAILURES;
        line.push_str(&format!("\n    ... {hidden} more"));
    }
    Ok(line)
}

fn format_timestamp(ts: i64) -> String {
    match DateTime::<Utc>::from_timestamp(ts, 0) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => format!("{ts}"),
    }
}
