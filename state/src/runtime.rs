use crate::migrations::MIGRATOR;
use crate::model::BillOfMaterials;
use crate::model::MetalPurityPrice;
use crate::model::MrpMarkup;
use crate::model::NewProduct;
use crate::model::OtherCharge;
use crate::model::PricingInputs;
use crate::model::ProductBill;
use crate::model::ProductFailure;
use crate::model::RecalculationJob;
use crate::model::RecalculationJobCreateParams;
use crate::model::RecalculationJobRow;
use crate::model::RecalculationJobStatus;
use crate::model::StoneKind;
use crate::model::StoredVariantPrice;
use crate::model::VariantBill;
use crate::model::VariantBillRow;
use crate::model::VariantPrice;
use anyhow::Context;
use chrono::Utc;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::QueryBuilder;
use sqlx::Row;
use sqlx::Sqlite;
use sqlx::SqliteConnection;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

mod catalog;
mod pricing_inputs;
mod recalculation_jobs;
#[cfg(test)]
mod test_support;

pub const STATE_DB_FILENAME: &str = "reprice";
pub const STATE_DB_VERSION: u32 = 1;

#[derive(Clone)]
pub struct StateRuntime {
    home: PathBuf,
    pool: Arc<sqlx::SqlitePool>,
}

impl StateRuntime {
    /// Initialize the state runtime rooted at `home`.
    ///
    /// This opens (and migrates) the SQLite database at
    /// `home/reprice_<version>.sqlite`.
    pub async fn init(home: PathBuf) -> anyhow::Result<Arc<Self>> {
        tokio::fs::create_dir_all(&home)
            .await
            .with_context(|| format!("failed to create state home {}", home.display()))?;
        let state_path = state_db_path(home.as_path());
        let pool = match open_sqlite(&state_path).await {
            Ok(db) => Arc::new(db),
            Err(err) => {
                warn!("failed to open state db at {}: {err}", state_path.display());
                return Err(err);
            }
        };
        Ok(Arc::new(Self { home, pool }))
    }

    /// Return the directory holding the state database.
    pub fn home(&self) -> &Path {
        self.home.as_path()
    }
}

async fn open_sqlite(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .log_statements(LevelFilter::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub fn state_db_filename() -> String {
    format!("{STATE_DB_FILENAME}_{STATE_DB_VERSION}.sqlite")
}

pub fn state_db_path(home: &Path) -> PathBuf {
    home.join(state_db_filename())
}
