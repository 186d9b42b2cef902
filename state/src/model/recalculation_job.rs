use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::epoch_seconds_to_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalculationJobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RecalculationJobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            RecalculationJobStatus::Running => "running",
            RecalculationJobStatus::Completed => "completed",
            RecalculationJobStatus::Cancelled => "cancelled",
            RecalculationJobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("invalid recalculation job status: {value}")),
        }
    }

    pub fn is_final(self) -> bool {
        !matches!(self, RecalculationJobStatus::Running)
    }
}

/// One entry of a run's `error_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFailure {
    /// Product the failure belongs to. Empty for run-level failures.
    pub product_id: String,
    pub message: String,
}

impl ProductFailure {
    pub fn new(product_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            message: message.into(),
        }
    }

    /// A failure that is not attributable to a single product.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(String::new(), message)
    }
}

/// One row of the recalculation ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalculationJob {
    pub id: String,
    pub status: RecalculationJobStatus,
    pub trigger_source: String,
    pub triggered_by: String,
    /// Size of the run's product snapshot; `None` until the snapshot is taken.
    pub total_products: Option<u64>,
    pub processed_products: u64,
    pub failed_products: u64,
    pub error_details: Vec<ProductFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecalculationJob {
    /// Products the run has finished with, successfully or not.
    pub fn settled_products(&self) -> u64 {
        self.processed_products + self.failed_products
    }
}

#[derive(Debug, Clone)]
pub struct RecalculationJobCreateParams {
    pub id: String,
    pub trigger_source: String,
    pub triggered_by: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecalculationJobRow {
    pub(crate) id: String,
    pub(crate) status: String,
    pub(crate) trigger_source: String,
    pub(crate) triggered_by: String,
    pub(crate) total_products: Option<i64>,
    pub(crate) processed_products: i64,
    pub(crate) failed_products: i64,
    pub(crate) error_details_json: String,
    pub(crate) created_at: i64,
    pub(crate) started_at: Option<i64>,
    pub(crate) completed_at: Option<i64>,
}

impl TryFrom<RecalculationJobRow> for RecalculationJob {
    type Error = anyhow::Error;

    fn try_from(value: RecalculationJobRow) -> Result<Self, Self::Error> {
        let total_products = value
            .total_products
            .map(u64::try_from)
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid total_products value"))?;
        let processed_products = u64::try_from(value.processed_products)
            .map_err(|_| anyhow::anyhow!("invalid processed_products value"))?;
        let failed_products = u64::try_from(value.failed_products)
            .map_err(|_| anyhow::anyhow!("invalid failed_products value"))?;
        Ok(Self {
            id: value.id,
            status: RecalculationJobStatus::parse(value.status.as_str())?,
            trigger_source: value.trigger_source,
            triggered_by: value.triggered_by,
            total_products,
            processed_products,
            failed_products,
            error_details: serde_json::from_str(value.error_details_json.as_str())?,
            created_at: epoch_seconds_to_datetime(value.created_at)?,
            started_at: value
                .started_at
                .map(epoch_seconds_to_datetime)
                .transpose()?,
            completed_at: value
                .completed_at
                .map(epoch_seconds_to_datetime)
                .transpose()?,
        })
    }
}
