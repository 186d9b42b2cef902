mod catalog;
mod pricing_inputs;
mod recalculation_job;

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

pub use catalog::BillOfMaterials;
pub use catalog::MetalComponent;
pub use catalog::NewProduct;
pub use catalog::NewVariant;
pub use catalog::ProductBill;
pub use catalog::StoneComponent;
pub use catalog::StoneKind;
pub use catalog::StoredVariantPrice;
pub use catalog::VariantBill;
pub use catalog::VariantPrice;
pub use pricing_inputs::MetalPurityPrice;
pub use pricing_inputs::MrpMarkup;
pub use pricing_inputs::OtherCharge;
pub use pricing_inputs::PricingInputs;
pub use recalculation_job::ProductFailure;
pub use recalculation_job::RecalculationJob;
pub use recalculation_job::RecalculationJobCreateParams;
pub use recalculation_job::RecalculationJobStatus;

pub(crate) use catalog::VariantBillRow;
pub(crate) use recalculation_job::RecalculationJobRow;

pub(crate) fn epoch_seconds_to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid unix timestamp: {secs}"))
}
