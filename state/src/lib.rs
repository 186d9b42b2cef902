//! SQLite-backed state for the pricing recalculation engine.
//!
//! This crate owns persistence only: the append-only ledger of recalculation
//! runs, the product catalog rows the runs read and write, and the pricing
//! input tables. Scheduling and the price formula live in `reprice-core`.

mod migrations;
mod model;
mod runtime;

/// Preferred entrypoint: owns the connection pool.
pub use runtime::StateRuntime;

pub use model::BillOfMaterials;
pub use model::MetalComponent;
pub use model::MetalPurityPrice;
pub use model::MrpMarkup;
pub use model::NewProduct;
pub use model::NewVariant;
pub use model::OtherCharge;
pub use model::PricingInputs;
pub use model::ProductBill;
pub use model::ProductFailure;
pub use model::RecalculationJob;
pub use model::RecalculationJobCreateParams;
pub use model::RecalculationJobStatus;
pub use model::StoneComponent;
pub use model::StoneKind;
pub use model::StoredVariantPrice;
pub use model::VariantBill;
pub use model::VariantPrice;
pub use runtime::STATE_DB_FILENAME;
pub use runtime::STATE_DB_VERSION;
pub use runtime::state_db_filename;
pub use runtime::state_db_path;
