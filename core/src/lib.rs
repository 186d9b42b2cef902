//! Pricing recalculation engine.
//!
//! Collaborators that change a pricing input call [`TriggerGateway::trigger`]
//! after committing. The [`JobSupervisor`] keeps at most one recalculation
//! run in flight: a trigger that arrives mid-run cancels the run and queues a
//! fresh one. Each run walks a snapshot of the catalog, prices every product
//! with a [`PriceCalculator`], and records its progress in the
//! `reprice-state` ledger.

mod collaborators;
mod pricing;
mod supervisor;
#[cfg(test)]
mod test_support;
mod trigger;
mod worker;

pub use collaborators::PricingInputsProvider;
pub use collaborators::ProductCatalog;
pub use pricing::PriceCalculator;
pub use pricing::PriceError;
pub use pricing::ProductQuote;
pub use pricing::StandardPriceCalculator;
pub use pricing::VariantQuote;
pub use supervisor::DEFAULT_CHUNK_SIZE;
pub use supervisor::JobSupervisor;
pub use supervisor::SupervisorOptions;
pub use trigger::TriggerGateway;
pub use trigger::TriggerRequest;
pub use trigger::TriggerSource;
