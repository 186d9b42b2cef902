use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use reprice_state::PricingInputs;
use reprice_state::ProductFailure;
use reprice_state::StateRuntime;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::collaborators::PricingInputsProvider;
use crate::collaborators::ProductCatalog;
use crate::pricing::PriceCalculator;
use crate::supervisor::RunControl;

/// How a run's worker left its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// Every snapshotted product was settled and the row is `completed`.
    Completed,
    /// A run-level error ended the pass and the row is `failed`.
    Failed(String),
    /// Cancellation was observed. The supervisor records the outcome.
    Cancelled,
}

/// Outcome of the iteration itself, before the terminal write.
enum Pass {
    Exhausted,
    Interrupted,
}

enum ProductStep {
    Priced,
    Interrupted,
}

/// Counters the worker owns for the lifetime of its run.
#[derive(Default)]
struct Progress {
    processed: u64,
    failed: u64,
    unflushed_failures: Vec<ProductFailure>,
}

impl Progress {
    fn record_failure(&mut self, product_id: &str, message: String) {
        self.failed += 1;
        self.unflushed_failures
            .push(ProductFailure::new(product_id, message));
    }
}

pub(crate) struct RecalculationWorker {
    pub(crate) job_id: String,
    pub(crate) state_db: Arc<StateRuntime>,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) inputs: Arc<dyn PricingInputsProvider>,
    pub(crate) calculator: Arc<dyn PriceCalculator>,
    pub(crate) chunk_size: usize,
    pub(crate) control: RunControl,
}

impl RecalculationWorker {
    /// Execute the run to completion, failure, or observed cancellation.
    ///
    /// `completed` and `failed` are written here, and only after claiming the
    /// outcome from `control`; a claim lost to a cancellation request turns
    /// the exit into [`WorkerExit::Cancelled`].
    pub(crate) async fn run(self) -> WorkerExit {
        let mut progress = Progress::default();
        let pass = self.iterate(&mut progress).await;
        match pass {
            Ok(Pass::Interrupted) => WorkerExit::Cancelled,
            Ok(Pass::Exhausted) => {
                if !self.control.try_claim_outcome() {
                    return WorkerExit::Cancelled;
                }
                match self
                    .state_db
                    .mark_recalculation_completed(&self.job_id)
                    .await
                {
                    Ok(_) => {
                        info!(
                            job_id = %self.job_id,
                            processed = progress.processed,
                            failed = progress.failed,
                            "recalculation job completed"
                        );
                        WorkerExit::Completed
                    }
                    Err(err) => {
                        error!(job_id = %self.job_id, "failed to record completed recalculation: {err:#}");
                        WorkerExit::Failed(format!("failed to record completion: {err:#}"))
                    }
                }
            }
            Err(err) => {
                if !self.control.try_claim_outcome() {
                    return WorkerExit::Cancelled;
                }
                let message = format!("{err:#}");
                error!(job_id = %self.job_id, "recalculation job failed: {message}");
                if let Err(write_err) = self
                    .state_db
                    .mark_recalculation_failed(&self.job_id, &message)
                    .await
                {
                    error!(job_id = %self.job_id, "failed to record failed recalculation: {write_err:#}");
                }
                WorkerExit::Failed(message)
            }
        }
    }

    async fn iterate(&self, progress: &mut Progress) -> anyhow::Result<Pass> {
        let inputs = self
            .inputs
            .load_pricing_inputs()
            .await
            .context("failed to read pricing inputs")?;
        let snapshot = self
            .catalog
            .snapshot_product_ids()
            .await
            .context("failed to snapshot product catalog")?;
        let total = snapshot.len() as u64;
        if !self
            .state_db
            .set_recalculation_total(&self.job_id, total)
            .await?
        {
            anyhow::bail!("recalculation job {} is no longer running", self.job_id);
        }
        info!(job_id = %self.job_id, total_products = total, "catalog snapshot taken");

        for chunk in snapshot.chunks(self.chunk_size.max(1)) {
            for product_id in chunk {
                if self.control.is_cancelled() {
                    self.checkpoint(progress).await?;
                    return Ok(Pass::Interrupted);
                }
                match self.price_product(&inputs, product_id).await {
                    Ok(ProductStep::Priced) => progress.processed += 1,
                    Ok(ProductStep::Interrupted) => {
                        self.checkpoint(progress).await?;
                        return Ok(Pass::Interrupted);
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(job_id = %self.job_id, product_id, "failed to reprice product: {message}");
                        progress.record_failure(product_id, message);
                    }
                }
            }
            self.checkpoint(progress).await?;
            // Chunk boundary: let request handlers run during long passes.
            tokio::task::yield_now().await;
        }
        Ok(Pass::Exhausted)
    }

    async fn price_product(
        &self,
        inputs: &PricingInputs,
        product_id: &str,
    ) -> anyhow::Result<ProductStep> {
        let product = self
            .catalog
            .load_product(product_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("product {product_id} no longer exists"))?;
        let quote = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.calculator.quote(inputs, &product)
        }))
        .map_err(|_| anyhow::anyhow!("price computation panicked for product {product_id}"))??;

        // Never start a write the run no longer owns; a write already started
        // is always allowed to finish.
        if self.control.is_cancelled() {
            return Ok(ProductStep::Interrupted);
        }
        self.catalog
            .save_prices(product_id, &quote.variant_prices())
            .await?;
        debug!(job_id = %self.job_id, product_id, "product repriced");
        Ok(ProductStep::Priced)
    }

    async fn checkpoint(&self, progress: &mut Progress) -> anyhow::Result<()> {
        let written = self
            .state_db
            .checkpoint_recalculation_progress(
                &self.job_id,
                progress.processed,
                progress.failed,
                &progress.unflushed_failures,
            )
            .await
            .context("failed to checkpoint recalculation progress")?;
        if !written {
            anyhow::bail!("recalculation job {} is no longer running", self.job_id);
        }
        progress.unflushed_failures.clear();
        Ok(())
    }
}
