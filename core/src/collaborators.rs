use async_trait::async_trait;
use reprice_state::PricingInputs;
use reprice_state::ProductBill;
use reprice_state::StateRuntime;
use reprice_state::VariantPrice;

/// Read/write access to the product catalog for a recalculation run.
#[async_trait]
pub trait ProductCatalog: Send + Sync + 'static {
    /// Ids of every product the run must price. Taken once per run.
    async fn snapshot_product_ids(&self) -> anyhow::Result<Vec<String>>;

    /// Load a product's bill of materials. `None` if it disappeared since the
    /// snapshot.
    async fn load_product(&self, product_id: &str) -> anyhow::Result<Option<ProductBill>>;

    /// Persist derived prices for one product. Either every price is written
    /// or none is.
    async fn save_prices(
        &self,
        product_id: &str,
        prices: &[VariantPrice<'_>],
    ) -> anyhow::Result<()>;
}

/// Source of the pricing inputs a run prices against.
#[async_trait]
pub trait PricingInputsProvider: Send + Sync + 'static {
    async fn load_pricing_inputs(&self) -> anyhow::Result<PricingInputs>;
}

#[async_trait]
impl ProductCatalog for StateRuntime {
    async fn snapshot_product_ids(&self) -> anyhow::Result<Vec<String>> {
        self.eligible_product_ids().await
    }

    async fn load_product(&self, product_id: &str) -> anyhow::Result<Option<ProductBill>> {
        self.get_product_bill(product_id).await
    }

    async fn save_prices(
        &self,
        product_id: &str,
        prices: &[VariantPrice<'_>],
    ) -> anyhow::Result<()> {
        self.save_product_prices(product_id, prices).await
    }
}

#[async_trait]
impl PricingInputsProvider for StateRuntime {
    async fn load_pricing_inputs(&self) -> anyhow::Result<PricingInputs> {
        StateRuntime::load_pricing_inputs(self).await
    }
}
