use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use reprice_state::BillOfMaterials;
use reprice_state::MetalComponent;
use reprice_state::MetalPurityPrice;
use reprice_state::MrpMarkup;
use reprice_state::OtherCharge;
use reprice_state::PricingInputs;
use reprice_state::ProductBill;
use reprice_state::StateRuntime;
use reprice_state::StoneKind;
use reprice_state::VariantBill;
use reprice_state::VariantPrice;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::PriceCalculator;
use crate::PriceError;
use crate::ProductQuote;
use crate::StandardPriceCalculator;
use crate::collaborators::PricingInputsProvider;
use crate::collaborators::ProductCatalog;

pub(crate) async fn test_state() -> (TempDir, Arc<StateRuntime>) {
    let home = tempfile::tempdir().expect("tempdir");
    let state_db = StateRuntime::init(home.path().to_path_buf())
        .await
        .expect("initialize state");
    (home, state_db)
}

pub(crate) fn pricing_inputs() -> PricingInputs {
    let mut inputs = PricingInputs {
        markup: MrpMarkup {
            metal_percent: 5.0,
            making_percent: 10.0,
            stone_percent: 20.0,
            other_charge_percent: 0.0,
        },
        other_charges: vec![OtherCharge {
            id: "hallmark".to_string(),
            name: "Hallmarking".to_string(),
            amount: 100,
        }],
        ..PricingInputs::default()
    };
    inputs.metal_purities.insert(
        "gold-22k".to_string(),
        MetalPurityPrice {
            id: "gold-22k".to_string(),
            label: "22K".to_string(),
            price_per_gram: 6_000,
            making_charge_per_gram: 500,
        },
    );
    inputs
        .stone_prices
        .insert((StoneKind::Diamond, "round-vs".to_string()), 40_000);
    inputs
}

pub(crate) fn product_bill(product_id: &str, purity_id: &str, weight_grams: f64) -> ProductBill {
    ProductBill {
        product_id: product_id.to_string(),
        name: format!("Product {product_id}"),
        variants: vec![VariantBill {
            variant_id: format!("{product_id}-v1"),
            sku: format!("SKU-{product_id}"),
            bill_of_materials: BillOfMaterials {
                metal: Some(MetalComponent {
                    purity_id: purity_id.to_string(),
                    weight_grams,
                }),
                stones: Vec::new(),
            },
        }],
    }
}

/// Pauses one product load until the test releases it.
struct LoadGate {
    at_load: usize,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// In-memory catalog with failure injection.
pub(crate) struct FakeCatalog {
    products: Mutex<BTreeMap<String, ProductBill>>,
    saved: Mutex<HashMap<String, Vec<(String, i64, i64)>>>,
    snapshot_fails: AtomicBool,
    loads: AtomicUsize,
    gate: Mutex<Option<LoadGate>>,
}

impl FakeCatalog {
    pub(crate) fn with_products(count: usize) -> Self {
        let products = (0..count)
            .map(|index| {
                let product_id = format!("p-{index:04}");
                let bill = product_bill(&product_id, "gold-22k", 2.0 + index as f64 / 10.0);
                (product_id, bill)
            })
            .collect();
        Self {
            products: Mutex::new(products),
            saved: Mutex::new(HashMap::new()),
            snapshot_fails: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Make `product_id` reference a purity the inputs do not know.
    pub(crate) fn break_product(&self, product_id: &str) {
        let mut products = self.products.lock().expect("products lock");
        let product = products.get_mut(product_id).expect("known product");
        *product = product_bill(product_id, "unobtainium", 1.0);
    }

    pub(crate) fn fail_snapshot(&self) {
        self.snapshot_fails.store(true, Ordering::SeqCst);
    }

    /// Block the `at_load`-th product load (1-based) until `release` is
    /// notified. `reached` is notified once the load is parked.
    pub(crate) fn pause_at_load(&self, at_load: usize) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().expect("gate lock") = Some(LoadGate {
            at_load,
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (reached, release)
    }

    pub(crate) fn saved_count(&self) -> usize {
        self.saved.lock().expect("saved lock").len()
    }
}

#[async_trait]
impl ProductCatalog for FakeCatalog {
    async fn snapshot_product_ids(&self) -> anyhow::Result<Vec<String>> {
        if self.snapshot_fails.load(Ordering::SeqCst) {
            anyhow::bail!("catalog unavailable");
        }
        Ok(self
            .products
            .lock()
            .expect("products lock")
            .keys()
            .cloned()
            .collect())
    }

    async fn load_product(&self, product_id: &str) -> anyhow::Result<Option<ProductBill>> {
        let load = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let parked = {
            let gate = self.gate.lock().expect("gate lock");
            gate.as_ref()
                .filter(|gate| gate.at_load == load)
                .map(|gate| (Arc::clone(&gate.reached), Arc::clone(&gate.release)))
        };
        if let Some((reached, release)) = parked {
            reached.notify_one();
            release.notified().await;
        }
        Ok(self
            .products
            .lock()
            .expect("products lock")
            .get(product_id)
            .cloned())
    }

    async fn save_prices(
        &self,
        product_id: &str,
        prices: &[VariantPrice<'_>],
    ) -> anyhow::Result<()> {
        let prices = prices
            .iter()
            .map(|price| {
                (
                    price.variant_id.to_string(),
                    price.cost_price,
                    price.sale_price,
                )
            })
            .collect();
        self.saved
            .lock()
            .expect("saved lock")
            .insert(product_id.to_string(), prices);
        Ok(())
    }
}

/// Pricing inputs that can be made unreadable.
pub(crate) struct FakeInputs {
    inputs: PricingInputs,
    unavailable: bool,
}

impl Default for FakeInputs {
    fn default() -> Self {
        Self {
            inputs: pricing_inputs(),
            unavailable: false,
        }
    }
}

impl FakeInputs {
    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PricingInputsProvider for FakeInputs {
    async fn load_pricing_inputs(&self) -> anyhow::Result<PricingInputs> {
        if self.unavailable {
            anyhow::bail!("pricing tables locked");
        }
        Ok(self.inputs.clone())
    }
}

/// Panics for one product, prices everything else normally.
pub(crate) struct PanickingCalculator {
    pub(crate) product_id: String,
}

impl PriceCalculator for PanickingCalculator {
    fn quote(
        &self,
        inputs: &PricingInputs,
        product: &ProductBill,
    ) -> Result<ProductQuote, PriceError> {
        if product.product_id == self.product_id {
            panic!("formula bug for {}", product.product_id);
        }
        StandardPriceCalculator.quote(inputs, product)
    }
}

