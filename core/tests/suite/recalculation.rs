use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reprice_core::JobSupervisor;
use reprice_core::PricingInputsProvider;
use reprice_core::ProductCatalog;
use reprice_core::StandardPriceCalculator;
use reprice_core::SupervisorOptions;
use reprice_core::TriggerSource;
use reprice_state::BillOfMaterials;
use reprice_state::MetalComponent;
use reprice_state::MetalPurityPrice;
use reprice_state::MrpMarkup;
use reprice_state::NewProduct;
use reprice_state::NewVariant;
use reprice_state::ProductBill;
use reprice_state::RecalculationJobStatus;
use reprice_state::StateRuntime;
use reprice_state::VariantPrice;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::Duration;

/// 4.5g of 22K gold: cost 27000 + 2250 making, MRP 28350 + 2475.
const RING_COST: i64 = 29_250;
const RING_SALE: i64 = 30_825;

fn ring(id: &str, purity_id: &str) -> NewProduct {
    NewProduct {
        id: id.to_string(),
        name: format!("Ring {id}"),
        variants: vec![NewVariant {
            id: format!("{id}-v1"),
            sku: format!("SKU-{id}"),
            bill_of_materials: BillOfMaterials {
                metal: Some(MetalComponent {
                    purity_id: purity_id.to_string(),
                    weight_grams: 4.5,
                }),
                stones: Vec::new(),
            },
        }],
    }
}

async fn seeded_state(product_count: usize) -> Result<(TempDir, Arc<StateRuntime>)> {
    let home = tempfile::tempdir()?;
    let state_db = StateRuntime::init(home.path().to_path_buf()).await?;
    state_db
        .upsert_metal_purity(&MetalPurityPrice {
            id: "gold-22k".to_string(),
            label: "22K".to_string(),
            price_per_gram: 6_000,
            making_charge_per_gram: 500,
        })
        .await?;
    state_db
        .set_mrp_markup(MrpMarkup {
            metal_percent: 5.0,
            making_percent: 10.0,
            stone_percent: 0.0,
            other_charge_percent: 0.0,
        })
        .await?;
    for index in 0..product_count {
        state_db
            .upsert_product(&ring(&format!("p-{index:04}"), "gold-22k"))
            .await?;
    }
    Ok((home, state_db))
}

fn supervisor_with(
    state_db: &Arc<StateRuntime>,
    catalog: Arc<dyn ProductCatalog>,
    chunk_size: usize,
) -> JobSupervisor {
    let inputs: Arc<dyn PricingInputsProvider> = Arc::clone(state_db) as _;
    JobSupervisor::new(
        Arc::clone(state_db),
        catalog,
        inputs,
        Arc::new(StandardPriceCalculator),
        SupervisorOptions { chunk_size },
    )
}

fn supervisor(state_db: &Arc<StateRuntime>) -> JobSupervisor {
    supervisor_with(state_db, Arc::clone(state_db) as _, 50)
}

/// Catalog that parks the n-th product load until released.
struct GatedCatalog {
    state_db: Arc<StateRuntime>,
    loads: AtomicUsize,
    pause_at: usize,
    reached: Notify,
    release: Notify,
}

impl GatedCatalog {
    fn new(state_db: Arc<StateRuntime>, pause_at: usize) -> Self {
        Self {
            state_db,
            loads: AtomicUsize::new(0),
            pause_at,
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ProductCatalog for GatedCatalog {
    async fn snapshot_product_ids(&self) -> Result<Vec<String>> {
        self.state_db.eligible_product_ids().await
    }

    async fn load_product(&self, product_id: &str) -> Result<Option<ProductBill>> {
        if self.loads.fetch_add(1, Ordering::SeqCst) + 1 == self.pause_at {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.state_db.get_product_bill(product_id).await
    }

    async fn save_prices(&self, product_id: &str, prices: &[VariantPrice<'_>]) -> Result<()> {
        self.state_db.save_product_prices(product_id, prices).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_pass_settles_every_product() -> Result<()> {
    let (_home, state_db) = seeded_state(500).await?;
    let supervisor = supervisor(&state_db);

    supervisor
        .gateway()
        .trigger(TriggerSource::MetalPurity, "userA");
    supervisor.wait_idle().await;

    let jobs = state_db.list_recalculation_jobs(10).await?;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.status, RecalculationJobStatus::Completed);
    assert_eq!(job.trigger_source, "metal_purity");
    assert_eq!(job.triggered_by, "userA");
    assert_eq!(job.total_products, Some(500));
    assert_eq!(job.processed_products, 500);
    assert_eq!(job.failed_products, 0);
    assert!(job.error_details.is_empty());
    assert!(job.completed_at.is_some());

    let prices = state_db.get_variant_prices("p-0499").await?;
    assert_eq!(prices[0].cost_price, Some(RING_COST));
    assert_eq!(prices[0].sale_price, Some(RING_SALE));
    assert_eq!(
        state_db.get_product_sale_price("p-0499").await?,
        Some(RING_SALE)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trigger_mid_pass_cancels_and_starts_fresh_run() -> Result<()> {
    let (_home, state_db) = seeded_state(500).await?;
    let catalog = Arc::new(GatedCatalog::new(Arc::clone(&state_db), 251));
    let supervisor = supervisor_with(&state_db, Arc::clone(&catalog) as _, 50);
    let gateway = supervisor.gateway();

    gateway.trigger(TriggerSource::MetalPurity, "userA");
    catalog.reached.notified().await;
    let job_a = state_db
        .current_recalculation_job()
        .await?
        .context("job A should be running")?;
    assert_eq!(job_a.total_products, Some(500));
    assert_eq!(job_a.processed_products, 250);

    gateway.trigger(TriggerSource::OtherCharge, "userB");
    catalog.release.notify_one();
    supervisor.wait_idle().await;

    let job_a = state_db
        .get_recalculation_job(&job_a.id)
        .await?
        .context("job A row")?;
    assert_eq!(job_a.status, RecalculationJobStatus::Cancelled);
    assert!(job_a.processed_products <= 250);
    assert!(job_a.completed_at.is_some());

    let jobs = state_db.list_recalculation_jobs(10).await?;
    assert_eq!(jobs.len(), 2);
    let job_b = &jobs[0];
    assert_ne!(job_b.id, job_a.id);
    assert_eq!(job_b.trigger_source, "other_charge");
    assert_eq!(job_b.triggered_by, "userB");
    assert_eq!(job_b.status, RecalculationJobStatus::Completed);
    assert_eq!(job_b.total_products, Some(500));
    assert_eq!(job_b.processed_products, 500);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stacked_triggers_collapse_into_one_follow_up_run() -> Result<()> {
    let (_home, state_db) = seeded_state(20).await?;
    let supervisor = supervisor(&state_db);
    let gateway = supervisor.gateway();

    gateway.trigger(TriggerSource::MetalPurity, "u1");
    gateway.trigger(TriggerSource::StonePrice, "u2");
    gateway.trigger(TriggerSource::MakingCharge, "u3");
    supervisor.wait_idle().await;

    let jobs = state_db.list_recalculation_jobs(10).await?;
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].status, RecalculationJobStatus::Completed);
    assert_eq!(jobs[0].trigger_source, "making_charge");
    assert_eq!(jobs[0].triggered_by, "u3");
    assert_eq!(jobs[1].status, RecalculationJobStatus::Cancelled);
    assert_eq!(jobs[1].triggered_by, "u1");
    assert_eq!(
        jobs.iter()
            .filter(|job| job.status == RecalculationJobStatus::Running)
            .count(),
        0
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unpriceable_product_is_recorded_without_failing_the_run() -> Result<()> {
    let (_home, state_db) = seeded_state(5).await?;
    state_db
        .upsert_product(&ring("p-bad", "platinum-950"))
        .await?;
    let supervisor = supervisor(&state_db);

    supervisor.gateway().trigger(TriggerSource::Manual, "ops");
    supervisor.wait_idle().await;

    let job = state_db
        .list_recalculation_jobs(1)
        .await?
        .pop()
        .context("job row")?;
    assert_eq!(job.status, RecalculationJobStatus::Completed);
    assert_eq!(job.total_products, Some(6));
    assert_eq!(job.processed_products, 5);
    assert_eq!(job.failed_products, 1);
    assert_eq!(job.error_details.len(), 1);
    assert_eq!(job.error_details[0].product_id, "p-bad");
    assert!(job.error_details[0].message.contains("platinum-950"));

    let bad_prices = state_db.get_variant_prices("p-bad").await?;
    assert_eq!(bad_prices[0].sale_price, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archived_products_are_not_repriced() -> Result<()> {
    let (_home, state_db) = seeded_state(4).await?;
    state_db.set_product_archived("p-0002", true).await?;
    let supervisor = supervisor(&state_db);

    supervisor.gateway().trigger(TriggerSource::MrpMarkup, "ops");
    supervisor.wait_idle().await;

    let job = state_db
        .list_recalculation_jobs(1)
        .await?
        .pop()
        .context("job row")?;
    assert_eq!(job.total_products, Some(3));
    assert_eq!(job.processed_products, 3);
    assert_eq!(state_db.get_product_sale_price("p-0002").await?, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rerun_with_unchanged_inputs_is_idempotent() -> Result<()> {
    let (_home, state_db) = seeded_state(10).await?;
    let supervisor = supervisor(&state_db);
    let gateway = supervisor.gateway();

    gateway.trigger(TriggerSource::Manual, "first");
    supervisor.wait_idle().await;
    let mut first = Vec::new();
    for index in 0..10 {
        first.push(state_db.get_variant_prices(&format!("p-{index:04}")).await?);
    }

    gateway.trigger(TriggerSource::Manual, "second");
    supervisor.wait_idle().await;
    let mut second = Vec::new();
    for index in 0..10 {
        second.push(state_db.get_variant_prices(&format!("p-{index:04}")).await?);
    }

    assert_eq!(first, second);
    let jobs = state_db.list_recalculation_jobs(10).await?;
    assert_eq!(jobs.len(), 2);
    assert!(
        jobs.iter()
            .all(|job| job.status == RecalculationJobStatus::Completed)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_triggers_and_input_edits_leave_a_clean_ledger() -> Result<()> {
    let (_home, state_db) = seeded_state(60).await?;
    let supervisor = supervisor_with(&state_db, Arc::clone(&state_db) as _, 5);
    let gateway = supervisor.gateway();

    let stop = Arc::new(AtomicBool::new(false));
    let editor = {
        let state_db = Arc::clone(&state_db);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut price_per_gram = 6_000;
            while !stop.load(Ordering::SeqCst) {
                price_per_gram += 1;
                state_db
                    .upsert_metal_purity(&MetalPurityPrice {
                        id: "gold-22k".to_string(),
                        label: "22K".to_string(),
                        price_per_gram,
                        making_charge_per_gram: 500,
                    })
                    .await?;
            }
            anyhow::Ok(())
        })
    };

    // Trigger order as the supervisor saw it.
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sources = [
        TriggerSource::MetalPurity,
        TriggerSource::MakingCharge,
        TriggerSource::StonePrice,
        TriggerSource::OtherCharge,
    ];
    let triggerers: Vec<_> = (0..8)
        .map(|task| {
            let gateway = gateway.clone();
            let fired = Arc::clone(&fired);
            tokio::spawn(async move {
                for round in 0..5 {
                    let triggered_by = format!("user-{task}-{round}");
                    {
                        let mut fired = fired.lock().unwrap_or_else(|err| err.into_inner());
                        gateway.trigger(sources[(task + round) % sources.len()], &triggered_by);
                        fired.push(triggered_by);
                    }
                    tokio::time::sleep(Duration::from_millis(3)).await;
                }
            })
        })
        .collect();
    for triggerer in triggerers {
        triggerer.await?;
    }
    supervisor.wait_idle().await;
    stop.store(true, Ordering::SeqCst);
    editor.await??;

    let last_trigger = fired
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .last()
        .cloned()
        .context("at least one trigger fired")?;
    let jobs = state_db.list_recalculation_jobs(100).await?;
    assert!(!jobs.is_empty());
    assert_eq!(jobs[0].triggered_by, last_trigger);
    assert_eq!(jobs[0].status, RecalculationJobStatus::Completed);
    for job in &jobs {
        assert!(
            matches!(
                job.status,
                RecalculationJobStatus::Completed | RecalculationJobStatus::Cancelled
            ),
            "job {} ended {:?}: {:?}",
            job.id,
            job.status,
            job.error_details
        );
        let settled = job.processed_products + job.failed_products;
        if job.status == RecalculationJobStatus::Completed {
            assert_eq!(Some(settled), job.total_products);
        } else if let Some(total) = job.total_products {
            assert!(settled <= total);
        }
    }
    assert_eq!(state_db.current_recalculation_job().await?, None);
    Ok(())
}
