use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use reprice_state::RecalculationJobCreateParams;
use reprice_state::StateRuntime;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::collaborators::PricingInputsProvider;
use crate::collaborators::ProductCatalog;
use crate::pricing::PriceCalculator;
use crate::trigger::TriggerGateway;
use crate::trigger::TriggerRequest;
use crate::worker::RecalculationWorker;
use crate::worker::WorkerExit;

pub const DEFAULT_CHUNK_SIZE: usize = 50;

const ORPHANED_RUN_MESSAGE: &str = "recalculation worker exited without recording an outcome";
const WORKER_PANIC_MESSAGE: &str = "recalculation worker panicked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Products priced between progress checkpoints.
    pub chunk_size: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

const PHASE_RUNNING: u8 = 0;
const PHASE_CANCEL_REQUESTED: u8 = 1;
const PHASE_OUTCOME_CLAIMED: u8 = 2;

/// Shared between the supervisor and one run's worker.
///
/// Exactly one side gets to decide how a run ends: either the supervisor
/// requests cancellation first, or the worker claims its own outcome first.
#[derive(Clone)]
pub(crate) struct RunControl {
    inner: Arc<RunControlInner>,
}

struct RunControlInner {
    token: CancellationToken,
    phase: AtomicU8,
}

impl RunControl {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RunControlInner {
                token: CancellationToken::new(),
                phase: AtomicU8::new(PHASE_RUNNING),
            }),
        }
    }

    /// Returns `false` if the worker already claimed the outcome.
    pub(crate) fn request_cancel(&self) -> bool {
        match self.inner.phase.compare_exchange(
            PHASE_RUNNING,
            PHASE_CANCEL_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.inner.token.cancel();
                true
            }
            Err(phase) => phase == PHASE_CANCEL_REQUESTED,
        }
    }

    pub(crate) fn try_claim_outcome(&self) -> bool {
        self.inner
            .phase
            .compare_exchange(
                PHASE_RUNNING,
                PHASE_OUTCOME_CLAIMED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

struct ActiveRun {
    control: RunControl,
    job_id: Option<String>,
}

#[derive(Default)]
struct RunSlot {
    active: Option<ActiveRun>,
    pending: Option<TriggerRequest>,
    shutting_down: bool,
}

struct SupervisorInner {
    state_db: Arc<StateRuntime>,
    catalog: Arc<dyn ProductCatalog>,
    inputs: Arc<dyn PricingInputsProvider>,
    calculator: Arc<dyn PriceCalculator>,
    options: SupervisorOptions,
    slot: Mutex<RunSlot>,
    busy_tx: watch::Sender<bool>,
}

/// Keeps at most one recalculation run in flight.
///
/// A trigger that arrives while a run is active cancels that run and is
/// remembered as the next run to start; when several arrive before the
/// cancelled run stops, the most recent one wins.
#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<SupervisorInner>,
}

impl JobSupervisor {
    pub fn new(
        state_db: Arc<StateRuntime>,
        catalog: Arc<dyn ProductCatalog>,
        inputs: Arc<dyn PricingInputsProvider>,
        calculator: Arc<dyn PriceCalculator>,
        options: SupervisorOptions,
    ) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SupervisorInner {
                state_db,
                catalog,
                inputs,
                calculator,
                options,
                slot: Mutex::new(RunSlot::default()),
                busy_tx,
            }),
        }
    }

    pub fn gateway(&self) -> TriggerGateway {
        TriggerGateway::new(self.clone())
    }

    /// Ledger id of the run currently in flight, once its row exists.
    pub fn active_job_id(&self) -> Option<String> {
        self.lock_slot()
            .active
            .as_ref()
            .and_then(|active| active.job_id.clone())
    }

    /// Resolves once no run is active and none is queued.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy_tx.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    /// Stop accepting triggers, cancel the active run, and wait for it to
    /// be recorded.
    pub async fn shutdown(&self) {
        {
            let mut slot = self.lock_slot();
            slot.shutting_down = true;
            if let Some(dropped) = slot.pending.take() {
                info!(
                    trigger_source = %dropped.source,
                    triggered_by = %dropped.triggered_by,
                    "dropping queued recalculation on shutdown"
                );
            }
            if let Some(active) = slot.active.as_ref() {
                active.control.request_cancel();
            }
        }
        self.wait_idle().await;
    }

    pub(crate) fn submit(&self, request: TriggerRequest) {
        let mut slot = self.lock_slot();
        if slot.shutting_down {
            warn!(
                trigger_source = %request.source,
                "ignoring recalculation trigger during shutdown"
            );
            return;
        }

        if let Some(active) = slot.active.as_ref() {
            if active.control.request_cancel() {
                info!(
                    job_id = active.job_id.as_deref().unwrap_or("<starting>"),
                    trigger_source = %request.source,
                    "recalculation already running; cancelling it and queueing a fresh run"
                );
            } else {
                info!(
                    trigger_source = %request.source,
                    "recalculation is finishing; queueing a fresh run"
                );
            }
            slot.pending = Some(request);
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                error!("cannot start recalculation outside a Tokio runtime: {err}");
                return;
            }
        };
        let control = RunControl::new();
        slot.active = Some(ActiveRun {
            control: control.clone(),
            job_id: None,
        });
        self.inner.busy_tx.send_replace(true);
        drop(slot);

        let supervisor = self.clone();
        handle.spawn(async move {
            supervisor.drive(request, control).await;
        });
    }

    /// Runs `request`, then every follow-up queued while it was in flight.
    async fn drive(&self, mut request: TriggerRequest, mut control: RunControl) {
        loop {
            self.run_once(&request, &control).await;

            let mut slot = self.lock_slot();
            match slot.pending.take() {
                Some(next) if !slot.shutting_down => {
                    control = RunControl::new();
                    slot.active = Some(ActiveRun {
                        control: control.clone(),
                        job_id: None,
                    });
                    request = next;
                }
                _ => {
                    slot.active = None;
                    self.inner.busy_tx.send_replace(false);
                    return;
                }
            }
        }
    }

    async fn run_once(&self, request: &TriggerRequest, control: &RunControl) {
        let state_db = &self.inner.state_db;
        match state_db
            .fail_interrupted_recalculation_jobs(ORPHANED_RUN_MESSAGE)
            .await
        {
            Ok(0) => {}
            Ok(count) => warn!("failed {count} orphaned recalculation job(s) before starting"),
            Err(err) => error!("failed to sweep orphaned recalculation jobs: {err:#}"),
        }

        let job_id = Uuid::new_v4().to_string();
        let params = RecalculationJobCreateParams {
            id: job_id.clone(),
            trigger_source: request.source.as_str().to_string(),
            triggered_by: request.triggered_by.clone(),
        };
        if let Err(err) = state_db.create_recalculation_job(&params).await {
            error!(
                trigger_source = %request.source,
                "failed to start recalculation job: {err:#}"
            );
            return;
        }
        if let Some(active) = self.lock_slot().active.as_mut() {
            active.job_id = Some(job_id.clone());
        }
        info!(
            job_id = %job_id,
            trigger_source = %request.source,
            triggered_by = %request.triggered_by,
            "recalculation job started"
        );

        let worker = RecalculationWorker {
            job_id: job_id.clone(),
            state_db: Arc::clone(state_db),
            catalog: Arc::clone(&self.inner.catalog),
            inputs: Arc::clone(&self.inner.inputs),
            calculator: Arc::clone(&self.inner.calculator),
            chunk_size: self.inner.options.chunk_size,
            control: control.clone(),
        };
        let exit = match tokio::spawn(worker.run()).await {
            Ok(exit) => exit,
            Err(err) if control.try_claim_outcome() => {
                error!(job_id = %job_id, "recalculation worker aborted: {err}");
                if let Err(write_err) = state_db
                    .mark_recalculation_failed(&job_id, WORKER_PANIC_MESSAGE)
                    .await
                {
                    error!(job_id = %job_id, "failed to record failed recalculation: {write_err:#}");
                }
                WorkerExit::Failed(WORKER_PANIC_MESSAGE.to_string())
            }
            Err(_) => WorkerExit::Cancelled,
        };

        if exit == WorkerExit::Cancelled {
            match state_db.mark_recalculation_cancelled(&job_id).await {
                Ok(true) => info!(job_id = %job_id, "recalculation job cancelled"),
                Ok(false) => warn!(job_id = %job_id, "cancelled recalculation job was already settled"),
                Err(err) => {
                    error!(job_id = %job_id, "failed to record cancelled recalculation: {err:#}");
                }
            }
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, RunSlot> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
