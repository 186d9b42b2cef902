use super::*;

const RECALCULATION_JOB_COLUMNS: &str = r#"
    id,
    status,
    trigger_source,
    triggered_by,
    total_products,
    processed_products,
    failed_products,
    error_details_json,
    created_at,
    started_at,
    completed_at
"#;

impl StateRuntime {
    /// Insert a new ledger row in the `running` state.
    ///
    /// Fails if another row is already running: the ledger admits a single
    /// in-flight run.
    pub async fn create_recalculation_job(
        &self,
        params: &RecalculationJobCreateParams,
    ) -> anyhow::Result<RecalculationJob> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
INSERT INTO recalculation_jobs (
    id,
    status,
    trigger_source,
    triggered_by,
    total_products,
    processed_products,
    failed_products,
    error_details_json,
    created_at,
    started_at,
    completed_at
) VALUES (?, ?, ?, ?, NULL, 0, 0, '[]', ?, ?, NULL)
            "#,
        )
        .bind(params.id.as_str())
        .bind(RecalculationJobStatus::Running.as_str())
        .bind(params.trigger_source.as_str())
        .bind(params.triggered_by.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await;
        if let Err(err) = result {
            if let Some(db_err) = err.as_database_error()
                && db_err.is_unique_violation()
            {
                anyhow::bail!(
                    "cannot create recalculation job {}: another job is already running",
                    params.id
                );
            }
            return Err(err.into());
        }

        let job_id = params.id.as_str();
        self.get_recalculation_job(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to load created recalculation job {job_id}"))
    }

    pub async fn get_recalculation_job(
        &self,
        job_id: &str,
    ) -> anyhow::Result<Option<RecalculationJob>> {
        let sql = format!("SELECT {RECALCULATION_JOB_COLUMNS} FROM recalculation_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, RecalculationJobRow>(sql.as_str())
            .bind(job_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(RecalculationJob::try_from).transpose()
    }

    /// Most recent runs, newest first.
    pub async fn list_recalculation_jobs(
        &self,
        limit: usize,
    ) -> anyhow::Result<Vec<RecalculationJob>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECALCULATION_JOB_COLUMNS} FROM recalculation_jobs"
        ));
        // Insertion order breaks ties between runs created within the same second.
        builder.push(" ORDER BY created_at DESC, rowid DESC");
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        let rows: Vec<RecalculationJobRow> = builder
            .build_query_as::<RecalculationJobRow>()
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.into_iter().map(RecalculationJob::try_from).collect()
    }

    /// The run currently in flight, if any.
    pub async fn current_recalculation_job(&self) -> anyhow::Result<Option<RecalculationJob>> {
        let sql = format!(
            "SELECT {RECALCULATION_JOB_COLUMNS} FROM recalculation_jobs WHERE status = ? LIMIT 1"
        );
        let row = sqlx::query_as::<_, RecalculationJobRow>(sql.as_str())
            .bind(RecalculationJobStatus::Running.as_str())
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(RecalculationJob::try_from).transpose()
    }

    /// Record the size of the run's snapshot. The total can only be set once.
    pub async fn set_recalculation_total(
        &self,
        job_id: &str,
        total_products: u64,
    ) -> anyhow::Result<bool> {
        let total_products = i64::try_from(total_products)
            .map_err(|_| anyhow::anyhow!("invalid total_products value"))?;
        let result = sqlx::query(
            r#"
UPDATE recalculation_jobs
SET total_products = ?
WHERE id = ? AND status = ? AND total_products IS NULL
            "#,
        )
        .bind(total_products)
        .bind(job_id)
        .bind(RecalculationJobStatus::Running.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the running job's counters and append newly failed products.
    ///
    /// Counters are absolute values owned by the worker. Returns `false` when
    /// the row is no longer running.
    pub async fn checkpoint_recalculation_progress(
        &self,
        job_id: &str,
        processed_products: u64,
        failed_products: u64,
        new_failures: &[ProductFailure],
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let row = sqlx::query(
            r#"
SELECT total_products, error_details_json
FROM recalculation_jobs
WHERE id = ? AND status = ?
            "#,
        )
        .bind(job_id)
        .bind(RecalculationJobStatus::Running.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let total_products: Option<i64> = row.try_get("total_products")?;
        let settled = processed_products.saturating_add(failed_products);
        if let Some(total) = total_products
            && u64::try_from(total).unwrap_or_default() < settled
        {
            anyhow::bail!(
                "recalculation job {job_id} progress {settled} exceeds snapshot size {total}"
            );
        }
        let error_details_json: String = row.try_get("error_details_json")?;
        let mut error_details: Vec<ProductFailure> =
            serde_json::from_str(error_details_json.as_str())?;
        error_details.extend_from_slice(new_failures);

        sqlx::query(
            r#"
UPDATE recalculation_jobs
SET processed_products = ?, failed_products = ?, error_details_json = ?
WHERE id = ?
            "#,
        )
        .bind(i64::try_from(processed_products)?)
        .bind(i64::try_from(failed_products)?)
        .bind(serde_json::to_string(&error_details)?)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_recalculation_completed(&self, job_id: &str) -> anyhow::Result<bool> {
        self.finalize_recalculation_job(job_id, RecalculationJobStatus::Completed, None)
            .await
    }

    /// Mark the run failed and record `error_message` as a run-level failure.
    pub async fn mark_recalculation_failed(
        &self,
        job_id: &str,
        error_message: &str,
    ) -> anyhow::Result<bool> {
        self.finalize_recalculation_job(
            job_id,
            RecalculationJobStatus::Failed,
            Some(ProductFailure::fatal(error_message)),
        )
        .await
    }

    pub async fn mark_recalculation_cancelled(&self, job_id: &str) -> anyhow::Result<bool> {
        self.finalize_recalculation_job(job_id, RecalculationJobStatus::Cancelled, None)
            .await
    }

    /// Fail every row left `running` by a previous process.
    ///
    /// Must run before a supervisor starts in this process.
    pub async fn fail_interrupted_recalculation_jobs(
        &self,
        error_message: &str,
    ) -> anyhow::Result<u64> {
        let rows = sqlx::query("SELECT id FROM recalculation_jobs WHERE status = ?")
            .bind(RecalculationJobStatus::Running.as_str())
            .fetch_all(self.pool.as_ref())
            .await?;
        let mut recovered = 0;
        for row in rows {
            let job_id: String = row.try_get("id")?;
            if self.mark_recalculation_failed(&job_id, error_message).await? {
                warn!("marked interrupted recalculation job {job_id} as failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn finalize_recalculation_job(
        &self,
        job_id: &str,
        status: RecalculationJobStatus,
        failure: Option<ProductFailure>,
    ) -> anyhow::Result<bool> {
        debug_assert!(status.is_final());
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let row = sqlx::query(
            r#"
SELECT error_details_json
FROM recalculation_jobs
WHERE id = ? AND status = ?
            "#,
        )
        .bind(job_id)
        .bind(RecalculationJobStatus::Running.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let error_details_json: String = row.try_get("error_details_json")?;
        let error_details_json = match failure {
            Some(failure) => {
                let mut error_details: Vec<ProductFailure> =
                    serde_json::from_str(error_details_json.as_str())?;
                error_details.push(failure);
                serde_json::to_string(&error_details)?
            }
            None => error_details_json,
        };

        let result = sqlx::query(
            r#"
UPDATE recalculation_jobs
SET status = ?, completed_at = ?, error_details_json = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(error_details_json)
        .bind(job_id)
        .bind(RecalculationJobStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
