//! # Data Source Coordinator
//!
//! Public façade over the job-tracking core. Owns the shared state and wires
//! the [`ListSynchronizer`], the [`Poller`] and the
//! [`AutoRetryCoordinator`] together.
//!
//! ## Flow
//!
//! ```text
//! fetch / mutation ──► refresh ──► in flight? ──yes──► Poller ──tick──► refresh ...
//!                                      │                   │
//!                                      no             settled (none in flight)
//!                                      │                   │
//!                                      └──── failed jobs & auto-retry on ───► retry batch ──► Poller
//! ```
//!
//! ## Mutations
//!
//! Mutations call the backend first. On success the store is patched right
//! away (optimistic Pending after a retry, removal after a delete) and, where
//! the backend will change state on its own, a refresh follows. On failure
//! the error goes back to the caller and the store is left as it is; the next
//! refresh corrects any divergence.
//!
//! ## Teardown
//!
//! [`shutdown`](DataSourceCoordinator::shutdown) cancels the poll timer and
//! keeps it from starting again. A running retry batch stops before its next
//! call. Dropping the coordinator does the same.

use crate::api::{
    BatchDeleteReport, BatchUploadReport, DataSourceApi, DataSourceFilter, ListQuery, Pagination,
    SortConfig, UploadFile, UploadOptions, UploadReceipt,
};
use crate::auto_retry::{AutoRetryCoordinator, AutoRetryOutcome, RetryExecutor};
use crate::http_api::HttpDataSourceApi;
use crate::job::{FileMetadata, JobId, JobRecord, JobStatus, StatusPatch};
use crate::poller::{PollDecision, PollTarget, Poller};
use crate::record_store::StatusChange;
use crate::state::{DataSourceSnapshot, DataSourceState};
use crate::synchronizer::{ListSynchronizer, RefreshMode, RefreshOutcome};
use crate::{emit, DataSourceError, Result};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::watch;
use core_async::time::Duration;
use core_runtime::config::{self, ClientConfig};
use core_runtime::events::{DataSourceEvent, EventBus};
use core_runtime::logging::strip_path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Tuning for one coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceConfig {
    pub poll_interval: Duration,
    pub auto_retry_enabled: bool,
    pub auto_retry_max_attempts: u32,
    pub page_size: u32,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            poll_interval: config::DEFAULT_POLL_INTERVAL,
            auto_retry_enabled: true,
            auto_retry_max_attempts: config::DEFAULT_AUTO_RETRY_MAX_ATTEMPTS,
            page_size: config::DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<&ClientConfig> for DataSourceConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.polling.interval,
            auto_retry_enabled: config.auto_retry.enabled,
            auto_retry_max_attempts: config.auto_retry.max_attempts,
            page_size: config.list.page_size,
        }
    }
}

pub struct DataSourceCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn DataSourceApi>,
    state: Arc<DataSourceState>,
    synchronizer: ListSynchronizer,
    poller: Arc<Poller>,
    auto_retry: AutoRetryCoordinator,
    events: EventBus,
    clock: Arc<dyn Clock>,
    shutdown: AtomicBool,
    weak_self: Weak<Inner>,
}

impl DataSourceCoordinator {
    pub fn new(
        api: Arc<dyn DataSourceApi>,
        config: DataSourceConfig,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = Arc::new(DataSourceState::new(
            ListQuery::new(config.page_size),
            config.auto_retry_enabled,
        ));

        let inner = Arc::new_cyclic(|weak_self| Inner {
            synchronizer: ListSynchronizer::new(Arc::clone(&api), Arc::clone(&state), events.clone()),
            poller: Arc::new(Poller::new(
                config.poll_interval,
                Arc::clone(&state),
                events.clone(),
            )),
            auto_retry: AutoRetryCoordinator::new(
                config.auto_retry_enabled,
                config.auto_retry_max_attempts,
                events.clone(),
            ),
            api,
            state,
            events,
            clock,
            shutdown: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        });

        Self { inner }
    }

    /// Coordinator talking to the REST backend described by `config`.
    pub fn from_client_config(config: &ClientConfig, events: EventBus) -> core_runtime::Result<Self> {
        let api = HttpDataSourceApi::from_config(config)?;
        Ok(Self::new(
            Arc::new(api),
            DataSourceConfig::from(config),
            events,
            Arc::clone(&config.clock),
        ))
    }

    /// Coordinator with the system clock.
    pub fn with_api(api: Arc<dyn DataSourceApi>, config: DataSourceConfig, events: EventBus) -> Self {
        Self::new(api, config, events, Arc::new(SystemClock))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> DataSourceSnapshot {
        self.inner.state.snapshot()
    }

    /// Snapshot stream; a new value is published after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<DataSourceSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn items(&self) -> Vec<JobRecord> {
        self.inner.state.read(|s| s.store.records())
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.state.read(|s| s.store.get(id).cloned())
    }

    pub fn loading(&self) -> bool {
        self.inner.state.read(|s| s.loading)
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read(|s| s.error.clone())
    }

    pub fn pagination(&self) -> Pagination {
        self.inner.state.read(|s| s.pagination)
    }

    pub fn query(&self) -> ListQuery {
        self.inner.state.read(|s| s.query.clone())
    }

    pub fn has_data(&self) -> bool {
        self.inner.state.read(|s| !s.store.is_empty())
    }

    /// Pending plus analyzing.
    pub fn processing_count(&self) -> usize {
        self.inner.state.read(|s| s.store.in_flight_count())
    }

    pub fn completed_count(&self) -> usize {
        self.count_by_status(JobStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count_by_status(JobStatus::Failed)
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.inner.state.read(|s| s.store.count_by_status(status))
    }

    pub fn failed_ids(&self) -> Vec<JobId> {
        self.inner.state.read(|s| s.store.ids_by_status(JobStatus::Failed))
    }

    // ------------------------------------------------------------------
    // List
    // ------------------------------------------------------------------

    /// Fetches the current page.
    ///
    /// Without `force`, a call made while a refresh is running returns
    /// [`RefreshOutcome::Coalesced`] at once. With `force` it waits for the
    /// running refresh and fetches again.
    #[instrument(skip(self))]
    pub async fn fetch_data_source_list(&self, force: bool) -> RefreshOutcome {
        let outcome = self
            .inner
            .synchronizer
            .refresh(RefreshMode::from_force(force))
            .await;
        self.inner.after_refresh(&outcome);
        outcome
    }

    pub async fn refresh_data(&self) -> RefreshOutcome {
        self.fetch_data_source_list(true).await
    }

    /// Edits the held query right away, then queues a refresh with it.
    ///
    /// A refresh already in flight keeps the query it was issued with.
    async fn update_query(&self, edit: impl FnOnce(&mut ListQuery)) -> RefreshOutcome {
        self.inner.state.mutate(|s| edit(&mut s.query));
        self.fetch_data_source_list(true).await
    }

    /// Merges `filters` into the current ones and goes back to page 1.
    pub async fn set_filters(&self, filters: DataSourceFilter) -> RefreshOutcome {
        self.update_query(|query| {
            query.filters.merge(filters);
            query.page = 1;
        })
        .await
    }

    pub async fn clear_filters(&self) -> RefreshOutcome {
        self.update_query(|query| {
            query.filters = DataSourceFilter::default();
            query.page = 1;
        })
        .await
    }

    pub async fn set_sort(&self, sort: SortConfig) -> RefreshOutcome {
        self.update_query(|query| query.sort = sort).await
    }

    pub async fn set_pagination(&self, page: u32, page_size: Option<u32>) -> Result<RefreshOutcome> {
        if page == 0 {
            return Err(DataSourceError::InvalidRequest(
                "page numbers start at 1".to_string(),
            ));
        }
        if let Some(size) = page_size {
            if size == 0 || size > config::MAX_PAGE_SIZE {
                return Err(DataSourceError::InvalidRequest(format!(
                    "page size must be between 1 and {}, got {}",
                    config::MAX_PAGE_SIZE,
                    size
                )));
            }
        }

        let outcome = self
            .update_query(|query| {
                query.page = page;
                if let Some(size) = page_size {
                    query.page_size = size;
                }
            })
            .await;
        Ok(outcome)
    }

    /// Reads one file from the backend without touching the store.
    pub async fn get_data_source_detail(&self, id: &JobId) -> Result<JobRecord> {
        self.inner.api.get(id).await
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    #[instrument(skip(self, file), fields(file_name = %strip_path(&file.file_name)))]
    pub async fn upload_file(&self, file: UploadFile, options: UploadOptions) -> Result<UploadReceipt> {
        let file_size = file.bytes.len() as u64;
        let receipt = self.inner.api.upload(file, options).await?;

        let record = self
            .inner
            .pending_upload(&receipt.id, &receipt.file_name, file_size);
        self.inner.insert_uploads(vec![record], 0);

        self.fetch_data_source_list(true).await;
        Ok(receipt)
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<BatchUploadReport> {
        let sizes: Vec<(String, u64)> = files
            .iter()
            .map(|f| (f.file_name.clone(), f.bytes.len() as u64))
            .collect();
        let report = self.inner.api.upload_batch(files, options).await?;

        let records = report
            .successful
            .iter()
            .map(|receipt| {
                let size = sizes
                    .iter()
                    .find(|(name, _)| *name == receipt.file_name)
                    .map_or(0, |(_, size)| *size);
                self.inner.pending_upload(&receipt.id, &receipt.file_name, size)
            })
            .collect();
        self.inner.insert_uploads(records, report.failed_count);

        for failed in &report.failed {
            warn!(file_name = %strip_path(&failed.file_name), reason = %failed.reason, "Upload rejected");
        }

        self.fetch_data_source_list(true).await;
        Ok(report)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn delete_data_source(&self, id: &JobId) -> Result<()> {
        self.inner.api.delete(id).await?;

        self.inner.state.mutate(|s| {
            if s.store.remove(id).is_some() {
                s.pagination.decrement_total(1);
            }
        });
        self.inner.auto_retry.reset(id);

        info!("Deleted data source");
        emit(
            &self.inner.events,
            DataSourceEvent::JobsRemoved {
                job_ids: vec![id.to_string()],
            },
        );
        Ok(())
    }

    /// Deletes several files. Ids the backend reports as failed stay.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn batch_delete_data_source(&self, ids: &[JobId]) -> Result<BatchDeleteReport> {
        if ids.is_empty() {
            return Err(DataSourceError::InvalidRequest(
                "no files selected for deletion".to_string(),
            ));
        }

        let report = self.inner.api.delete_batch(ids).await?;

        self.inner.state.mutate(|s| {
            s.store.remove_many(&report.deleted);
            s.pagination.decrement_total(report.deleted.len());
        });
        self.inner.auto_retry.reset_many(&report.deleted);

        for failed in &report.failed {
            warn!(job_id = %failed.id, reason = %failed.reason, "Delete rejected");
        }
        info!(deleted = report.deleted.len(), failed = report.failed.len(), "Batch delete finished");
        emit(
            &self.inner.events,
            DataSourceEvent::JobsRemoved {
                job_ids: report.deleted.iter().map(ToString::to_string).collect(),
            },
        );
        Ok(report)
    }

    /// Manual retry of one failed job. Resets its auto-retry budget.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry_analysis(&self, id: &JobId) -> Result<()> {
        self.inner.auto_retry.reset(id);
        self.inner.submit_retry(id).await?;
        self.fetch_data_source_list(true).await;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn batch_analyze(&self, ids: &[JobId]) -> Result<()> {
        if ids.is_empty() {
            return Err(DataSourceError::InvalidRequest(
                "no files selected for analysis".to_string(),
            ));
        }

        self.inner.api.process_batch(ids).await?;
        self.inner.auto_retry.reset_many(ids);
        self.inner.mark_pending(ids);

        self.fetch_data_source_list(true).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Polling and auto-retry
    // ------------------------------------------------------------------

    /// Starts polling if any job is in flight. Returns `true` when a new
    /// polling run started.
    pub fn start_polling(&self) -> bool {
        self.inner.start_polling()
    }

    pub fn stop_polling(&self) -> bool {
        self.inner.poller.stop()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_polling()
    }

    /// Retries every failed job once, one after the other, then resumes
    /// polling.
    pub async fn auto_retry_failed_files(&self) -> AutoRetryOutcome {
        self.inner.auto_retry_failed().await
    }

    pub fn auto_retry_enabled(&self) -> bool {
        self.inner.auto_retry.is_enabled()
    }

    /// Toggles auto-retry. Takes effect at the next settle.
    pub fn set_auto_retry_enabled(&self, enabled: bool) {
        self.inner.auto_retry.set_enabled(enabled);
        self.inner.state.mutate(|s| s.auto_retry_enabled = enabled);
        debug!(enabled, "Auto-retry toggled");
    }

    /// Automatic attempts made so far for `id`.
    pub fn auto_retry_attempts(&self, id: &JobId) -> u32 {
        self.inner.auto_retry.attempts(id)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stops polling and auto-retry for good. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.poller.stop();
        self.inner.auto_retry.cancel();
        info!("Data source coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl Drop for DataSourceCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn poll_target(&self) -> Weak<dyn PollTarget> {
        self.weak_self.clone()
    }

    fn start_polling(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }
        if self.state.read(|s| s.store.in_flight_count()) == 0 {
            debug!("Nothing in flight, not polling");
            return false;
        }
        self.poller.start(self.poll_target())
    }

    /// Completed and evicted jobs get their auto-retry budget back.
    fn note_refresh(&self, outcome: &RefreshOutcome) {
        if let RefreshOutcome::Applied(summary) = outcome {
            self.auto_retry
                .reset_many(summary.entered(JobStatus::Completed));
            self.auto_retry.reset_many(&summary.evicted);
        }
    }

    /// Polls while jobs are in flight; otherwise hands failed jobs to
    /// auto-retry.
    fn after_refresh(&self, outcome: &RefreshOutcome) {
        self.note_refresh(outcome);
        if matches!(outcome, RefreshOutcome::Coalesced) || self.is_shut_down() {
            return;
        }

        let (in_flight, failed) = self.state.read(|s| {
            (
                s.store.in_flight_count(),
                s.store.count_by_status(JobStatus::Failed),
            )
        });

        if in_flight > 0 {
            self.start_polling();
            return;
        }

        if failed > 0
            && self.auto_retry.is_enabled()
            && !self.auto_retry.is_running()
            && !self.poller.is_polling()
        {
            debug!(failed, "Settled on fetch, handing off to auto-retry");
            let weak = self.weak_self.clone();
            core_async::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_settled().await;
                }
            });
        }
    }

    async fn auto_retry_failed(&self) -> AutoRetryOutcome {
        let failed = self.state.read(|s| s.store.ids_by_status(JobStatus::Failed));
        let outcome = self.auto_retry.run(failed, self).await;
        if matches!(outcome, AutoRetryOutcome::Completed(_)) {
            self.start_polling();
        }
        outcome
    }

    async fn submit_retry(&self, id: &JobId) -> Result<()> {
        self.api.reprocess(id).await?;
        self.mark_pending(std::slice::from_ref(id));
        Ok(())
    }

    /// Optimistic Pending; clears error messages.
    fn mark_pending(&self, ids: &[JobId]) {
        let changes: Vec<StatusChange> = self.state.mutate(|s| {
            ids.iter()
                .filter_map(|id| s.store.set_status(id, JobStatus::Pending, StatusPatch::default()))
                .collect()
        });
        for change in changes {
            self.emit_optimistic(change);
        }
    }

    fn pending_upload(&self, id: &JobId, file_name: &str, file_size: u64) -> JobRecord {
        JobRecord::new(
            id.clone(),
            JobStatus::Pending,
            FileMetadata {
                file_name: file_name.to_string(),
                original_file_name: Some(file_name.to_string()),
                file_size,
                uploaded_at: Some(self.clock.now()),
                ..FileMetadata::default()
            },
        )
    }

    fn insert_uploads(&self, records: Vec<JobRecord>, failed: usize) {
        let job_ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let changes: Vec<StatusChange> = self.state.mutate(|s| {
            records
                .into_iter()
                .map(|record| s.store.insert_optimistic(record))
                .collect()
        });

        for change in changes {
            self.emit_optimistic(change);
        }
        info!(uploaded = job_ids.len(), failed, "Upload accepted");
        emit(&self.events, DataSourceEvent::UploadCompleted { job_ids, failed });
    }

    fn emit_optimistic(&self, change: StatusChange) {
        emit(
            &self.events,
            DataSourceEvent::JobStatusChanged {
                job_id: change.job_id.to_string(),
                from: change.from.map(|s| s.as_str().to_string()),
                to: change.to.as_str().to_string(),
                optimistic: true,
            },
        );
    }
}

#[async_trait]
impl PollTarget for Inner {
    async fn poll_tick(&self) -> PollDecision {
        let outcome = self.synchronizer.refresh(RefreshMode::Coalesce).await;
        self.note_refresh(&outcome);

        // Re-read after the await; the store may have moved on.
        let in_flight = self.state.read(|s| s.store.in_flight_count());
        debug!(in_flight, "Poll tick");
        if in_flight > 0 {
            PollDecision::Continue
        } else {
            PollDecision::Settled
        }
    }

    async fn on_settled(&self) {
        if self.is_shut_down() {
            return;
        }
        self.auto_retry_failed().await;
    }
}

#[async_trait]
impl RetryExecutor for Inner {
    async fn retry_job(&self, id: &JobId) -> Result<()> {
        self.submit_retry(id).await
    }
}
