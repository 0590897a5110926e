//! End-to-end behaviour of the coordinator against a scripted backend.
//!
//! Time is paused in every test; the runtime advances the clock whenever all
//! tasks are idle, so poll intervals and slow responses run instantly.

use async_trait::async_trait;
use core_datasource::{
    AutoRetryOutcome, BatchDeleteReport, BatchUploadReport, DataSourceApi, DataSourceConfig,
    DataSourceCoordinator, DataSourceError, DataSourceFilter, FileMetadata, JobId, JobRecord, JobStatus, ListPage,
    ListQuery, Pagination, RefreshOutcome, Result, UploadFile, UploadOptions, UploadReceipt,
};
use core_runtime::events::{CoreEvent, DataSourceEvent, EventBus, Receiver};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted backend
// ============================================================================

/// In-memory backend. A list call snapshots the table when it is issued and
/// answers after the next scripted delay, so a slow call returns the data
/// as it was when it started.
#[derive(Default)]
struct FakeBackend {
    records: Mutex<Vec<JobRecord>>,
    list_delays: Mutex<VecDeque<Duration>>,
    queries: Mutex<Vec<ListQuery>>,
    reprocess_delay: Mutex<Option<Duration>>,
    /// Status a reprocessed job moves to; `Pending` unless set
    reprocess_result: Mutex<Option<JobStatus>>,
    reject_reprocess: Mutex<HashSet<JobId>>,
    reprocessed: Mutex<Vec<JobId>>,
    list_calls: AtomicUsize,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
}

impl FakeBackend {
    fn with_records(records: Vec<JobRecord>) -> Arc<Self> {
        let backend = Arc::new(Self::default());
        backend.set_records(records);
        backend
    }

    fn set_records(&self, records: Vec<JobRecord>) {
        *self.records.lock().unwrap() = records;
    }

    fn set_status(&self, id: u64, status: JobStatus) {
        let mut records = self.records.lock().unwrap();
        for record in records.iter_mut() {
            if record.id() == &JobId::from(id) {
                *record = job(id, status);
            }
        }
    }

    fn delay_next_list(&self, delay: Duration) {
        self.list_delays.lock().unwrap().push_back(delay);
    }

    fn delay_reprocess(&self, delay: Duration) {
        *self.reprocess_delay.lock().unwrap() = Some(delay);
    }

    fn queries(&self) -> Vec<ListQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn reprocessed(&self) -> Vec<JobId> {
        self.reprocessed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSourceApi for FakeBackend {
    async fn list(&self, query: &ListQuery) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lists_in_flight.fetch_max(now, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        let records = self.records.lock().unwrap().clone();
        let delay = self.list_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        let total = records.len() as u64;
        Ok(ListPage {
            records,
            pagination: Pagination::new(query.page, query.page_size, total),
            skipped: 0,
        })
    }

    async fn get(&self, id: &JobId) -> Result<JobRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| DataSourceError::NotFound(id.to_string()))
    }

    async fn upload(&self, file: UploadFile, _options: UploadOptions) -> Result<UploadReceipt> {
        let mut records = self.records.lock().unwrap();
        let id = JobId::from(100 + records.len() as u64);
        records.insert(
            0,
            JobRecord::new(id.clone(), JobStatus::Pending, FileMetadata::named(&file.file_name)),
        );
        Ok(UploadReceipt {
            id,
            file_name: file.file_name,
            message: None,
        })
    }

    async fn upload_batch(
        &self,
        _files: Vec<UploadFile>,
        _options: UploadOptions,
    ) -> Result<BatchUploadReport> {
        Ok(BatchUploadReport::default())
    }

    async fn delete(&self, id: &JobId) -> Result<()> {
        self.records.lock().unwrap().retain(|r| r.id() != id);
        Ok(())
    }

    async fn delete_batch(&self, ids: &[JobId]) -> Result<BatchDeleteReport> {
        self.records.lock().unwrap().retain(|r| !ids.contains(r.id()));
        Ok(BatchDeleteReport {
            deleted: ids.to_vec(),
            failed: Vec::new(),
        })
    }

    async fn reprocess(&self, id: &JobId) -> Result<()> {
        tokio::task::yield_now().await;
        let delay = *self.reprocess_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reprocessed.lock().unwrap().push(id.clone());
        if self.reject_reprocess.lock().unwrap().contains(id) {
            return Err(DataSourceError::Backend {
                status: 500,
                message: "pipeline unavailable".to_string(),
            });
        }

        let status = self
            .reprocess_result
            .lock()
            .unwrap()
            .unwrap_or(JobStatus::Pending);
        let mut records = self.records.lock().unwrap();
        for record in records.iter_mut().filter(|r| r.id() == id) {
            *record = if status == JobStatus::Failed {
                JobRecord::new(id.clone(), status, record.metadata().clone())
                    .with_error_message("still unreadable")
            } else {
                JobRecord::new(id.clone(), status, record.metadata().clone())
            };
        }
        Ok(())
    }

    async fn process_batch(&self, ids: &[JobId]) -> Result<()> {
        for id in ids {
            self.reprocess(id).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn job(id: u64, status: JobStatus) -> JobRecord {
    let record = JobRecord::new(id, status, FileMetadata::named(format!("call-{id}.wav")));
    if status == JobStatus::Failed {
        record.with_error_message("bad format")
    } else {
        record
    }
}

fn coordinator(backend: &Arc<FakeBackend>, auto_retry: bool) -> DataSourceCoordinator {
    DataSourceCoordinator::with_api(
        Arc::clone(backend) as Arc<dyn DataSourceApi>,
        DataSourceConfig {
            poll_interval: Duration::from_secs(5),
            auto_retry_enabled: auto_retry,
            auto_retry_max_attempts: 2,
            page_size: 20,
        },
        EventBus::new(256),
    )
}

fn status_of(coordinator: &DataSourceCoordinator, id: u64) -> Option<JobStatus> {
    coordinator.get(&JobId::from(id)).map(|r| r.status())
}

async fn wait_for(
    rx: &mut Receiver<CoreEvent>,
    predicate: impl Fn(&DataSourceEvent) -> bool,
) -> DataSourceEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(CoreEvent::DataSource(event)) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(error) => panic!("event stream failed: {error}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(300), wait)
        .await
        .expect("timed out waiting for event")
}

fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<DataSourceEvent> {
    let mut events = Vec::new();
    while let Ok(CoreEvent::DataSource(event)) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ============================================================================
// End-to-end flows
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_poller_stops_once_nothing_in_flight() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Analyzing)]);
    let coordinator = coordinator(&backend, true);

    coordinator.fetch_data_source_list(false).await;
    assert!(coordinator.is_polling());

    backend.set_status(1, JobStatus::Completed);
    sleep_secs(6).await;

    assert_eq!(status_of(&coordinator, 1), Some(JobStatus::Completed));
    assert!(!coordinator.is_polling());

    let calls = backend.list_calls();
    sleep_secs(60).await;
    assert_eq!(backend.list_calls(), calls, "no ticks after settling");
}

#[tokio::test(start_paused = true)]
async fn test_auto_retry_resubmits_failed_job_and_restarts_polling() {
    let backend = FakeBackend::with_records(vec![job(2, JobStatus::Failed)]);
    let coordinator = coordinator(&backend, false);
    coordinator.fetch_data_source_list(false).await;
    assert_eq!(
        coordinator.get(&JobId::from(2u64)).unwrap().error_message(),
        Some("bad format")
    );

    coordinator.set_auto_retry_enabled(true);
    let outcome = coordinator.auto_retry_failed_files().await;

    let AutoRetryOutcome::Completed(report) = outcome else {
        panic!("expected a completed batch");
    };
    assert_eq!(report.succeeded(), 1);
    assert_eq!(backend.reprocessed(), vec![JobId::from(2u64)]);

    let record = coordinator.get(&JobId::from(2u64)).unwrap();
    assert_eq!(record.status(), JobStatus::Pending);
    assert_eq!(record.error_message(), None);
    assert!(coordinator.is_polling());

    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_batch_delete_removes_exactly_requested_ids() {
    let backend = FakeBackend::with_records(vec![
        job(3, JobStatus::Completed),
        job(4, JobStatus::Completed),
        job(5, JobStatus::Completed),
    ]);
    let coordinator = coordinator(&backend, false);
    coordinator.fetch_data_source_list(false).await;
    assert_eq!(coordinator.pagination().total, 3);

    coordinator
        .batch_delete_data_source(&[JobId::from(3u64), JobId::from(4u64)])
        .await
        .unwrap();

    let ids: Vec<JobId> = coordinator.items().iter().map(|r| r.id().clone()).collect();
    assert_eq!(ids, vec![JobId::from(5u64)]);
    assert_eq!(coordinator.pagination().total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_refresh_never_overwrites_later_one() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Analyzing)]);
    let coordinator = Arc::new(coordinator(&backend, false));

    backend.delay_next_list(Duration::from_secs(3));
    let slow = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_data_source_list(false).await })
    };
    tokio::task::yield_now().await;
    assert!(coordinator.loading());

    backend.set_status(1, JobStatus::Completed);
    let fast = coordinator.fetch_data_source_list(true).await;
    let slow = slow.await.unwrap();

    assert!(slow.is_applied());
    assert!(fast.is_applied());
    assert_eq!(status_of(&coordinator, 1), Some(JobStatus::Completed));
    assert_eq!(backend.max_lists_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(backend.list_calls(), 2);

    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unforced_fetch_coalesces_into_running_refresh() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Completed)]);
    let coordinator = Arc::new(coordinator(&backend, false));

    backend.delay_next_list(Duration::from_secs(3));
    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_data_source_list(false).await })
    };
    tokio::task::yield_now().await;

    let second = coordinator.fetch_data_source_list(false).await;

    assert_eq!(second, RefreshOutcome::Coalesced);
    assert!(first.await.unwrap().is_applied());
    assert_eq!(backend.list_calls(), 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identical_refreshes_are_idempotent() {
    let backend = FakeBackend::with_records(vec![
        job(1, JobStatus::Completed),
        job(2, JobStatus::Failed),
        job(3, JobStatus::Completed),
    ]);
    let coordinator = coordinator(&backend, false);

    coordinator.fetch_data_source_list(false).await;
    let once = coordinator.snapshot();
    coordinator.fetch_data_source_list(false).await;
    let twice = coordinator.snapshot();

    assert_eq!(once.items, twice.items);
    assert_eq!(once.pagination, twice.pagination);
    assert_eq!(once.failed_count, twice.failed_count);
    assert_eq!(once.completed_count, twice.completed_count);
    assert_eq!(once.error, twice.error);
}

#[tokio::test(start_paused = true)]
async fn test_settle_triggers_exactly_one_retry_batch() {
    let backend = FakeBackend::with_records(vec![
        job(1, JobStatus::Analyzing),
        job(2, JobStatus::Failed),
        job(3, JobStatus::Failed),
    ]);
    let coordinator = coordinator(&backend, true);
    let mut rx = coordinator.events().subscribe();

    coordinator.fetch_data_source_list(false).await;
    assert!(backend.reprocessed().is_empty(), "no retry while jobs are in flight");

    backend.set_status(1, JobStatus::Completed);
    wait_for(&mut rx, |e| matches!(e, DataSourceEvent::AutoRetryCompleted { .. })).await;

    assert_eq!(backend.reprocessed(), vec![JobId::from(2u64), JobId::from(3u64)]);
    assert!(coordinator.is_polling());

    // Reprocessed jobs finish; polling settles without another batch.
    backend.set_status(2, JobStatus::Completed);
    backend.set_status(3, JobStatus::Completed);
    sleep_secs(30).await;

    let started = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DataSourceEvent::AutoRetryStarted { .. }))
        .count();
    assert_eq!(started, 0, "only the first settle starts a batch");
    assert_eq!(backend.reprocessed().len(), 2);
    assert!(!coordinator.is_polling());
    assert_eq!(coordinator.completed_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_with_only_failed_jobs_hands_off_to_auto_retry() {
    let backend = FakeBackend::with_records(vec![job(7, JobStatus::Failed)]);
    let coordinator = coordinator(&backend, true);
    let mut rx = coordinator.events().subscribe();

    coordinator.fetch_data_source_list(false).await;
    coordinator.fetch_data_source_list(false).await;

    wait_for(&mut rx, |e| matches!(e, DataSourceEvent::AutoRetryCompleted { .. })).await;
    tokio::task::yield_now().await;

    assert_eq!(backend.reprocessed(), vec![JobId::from(7u64)]);
    assert_eq!(status_of(&coordinator, 7), Some(JobStatus::Pending));
    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_permanently_failing_job_stops_at_attempt_cap() {
    let backend = FakeBackend::with_records(vec![job(9, JobStatus::Failed)]);
    *backend.reprocess_result.lock().unwrap() = Some(JobStatus::Failed);
    let coordinator = coordinator(&backend, true);
    let mut rx = coordinator.events().subscribe();

    coordinator.fetch_data_source_list(false).await;
    let exhausted = wait_for(&mut rx, |e| matches!(e, DataSourceEvent::RetryExhausted { .. })).await;
    sleep_secs(120).await;

    assert_eq!(
        exhausted,
        DataSourceEvent::RetryExhausted {
            job_id: "9".to_string(),
            attempts: 2
        }
    );
    assert_eq!(backend.reprocessed().len(), 2);
    assert_eq!(coordinator.auto_retry_attempts(&JobId::from(9u64)), 2);
    assert_eq!(status_of(&coordinator, 9), Some(JobStatus::Failed));
    assert!(!coordinator.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_resets_attempt_budget() {
    let backend = FakeBackend::with_records(vec![job(9, JobStatus::Failed)]);
    *backend.reprocess_result.lock().unwrap() = Some(JobStatus::Failed);
    let coordinator = coordinator(&backend, true);
    let mut rx = coordinator.events().subscribe();

    coordinator.fetch_data_source_list(false).await;
    wait_for(&mut rx, |e| matches!(e, DataSourceEvent::RetryExhausted { .. })).await;
    sleep_secs(30).await;
    assert_eq!(coordinator.auto_retry_attempts(&JobId::from(9u64)), 2);

    coordinator.retry_analysis(&JobId::from(9u64)).await.unwrap();
    assert_eq!(backend.reprocessed().len(), 3);

    // The forced refresh after the manual retry reports Failed again, which
    // hands the job back to auto-retry with a fresh budget.
    wait_for(&mut rx, |e| matches!(e, DataSourceEvent::RetryExhausted { .. })).await;
    assert_eq!(backend.reprocessed().len(), 5);
    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_partial_retry_failure_keeps_going() {
    let backend = FakeBackend::with_records(vec![
        job(1, JobStatus::Failed),
        job(2, JobStatus::Failed),
        job(3, JobStatus::Failed),
    ]);
    backend
        .reject_reprocess
        .lock()
        .unwrap()
        .insert(JobId::from(2u64));
    let coordinator = coordinator(&backend, false);
    coordinator.fetch_data_source_list(false).await;

    coordinator.set_auto_retry_enabled(true);
    let AutoRetryOutcome::Completed(report) = coordinator.auto_retry_failed_files().await else {
        panic!("expected a completed batch");
    };

    assert_eq!(backend.reprocessed().len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert!(report.results[1].result.is_err());
    assert_eq!(status_of(&coordinator, 1), Some(JobStatus::Pending));
    assert_eq!(status_of(&coordinator, 2), Some(JobStatus::Failed));
    assert_eq!(status_of(&coordinator, 3), Some(JobStatus::Pending));
    coordinator.shutdown();
}

// ============================================================================
// Optimistic writes vs. stale responses
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deleted_job_not_resurrected_by_inflight_refresh() {
    let backend = FakeBackend::with_records(vec![
        job(3, JobStatus::Completed),
        job(4, JobStatus::Completed),
    ]);
    let coordinator = Arc::new(coordinator(&backend, false));
    coordinator.fetch_data_source_list(false).await;

    backend.delay_next_list(Duration::from_secs(3));
    let stale = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_data_source_list(true).await })
    };
    tokio::task::yield_now().await;

    coordinator.delete_data_source(&JobId::from(3u64)).await.unwrap();
    stale.await.unwrap();

    assert_eq!(status_of(&coordinator, 3), None);
    assert_eq!(status_of(&coordinator, 4), Some(JobStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_retry_survives_inflight_refresh() {
    let backend = FakeBackend::with_records(vec![job(2, JobStatus::Failed)]);
    let coordinator = Arc::new(coordinator(&backend, false));
    coordinator.fetch_data_source_list(false).await;

    backend.delay_next_list(Duration::from_secs(3));
    let stale = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_data_source_list(true).await })
    };
    tokio::task::yield_now().await;

    coordinator.set_auto_retry_enabled(true);
    coordinator.auto_retry_failed_files().await;
    stale.await.unwrap();

    let record = coordinator.get(&JobId::from(2u64)).unwrap();
    assert_eq!(record.status(), JobStatus::Pending);
    assert_eq!(record.error_message(), None);
    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_upload_tracks_new_job_until_completed() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Completed)]);
    let coordinator = coordinator(&backend, false);
    coordinator.fetch_data_source_list(false).await;

    let receipt = coordinator
        .upload_file(
            UploadFile::new("new-call.wav", "audio/wav", vec![0u8; 32]),
            UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(coordinator.items()[0].id(), &receipt.id);
    assert_eq!(coordinator.processing_count(), 1);
    assert!(coordinator.is_polling());

    {
        let mut records = backend.records.lock().unwrap();
        records[0] = JobRecord::new(
            receipt.id.clone(),
            JobStatus::Completed,
            FileMetadata::named("new-call.wav"),
        );
    }
    sleep_secs(6).await;

    assert_eq!(coordinator.get(&receipt.id).unwrap().status(), JobStatus::Completed);
    assert!(!coordinator.is_polling());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling_for_good() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Pending)]);
    let coordinator = coordinator(&backend, true);

    coordinator.fetch_data_source_list(false).await;
    assert!(coordinator.is_polling());

    coordinator.shutdown();
    coordinator.shutdown();
    let calls = backend.list_calls();
    sleep_secs(60).await;

    assert_eq!(backend.list_calls(), calls);
    assert!(!coordinator.start_polling());
    assert!(coordinator.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_running_retry_batch() {
    let backend = FakeBackend::with_records(vec![
        job(1, JobStatus::Failed),
        job(2, JobStatus::Failed),
        job(3, JobStatus::Failed),
    ]);
    backend.delay_reprocess(Duration::from_secs(2));
    let coordinator = coordinator(&backend, true);

    // Settles with only failed jobs: the handoff starts a batch in the
    // background and its first call is still out when teardown happens.
    coordinator.fetch_data_source_list(false).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    coordinator.shutdown();
    drop(coordinator);

    sleep_secs(60).await;

    assert_eq!(backend.reprocessed(), vec![JobId::from(1u64)]);
}

#[tokio::test(start_paused = true)]
async fn test_query_updates_queued_behind_refresh_all_apply() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Completed)]);
    let coordinator = Arc::new(coordinator(&backend, false));

    backend.delay_next_list(Duration::from_secs(10));
    let slow = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.fetch_data_source_list(true).await }
    });
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }

    let by_keyword = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator
                .set_filters(DataSourceFilter {
                    keyword: Some("refund".to_string()),
                    ..DataSourceFilter::default()
                })
                .await
        }
    });
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }

    coordinator
        .set_filters(DataSourceFilter {
            status: Some(JobStatus::Failed),
            ..DataSourceFilter::default()
        })
        .await;
    by_keyword.await.unwrap();
    slow.await.unwrap();

    let filters = coordinator.query().filters;
    assert_eq!(filters.keyword.as_deref(), Some("refund"));
    assert_eq!(filters.status, Some(JobStatus::Failed));

    let queries = backend.queries();
    assert_eq!(queries.len(), 3);
    // The slow refresh went out with the query it was issued for.
    assert!(queries[0].filters.is_empty());
    assert_eq!(queries[2].filters, filters);
    assert_eq!(backend.max_lists_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_coordinator_cancels_timer() {
    let backend = FakeBackend::with_records(vec![job(1, JobStatus::Analyzing)]);
    let coordinator = coordinator(&backend, true);
    coordinator.fetch_data_source_list(false).await;
    let calls = backend.list_calls();

    drop(coordinator);
    sleep_secs(60).await;

    assert_eq!(backend.list_calls(), calls);
}
