//! # Data Source Core
//!
//! Client-side tracking of uploaded feedback files while the backend analyzes
//! them.
//!
//! ## Overview
//!
//! The backend owns the truth about every file's analysis status; this crate
//! keeps a local belief of it and converges that belief on every list
//! refresh:
//!
//! - [`JobRecordStore`]: in-memory table of tracked jobs with optimistic
//!   patches and deletion tombstones
//! - [`ListSynchronizer`]: one-at-a-time list refreshes reconciled into the
//!   store
//! - [`Poller`]: cancellable timer that refreshes while jobs are in flight
//! - [`AutoRetryCoordinator`]: sequential retry of failed jobs once polling
//!   settles, with a per-job attempt cap
//! - [`DataSourceCoordinator`]: the façade UI code talks to
//!
//! ## Usage
//!
//! ```ignore
//! use core_datasource::{DataSourceCoordinator, JobId};
//!
//! let coordinator = DataSourceCoordinator::from_client_config(&config, events)?;
//! coordinator.fetch_data_source_list(false).await;
//!
//! for record in coordinator.items() {
//!     println!("{} {}", record.file_name(), record.status());
//! }
//!
//! coordinator.retry_analysis(&JobId::from(42u64)).await?;
//! ```

pub mod api;
pub mod auto_retry;
pub mod coordinator;
pub mod error;
pub mod http_api;
pub mod job;
pub mod poller;
pub mod record_store;
pub mod state;
pub mod synchronizer;
mod types;

pub use api::{
    BatchDeleteReport, BatchUploadReport, DataSourceApi, DataSourceFilter, FailedDelete,
    FailedUpload, ListPage, ListQuery, Pagination, SortConfig, SortOrder, UploadFile,
    UploadOptions, UploadReceipt,
};
pub use auto_retry::{
    AutoRetryCoordinator, AutoRetryOutcome, RetryBatchReport, RetryExecutor, RetryItemResult,
};
pub use coordinator::{DataSourceConfig, DataSourceCoordinator};
pub use error::{DataSourceError, Result};
pub use http_api::HttpDataSourceApi;
pub use job::{AnalysisResult, FileMetadata, JobId, JobRecord, JobStatus, Sentiment, StatusPatch};
pub use poller::{PollDecision, PollTarget, Poller};
pub use record_store::{JobRecordStore, ReconcileSummary, Revision, StatusChange};
pub use state::{DataSourceSnapshot, DataSourceState};
pub use synchronizer::{ListSynchronizer, RefreshMode, RefreshOutcome};

use core_runtime::events::{CoreEvent, DataSourceEvent, EventBus};

/// Publishes on the bus. Having no subscriber is not an error.
pub(crate) fn emit(events: &EventBus, event: DataSourceEvent) {
    let _ = events.emit(CoreEvent::DataSource(event));
}
