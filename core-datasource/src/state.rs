//! Shared data-source state.
//!
//! [`DataSourceState`] owns the [`JobRecordStore`] together with the list
//! query and UI flags. Mutations run inside a short synchronous critical
//! section that is never held across an `.await`; each one publishes a fresh
//! [`DataSourceSnapshot`] on a watch channel for observers.

use crate::api::{ListQuery, Pagination};
use crate::job::{JobRecord, JobStatus};
use crate::record_store::{JobRecordStore, Revision};
use core_async::sync::watch;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Read-only view handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataSourceSnapshot {
    pub items: Vec<JobRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub pagination: Pagination,
    pub query: ListQuery,
    /// Pending plus analyzing
    pub processing_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub auto_retry_enabled: bool,
    pub polling: bool,
    pub revision: Revision,
}

impl DataSourceSnapshot {
    pub fn has_data(&self) -> bool {
        !self.items.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct StateInner {
    pub store: JobRecordStore,
    pub loading: bool,
    pub error: Option<String>,
    pub pagination: Pagination,
    pub query: ListQuery,
    pub auto_retry_enabled: bool,
    pub polling: bool,
}

impl StateInner {
    fn snapshot(&self) -> DataSourceSnapshot {
        DataSourceSnapshot {
            items: self.store.records(),
            loading: self.loading,
            error: self.error.clone(),
            pagination: self.pagination,
            query: self.query.clone(),
            processing_count: self.store.in_flight_count(),
            completed_count: self.store.count_by_status(JobStatus::Completed),
            failed_count: self.store.count_by_status(JobStatus::Failed),
            auto_retry_enabled: self.auto_retry_enabled,
            polling: self.polling,
            revision: self.store.revision(),
        }
    }
}

pub struct DataSourceState {
    inner: Mutex<StateInner>,
    tx: watch::Sender<DataSourceSnapshot>,
}

impl DataSourceState {
    pub fn new(query: ListQuery, auto_retry_enabled: bool) -> Self {
        let inner = StateInner {
            store: JobRecordStore::new(),
            loading: false,
            error: None,
            pagination: Pagination::new(query.page, query.page_size, 0),
            query,
            auto_retry_enabled,
            polling: false,
        };
        let (tx, _rx) = watch::channel(inner.snapshot());

        Self {
            inner: Mutex::new(inner),
            tx,
        }
    }

    /// Runs `f` against the current state without publishing.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&StateInner) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` and publishes the resulting snapshot.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut StateInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut guard);
        self.tx.send_replace(guard.snapshot());
        result
    }

    pub fn snapshot(&self) -> DataSourceSnapshot {
        self.read(StateInner::snapshot)
    }

    pub fn subscribe(&self) -> watch::Receiver<DataSourceSnapshot> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for DataSourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.read(|inner| {
            f.debug_struct("DataSourceState")
                .field("records", &inner.store.len())
                .field("loading", &inner.loading)
                .field("polling", &inner.polling)
                .finish()
        })
    }
}
