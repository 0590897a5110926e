//! List Synchronizer
//!
//! Fetches the current list page and reconciles it into the store.
//!
//! At most one list request is outstanding per store. A refresh that finds
//! another one running is either coalesced (returns at once and relies on
//! the running refresh) or queued behind it, see [`RefreshMode`]. Responses
//! are therefore applied in request order and a slow early response can never
//! overwrite a later one.
//!
//! A failed refresh keeps the existing records and records the error on the
//! state; it never clears the table.

use crate::api::{DataSourceApi, ListQuery};
use crate::emit;
use crate::record_store::ReconcileSummary;
use crate::state::DataSourceState;
use core_async::sync::Mutex;
use core_runtime::events::{DataSourceEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Skip when a refresh is already running.
    Coalesce,
    /// Wait for the running refresh, then fetch again.
    Queue,
}

impl RefreshMode {
    /// `force` queues, otherwise coalesce.
    pub fn from_force(force: bool) -> Self {
        if force {
            RefreshMode::Queue
        } else {
            RefreshMode::Coalesce
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(ReconcileSummary),
    /// Another refresh was running; nothing was fetched.
    Coalesced,
    /// The fetch failed; the message was stored as the state error.
    Failed(String),
}

impl RefreshOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RefreshOutcome::Applied(_))
    }
}

pub struct ListSynchronizer {
    api: Arc<dyn DataSourceApi>,
    state: Arc<DataSourceState>,
    events: EventBus,
    gate: Mutex<()>,
}

impl ListSynchronizer {
    pub fn new(api: Arc<dyn DataSourceApi>, state: Arc<DataSourceState>, events: EventBus) -> Self {
        Self {
            api,
            state,
            events,
            gate: Mutex::new(()),
        }
    }

    /// Refreshes with the query currently held by the state.
    pub async fn refresh(&self, mode: RefreshMode) -> RefreshOutcome {
        self.refresh_inner(None, mode).await
    }

    /// Replaces the held query, then refreshes with it.
    ///
    /// The query is swapped once the gate is held so a running refresh
    /// finishes with the query it was issued for.
    pub async fn refresh_with(&self, query: ListQuery, mode: RefreshMode) -> RefreshOutcome {
        self.refresh_inner(Some(query), mode).await
    }

    /// Whether a list request is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    #[instrument(skip(self, query))]
    async fn refresh_inner(&self, query: Option<ListQuery>, mode: RefreshMode) -> RefreshOutcome {
        let _permit = match mode {
            RefreshMode::Coalesce => match self.gate.try_lock() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Refresh already in flight, coalescing");
                    return RefreshOutcome::Coalesced;
                }
            },
            RefreshMode::Queue => self.gate.lock().await,
        };

        let (query, issued_at) = self.state.mutate(|inner| {
            if let Some(query) = query {
                inner.query = query;
            }
            inner.loading = true;
            (inner.query.clone(), inner.store.revision())
        });

        let result = self.api.list(&query).await;

        // State may have changed while the request was out; everything below
        // works from the store as it is now.
        match result {
            Ok(page) => {
                let (summary, in_flight) = self.state.mutate(|inner| {
                    let summary = inner.store.reconcile_page(page.records, issued_at);
                    inner.pagination = page.pagination;
                    inner.loading = false;
                    inner.error = None;
                    (summary, inner.store.in_flight_count())
                });

                debug!(
                    inserted = summary.inserted,
                    updated = summary.updated,
                    evicted = summary.evicted.len(),
                    kept_optimistic = summary.kept_optimistic,
                    skipped = page.skipped,
                    in_flight,
                    "Applied list page"
                );

                for change in &summary.status_changes {
                    emit(
                        &self.events,
                        DataSourceEvent::JobStatusChanged {
                            job_id: change.job_id.to_string(),
                            from: change.from.map(|s| s.as_str().to_string()),
                            to: change.to.as_str().to_string(),
                            optimistic: false,
                        },
                    );
                }
                emit(
                    &self.events,
                    DataSourceEvent::ListRefreshed {
                        page: page.pagination.page,
                        total: page.pagination.total,
                        inserted: summary.inserted,
                        updated: summary.updated,
                        evicted: summary.evicted.len(),
                        in_flight,
                    },
                );

                RefreshOutcome::Applied(summary)
            }
            Err(error) => {
                let message = error.to_string();
                warn!(error = %message, "List refresh failed, keeping existing records");

                self.state.mutate(|inner| {
                    inner.loading = false;
                    inner.error = Some(message.clone());
                });
                emit(
                    &self.events,
                    DataSourceEvent::RefreshFailed {
                        message: message.clone(),
                    },
                );

                RefreshOutcome::Failed(message)
            }
        }
    }
}
