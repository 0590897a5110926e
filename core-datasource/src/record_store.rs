//! # Job Record Store
//!
//! In-memory table of tracked jobs, keyed by id, in display order.
//!
//! ## Overview
//!
//! The store is the client's belief about backend state. Two kinds of writes
//! reach it:
//!
//! - **Authoritative** writes come from list responses
//!   ([`reconcile_page`](JobRecordStore::reconcile_page),
//!   [`upsert_many`](JobRecordStore::upsert_many)) and replace whole records.
//! - **Optimistic** writes come from local mutations
//!   ([`set_status`](JobRecordStore::set_status),
//!   [`insert_optimistic`](JobRecordStore::insert_optimistic)) and are tagged
//!   with the store revision at which they were made.
//!
//! Every mutation bumps a monotonically increasing [`Revision`]. A list
//! request remembers the revision at which it was issued; when its response
//! arrives, local writes made *after* that revision are newer than the
//! response and survive it:
//!
//! - an optimistic record patched after the request was issued is kept whole
//! - an id deleted after the request was issued is not brought back
//!
//! Anything older is overwritten unconditionally. Fields are never merged
//! across the two sources.
//!
//! Derived counts are recomputed on every call.

use crate::job::{JobId, JobRecord, JobStatus, StatusPatch};
use std::collections::{HashMap, HashSet};

/// Store mutation counter.
pub type Revision = u64;

/// A status transition observed while applying a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub job_id: JobId,
    /// `None` when the job was not tracked before
    pub from: Option<JobStatus>,
    pub to: JobStatus,
}

/// What an authoritative write did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Ids dropped because the page no longer lists them
    pub evicted: Vec<JobId>,
    /// Records left alone because a local patch is newer than the response
    pub kept_optimistic: usize,
    /// Records in the response that were deleted locally after it was requested
    pub dropped_deleted: usize,
    pub status_changes: Vec<StatusChange>,
}

impl ReconcileSummary {
    /// Jobs that moved into `status` during this write.
    pub fn entered(&self, status: JobStatus) -> impl Iterator<Item = &JobId> {
        self.status_changes
            .iter()
            .filter(move |change| change.to == status)
            .map(|change| &change.job_id)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: JobRecord,
    /// Revision of the last optimistic write, cleared by authoritative ones
    optimistic_at: Option<Revision>,
}

#[derive(Debug, Default)]
pub struct JobRecordStore {
    order: Vec<JobId>,
    entries: HashMap<JobId, Entry>,
    /// Locally deleted ids and the revision of their deletion
    tombstones: HashMap<JobId, Revision>,
    revision: Revision,
}

impl JobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }

    /// Current revision. Capture it when issuing a list request.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Merges an authoritative batch: replace on match, append new ids.
    ///
    /// Unlike [`reconcile_page`](Self::reconcile_page) nothing is evicted and
    /// the batch is treated as current, so it overrides optimistic patches
    /// and local deletions alike. Within one batch the last record per id
    /// wins.
    pub fn upsert_many(&mut self, records: impl IntoIterator<Item = JobRecord>) -> ReconcileSummary {
        self.bump();
        let mut summary = ReconcileSummary::default();

        for record in records {
            let id = record.id().clone();
            self.tombstones.remove(&id);
            let previous = self.entries.insert(
                id.clone(),
                Entry {
                    record: record.clone(),
                    optimistic_at: None,
                },
            );
            match previous {
                Some(previous) => {
                    Self::count_replacement(&mut summary, &previous.record, &record);
                }
                None => {
                    self.order.push(id.clone());
                    summary.inserted += 1;
                    summary.status_changes.push(StatusChange {
                        job_id: id,
                        from: None,
                        to: record.status(),
                    });
                }
            }
        }

        summary
    }

    /// Applies one list page fetched by a request issued at `issued_at`.
    ///
    /// The page replaces the visible set: ids it does not list are evicted,
    /// listed ids are replaced whole, new ids take the backend's order.
    /// Local writes newer than `issued_at` survive (see module docs);
    /// optimistic records missing from the page stay at the front.
    pub fn reconcile_page(&mut self, records: Vec<JobRecord>, issued_at: Revision) -> ReconcileSummary {
        self.bump();
        let mut summary = ReconcileSummary::default();

        let mut previous = std::mem::take(&mut self.entries);
        let previous_order = std::mem::take(&mut self.order);
        let is_newer = |entry: &Entry| entry.optimistic_at.is_some_and(|rev| rev > issued_at);

        let mut page_order = Vec::with_capacity(records.len());
        for record in dedupe_latest(records) {
            let id = record.id().clone();

            if self.tombstones.get(&id).is_some_and(|&rev| rev > issued_at) {
                summary.dropped_deleted += 1;
                continue;
            }

            let entry = match previous.remove(&id) {
                Some(entry) if is_newer(&entry) => {
                    summary.kept_optimistic += 1;
                    entry
                }
                Some(entry) => {
                    Self::count_replacement(&mut summary, &entry.record, &record);
                    Entry {
                        record,
                        optimistic_at: None,
                    }
                }
                None => {
                    summary.inserted += 1;
                    summary.status_changes.push(StatusChange {
                        job_id: id.clone(),
                        from: None,
                        to: record.status(),
                    });
                    Entry {
                        record,
                        optimistic_at: None,
                    }
                }
            };

            page_order.push(id.clone());
            self.entries.insert(id, entry);
        }

        let mut kept_front = Vec::new();
        for id in previous_order {
            let Some(entry) = previous.remove(&id) else {
                continue;
            };
            if is_newer(&entry) {
                summary.kept_optimistic += 1;
                kept_front.push(id.clone());
                self.entries.insert(id, entry);
            } else {
                summary.evicted.push(id);
            }
        }

        kept_front.extend(page_order);
        self.order = kept_front;

        // A response issued after a deletion is authoritative for that id.
        self.tombstones.retain(|_, rev| *rev > issued_at);

        summary
    }

    /// Inserts or replaces a locally created record (e.g. a fresh upload)
    /// at the front of the table.
    pub fn insert_optimistic(&mut self, record: JobRecord) -> StatusChange {
        let revision = self.bump();
        let id = record.id().clone();
        let to = record.status();
        self.tombstones.remove(&id);

        let from = match self.entries.insert(
            id.clone(),
            Entry {
                record,
                optimistic_at: Some(revision),
            },
        ) {
            Some(previous) => Some(previous.record.status()),
            None => {
                self.order.insert(0, id.clone());
                None
            }
        };

        StatusChange {
            job_id: id,
            from,
            to,
        }
    }

    /// Optimistic transition of a tracked job. Returns `None` for unknown ids.
    pub fn set_status(
        &mut self,
        id: &JobId,
        status: JobStatus,
        patch: StatusPatch,
    ) -> Option<StatusChange> {
        if !self.entries.contains_key(id) {
            return None;
        }
        let revision = self.bump();
        let entry = self.entries.get_mut(id)?;
        let from = entry.record.status();
        entry.record.transition(status, patch);
        entry.optimistic_at = Some(revision);

        Some(StatusChange {
            job_id: id.clone(),
            from: Some(from),
            to: status,
        })
    }

    /// Removes one job and tombstones its id.
    pub fn remove(&mut self, id: &JobId) -> Option<JobRecord> {
        let revision = self.bump();
        self.tombstones.insert(id.clone(), revision);
        let entry = self.entries.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(entry.record)
    }

    /// Removes every listed job and tombstones all ids, tracked or not.
    /// Returns the ids that were actually present.
    pub fn remove_many(&mut self, ids: &[JobId]) -> Vec<JobId> {
        let revision = self.bump();
        let mut removed = HashSet::new();

        for id in ids {
            self.tombstones.insert(id.clone(), revision);
            if self.entries.remove(id).is_some() {
                removed.insert(id.clone());
            }
        }

        self.order.retain(|existing| !removed.contains(existing));
        ids.iter()
            .filter(|id| removed.contains(*id))
            .cloned()
            .collect()
    }

    /// Drops every record. Pending tombstones are dropped too; revisions
    /// keep counting.
    pub fn clear(&mut self) {
        self.bump();
        self.order.clear();
        self.entries.clear();
        self.tombstones.clear();
    }

    fn count_replacement(summary: &mut ReconcileSummary, old: &JobRecord, new: &JobRecord) {
        if old == new {
            summary.unchanged += 1;
        } else {
            summary.updated += 1;
        }
        if old.status() != new.status() {
            summary.status_changes.push(StatusChange {
                job_id: new.id().clone(),
                from: Some(old.status()),
                to: new.status(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Derived queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: &JobId) -> Option<&JobRecord> {
        self.entries.get(id).map(|entry| &entry.record)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether the record carries a local patch not yet confirmed by a list
    /// response.
    pub fn is_optimistic(&self, id: &JobId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.optimistic_at.is_some())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| &entry.record))
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.iter().cloned().collect()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.iter().filter(|record| record.status() == status).count()
    }

    pub fn ids_by_status(&self, status: JobStatus) -> Vec<JobId> {
        self.iter()
            .filter(|record| record.status() == status)
            .map(|record| record.id().clone())
            .collect()
    }

    /// Pending plus analyzing.
    pub fn in_flight_count(&self) -> usize {
        self.iter()
            .filter(|record| record.status().is_in_flight())
            .count()
    }
}

/// Keeps the last record per id, at the position of its first occurrence.
fn dedupe_latest(records: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut index: HashMap<JobId, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<JobRecord> = Vec::with_capacity(records.len());

    for record in records {
        match index.get(record.id()) {
            Some(&position) => unique[position] = record,
            None => {
                index.insert(record.id().clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}
