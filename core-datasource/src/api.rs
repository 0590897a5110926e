//! Data-source backend contract.
//!
//! [`DataSourceApi`] is the seam between the reconciliation core and the REST
//! backend. The production implementation is
//! [`HttpDataSourceApi`](crate::http_api::HttpDataSourceApi); tests use the
//! generated `MockDataSourceApi` or a scripted fake.

use crate::job::{JobId, JobRecord, JobStatus};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSourceApi: Send + Sync {
    /// One page of tracked files.
    async fn list(&self, query: &ListQuery) -> Result<ListPage>;

    /// A single file by id.
    async fn get(&self, id: &JobId) -> Result<JobRecord>;

    async fn upload(&self, file: UploadFile, options: UploadOptions) -> Result<UploadReceipt>;

    async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<BatchUploadReport>;

    async fn delete(&self, id: &JobId) -> Result<()>;

    async fn delete_batch(&self, ids: &[JobId]) -> Result<BatchDeleteReport>;

    /// Sends a failed file back to the analysis pipeline. The backend only
    /// acknowledges; the status change shows up on a later list.
    async fn reprocess(&self, id: &JobId) -> Result<()>;

    async fn process_batch(&self, ids: &[JobId]) -> Result<()>;
}

// ============================================================================
// Query
// ============================================================================

/// Filters applied to the list endpoint. Empty values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceFilter {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub status: Option<JobStatus>,
    pub uploader: Option<String>,
    pub keyword: Option<String>,
    /// Inclusive upload date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl DataSourceFilter {
    /// Overlays the fields set in `other`.
    pub fn merge(&mut self, other: DataSourceFilter) {
        if other.file_name.is_some() {
            self.file_name = other.file_name;
        }
        if other.file_type.is_some() {
            self.file_type = other.file_type;
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.uploader.is_some() {
            self.uploader = other.uploader;
        }
        if other.keyword.is_some() {
            self.keyword = other.keyword;
        }
        if other.date_range.is_some() {
            self.date_range = other.date_range;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == DataSourceFilter::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub field: String,
    pub order: SortOrder,
}

impl SortConfig {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self::new("uploadTime", SortOrder::Desc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// 1-based
    pub page: u32,
    pub page_size: u32,
    pub filters: DataSourceFilter,
    pub sort: SortConfig,
}

impl ListQuery {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            filters: DataSourceFilter::default(),
            sort: SortConfig::default(),
        }
    }

    /// Query-string pairs in the backend's naming.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.max(1).to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];

        let mut push = |key: &str, value: Option<&str>| {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                pairs.push((key.to_string(), value.to_string()));
            }
        };

        let filters = &self.filters;
        push("fileName", filters.file_name.as_deref());
        push("fileType", filters.file_type.as_deref());
        push("status", filters.status.as_ref().map(JobStatus::as_str));
        push("uploader", filters.uploader.as_deref());
        push("keyword", filters.keyword.as_deref());

        if let Some((start, end)) = filters.date_range {
            pairs.push(("startDate".to_string(), start.format("%Y-%m-%d").to_string()));
            pairs.push(("endDate".to_string(), end.format("%Y-%m-%d").to_string()));
        }

        if !self.sort.field.trim().is_empty() {
            pairs.push(("sort_by".to_string(), self.sort.field.clone()));
            pairs.push(("sort_order".to_string(), self.sort.order.as_str().to_string()));
        }

        pairs
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(core_runtime::config::DEFAULT_PAGE_SIZE)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub pages: u32,
}

impl Pagination {
    pub fn new(page: u32, size: u32, total: u64) -> Self {
        Self {
            page,
            size,
            total,
            pages: Self::page_count(total, size),
        }
    }

    fn page_count(total: u64, size: u32) -> u32 {
        if size == 0 {
            return 0;
        }
        u32::try_from(total.div_ceil(u64::from(size))).unwrap_or(u32::MAX)
    }

    /// Accounts for locally deleted items without waiting for a refresh.
    pub fn decrement_total(&mut self, by: usize) {
        self.total = self.total.saturating_sub(by as u64);
        self.pages = Self::page_count(self.total, self.size);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub records: Vec<JobRecord>,
    pub pagination: Pagination,
    /// Items dropped because they could not be decoded
    pub skipped: usize,
}

/// A file to upload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Start analysis right after upload
    pub auto_analyze: bool,
    pub notify_on_complete: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            auto_analyze: true,
            notify_on_complete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub id: JobId,
    pub file_name: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUploadReport {
    pub successful: Vec<UploadReceipt>,
    pub failed: Vec<FailedUpload>,
    pub total: usize,
    pub successful_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub id: JobId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteReport {
    pub deleted: Vec<JobId>,
    pub failed: Vec<FailedDelete>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_default_query_pairs() {
        let pairs = ListQuery::default().to_query_pairs();

        assert_eq!(value(&pairs, "page"), Some("1"));
        assert_eq!(value(&pairs, "page_size"), Some("20"));
        assert_eq!(value(&pairs, "sort_by"), Some("uploadTime"));
        assert_eq!(value(&pairs, "sort_order"), Some("desc"));
        assert_eq!(value(&pairs, "status"), None);
    }

    #[test]
    fn test_filters_map_to_backend_names() {
        let mut query = ListQuery::new(50);
        query.filters = DataSourceFilter {
            file_name: Some("call".to_string()),
            file_type: Some("  ".to_string()),
            status: Some(JobStatus::Failed),
            keyword: Some("refund".to_string()),
            date_range: Some((
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )),
            ..DataSourceFilter::default()
        };

        let pairs = query.to_query_pairs();
        assert_eq!(value(&pairs, "fileName"), Some("call"));
        assert_eq!(value(&pairs, "fileType"), None);
        assert_eq!(value(&pairs, "status"), Some("failed"));
        assert_eq!(value(&pairs, "keyword"), Some("refund"));
        assert_eq!(value(&pairs, "startDate"), Some("2024-01-01"));
        assert_eq!(value(&pairs, "endDate"), Some("2024-01-31"));
    }

    #[test]
    fn test_filter_merge_keeps_unset_fields() {
        let mut filters = DataSourceFilter {
            keyword: Some("refund".to_string()),
            ..DataSourceFilter::default()
        };
        filters.merge(DataSourceFilter {
            status: Some(JobStatus::Completed),
            ..DataSourceFilter::default()
        });

        assert_eq!(filters.keyword.as_deref(), Some("refund"));
        assert_eq!(filters.status, Some(JobStatus::Completed));
        assert!(!filters.is_empty());
    }

    #[test]
    fn test_pagination_decrement_saturates() {
        let mut pagination = Pagination::new(1, 20, 41);
        assert_eq!(pagination.pages, 3);

        pagination.decrement_total(2);
        assert_eq!(pagination.total, 39);
        assert_eq!(pagination.pages, 2);

        pagination.decrement_total(100);
        assert_eq!(pagination.total, 0);
        assert_eq!(pagination.pages, 0);
    }

    #[test]
    fn test_upload_file_debug_hides_bytes() {
        let file = UploadFile::new("call.wav", "audio/wav", vec![0u8; 16]);
        let debug = format!("{:?}", file);
        assert!(debug.contains("len: 16"));
    }
}
