//! Backend wire types and their mapping into the client model.

use crate::api::{
    BatchDeleteReport, BatchUploadReport, FailedDelete, FailedUpload, ListPage, Pagination,
    UploadReceipt,
};
use crate::job::{AnalysisResult, FileMetadata, JobId, JobRecord, JobStatus, Sentiment};
use crate::{DataSourceError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Ids arrive as integers from the current backend and as strings from
/// older ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Int(i64),
    Text(String),
}

impl From<WireId> for JobId {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Int(id) => JobId::new(id.to_string()),
            WireId::Text(id) => JobId::new(id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileListResponse {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireAnalysisResult {
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub feedback_category: Option<String>,
    #[serde(default)]
    pub feedback_summary: Option<String>,
    #[serde(default)]
    pub product_names: Option<Vec<String>>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFileRecord {
    pub id: WireId,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<WireId>,
    #[serde(default)]
    pub uploader_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub analysis_result: Option<WireAnalysisResult>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl WireFileRecord {
    pub fn into_record(self) -> Result<JobRecord> {
        let status: JobStatus = self.status.parse()?;
        let id = JobId::from(self.id);

        let file_name = self
            .filename
            .clone()
            .or_else(|| self.original_filename.clone())
            .unwrap_or_default();

        let metadata = FileMetadata {
            file_name,
            original_file_name: self.original_filename,
            file_type: self.file_format,
            file_size: self.file_size.unwrap_or(0),
            uploaded_at: self.created_at.as_deref().and_then(parse_timestamp),
            updated_at: self.updated_at.as_deref().and_then(parse_timestamp),
            uploader: self.uploaded_by.map(|id| JobId::from(id).to_string()),
            uploader_name: self.uploader_name,
            duration_secs: self.duration,
        };

        let mut record = JobRecord::new(id, status, metadata);
        if let Some(progress) = self.progress.filter(|p| p.is_finite()) {
            record = record.with_progress(progress.clamp(0.0, 100.0).round() as u8);
        }
        if let Some(message) = self.error_message {
            record = record.with_error_message(message);
        }
        if let Some(result) = self.analysis_result {
            record = record.with_analysis_result(result.into_result());
        }

        Ok(record)
    }
}

impl WireAnalysisResult {
    fn into_result(self) -> AnalysisResult {
        AnalysisResult {
            sentiment: self
                .sentiment
                .as_deref()
                .and_then(|s| s.parse::<Sentiment>().ok()),
            feedback_category: self.feedback_category,
            feedback_summary: self.feedback_summary,
            product_names: self.product_names.unwrap_or_default(),
            transcript: self.transcript,
        }
    }
}

/// Decodes one record. Used for `GET /files/{id}`.
pub(crate) fn decode_record(value: Value) -> Result<JobRecord> {
    serde_json::from_value::<WireFileRecord>(value)
        .map_err(|e| DataSourceError::Decode(e.to_string()))?
        .into_record()
}

/// Decodes a list page item by item. Items that fail to decode are skipped.
pub(crate) fn decode_list(response: FileListResponse, requested_page: u32, requested_size: u32) -> ListPage {
    let mut records = Vec::with_capacity(response.items.len());
    let mut skipped = 0;

    for item in response.items {
        match decode_record(item) {
            Ok(record) => records.push(record),
            Err(error) => {
                skipped += 1;
                warn!(error = %error, "Skipping undecodable file record");
            }
        }
    }

    let page = response.page.unwrap_or(requested_page);
    let size = response.page_size.unwrap_or(requested_size);
    let mut pagination = Pagination::new(page, size, response.total);
    if let Some(pages) = response.total_pages {
        pagination.pages = pages;
    }

    ListPage {
        records,
        pagination,
        skipped,
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Mutations
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    pub file_id: WireId,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadResponse {
    pub fn into_receipt(self, fallback_name: &str) -> UploadReceipt {
        UploadReceipt {
            id: self.file_id.into(),
            file_name: self.filename.unwrap_or_else(|| fallback_name.to_string()),
            message: self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFailedUpload {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchUploadResponse {
    #[serde(default)]
    pub successful_uploads: Vec<UploadResponse>,
    #[serde(default)]
    pub failed_uploads: Vec<WireFailedUpload>,
    #[serde(default)]
    pub total_files: Option<usize>,
    #[serde(default)]
    pub successful_count: Option<usize>,
    #[serde(default)]
    pub failed_count: Option<usize>,
}

impl BatchUploadResponse {
    pub fn into_report(self) -> BatchUploadReport {
        let successful: Vec<UploadReceipt> = self
            .successful_uploads
            .into_iter()
            .map(|upload| upload.into_receipt(""))
            .collect();
        let failed: Vec<FailedUpload> = self
            .failed_uploads
            .into_iter()
            .map(|f| FailedUpload {
                file_name: f.filename,
                reason: f.reason,
            })
            .collect();

        BatchUploadReport {
            total: self.total_files.unwrap_or(successful.len() + failed.len()),
            successful_count: self.successful_count.unwrap_or(successful.len()),
            failed_count: self.failed_count.unwrap_or(failed.len()),
            successful,
            failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct IdsRequest {
    pub ids: Vec<Value>,
}

impl IdsRequest {
    /// Numeric ids go out as JSON numbers, anything else as strings.
    pub fn new(ids: &[JobId]) -> Self {
        Self {
            ids: ids
                .iter()
                .map(|id| match id.as_str().parse::<i64>() {
                    Ok(n) => Value::from(n),
                    Err(_) => Value::from(id.as_str()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFailedDelete {
    pub id: WireId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BatchDeleteResponse {
    #[serde(default)]
    pub successful_deletes: Option<Vec<WireId>>,
    #[serde(default)]
    pub failed_deletes: Vec<WireFailedDelete>,
}

impl BatchDeleteResponse {
    /// Without `successful_deletes`, every requested id not reported as
    /// failed counts as deleted.
    pub fn into_report(self, requested: &[JobId]) -> BatchDeleteReport {
        let failed: Vec<FailedDelete> = self
            .failed_deletes
            .into_iter()
            .map(|f| FailedDelete {
                id: f.id.into(),
                reason: f.reason,
            })
            .collect();

        let deleted = match self.successful_deletes {
            Some(ids) => ids.into_iter().map(JobId::from).collect(),
            None => requested
                .iter()
                .filter(|id| !failed.iter().any(|f| &f.id == *id))
                .cloned()
                .collect(),
        };

        BatchDeleteReport { deleted, failed }
    }
}

/// Human-readable message from an error body.
///
/// Understands `{"detail": "..."}`, validation lists
/// `{"detail": [{"msg": "..."}]}` and `{"message": "..."}`.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    let message = match value.get("detail") {
        Some(Value::String(detail)) => Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    };

    message
        .or_else(|| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
}
