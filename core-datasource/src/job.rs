//! # Job Records
//!
//! Client-side model of one uploaded file moving through the backend
//! analysis pipeline.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Analyzing → Completed
//!    ↑          ↓
//!    └──────── Failed   (client retry)
//! ```
//!
//! Pending and Analyzing are *in flight*: the backend will move them on its
//! own. Completed and Failed are terminal for the pipeline; Failed can be
//! sent back to Pending by a retry.
//!
//! `JobRecord` keeps its fields private so the status-dependent invariants
//! hold for every value in the store:
//! - `error_message` is only present while `Failed`
//! - `analysis_result` is only present while `Completed`
//! - `progress` never exceeds 100

use crate::{DataSourceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ID Types
// ============================================================================

/// Backend-assigned identifier of an uploaded file.
///
/// Opaque to the client. The backend uses integers today; ids are kept as
/// strings so the client never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Pipeline status of a job. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Uploaded or resubmitted, waiting for the pipeline
    Pending,
    /// Being analyzed
    #[serde(alias = "processing")]
    Analyzing,
    /// Analysis finished; a result is available
    Completed,
    /// Analysis failed; eligible for retry
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Analyzing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Pending or Analyzing: the backend is expected to change it.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Analyzing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// Only failed jobs can be sent back to the pipeline.
    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            // Older backends report "processing" for the analyzing stage.
            "analyzing" | "processing" => Ok(JobStatus::Analyzing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(DataSourceError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Analysis Result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl FromStr for Sentiment {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            _ => Err(DataSourceError::Decode(format!("unknown sentiment '{}'", s))),
        }
    }
}

/// Output of the analysis pipeline. Opaque to the state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: Option<Sentiment>,
    pub feedback_category: Option<String>,
    pub feedback_summary: Option<String>,
    pub product_names: Vec<String>,
    pub transcript: Option<String>,
}

// ============================================================================
// File Metadata
// ============================================================================

/// Descriptive file data. Never consulted for control decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub original_file_name: Option<String>,
    /// Format reported by the backend (`wav`, `mp3`, `txt`, ...)
    pub file_type: Option<String>,
    pub file_size: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Uploader account id
    pub uploader: Option<String>,
    pub uploader_name: Option<String>,
    pub duration_secs: Option<f64>,
}

impl FileMetadata {
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Job Record
// ============================================================================

/// Fields applied together with a status transition.
///
/// Fields that do not fit the target status are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub error_message: Option<String>,
    pub progress: Option<u8>,
    pub analysis_result: Option<AnalysisResult>,
}

impl StatusPatch {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn completed(result: AnalysisResult) -> Self {
        Self {
            analysis_result: Some(result),
            ..Self::default()
        }
    }
}

/// One tracked upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    id: JobId,
    status: JobStatus,
    error_message: Option<String>,
    progress: Option<u8>,
    analysis_result: Option<AnalysisResult>,
    metadata: FileMetadata,
}

impl JobRecord {
    pub fn new(id: impl Into<JobId>, status: JobStatus, metadata: FileMetadata) -> Self {
        Self {
            id: id.into(),
            status,
            error_message: None,
            progress: None,
            analysis_result: None,
            metadata,
        }
    }

    /// Kept only on failed records; blank messages are dropped.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if self.status == JobStatus::Failed && !message.trim().is_empty() {
            self.error_message = Some(message);
        }
        self
    }

    /// Advisory progress, clamped to 100.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// Kept only on completed records.
    pub fn with_analysis_result(mut self, result: AnalysisResult) -> Self {
        if self.status == JobStatus::Completed {
            self.analysis_result = Some(result);
        }
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn analysis_result(&self) -> Option<&AnalysisResult> {
        self.analysis_result.as_ref()
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn file_name(&self) -> &str {
        &self.metadata.file_name
    }

    /// Local transition. Replaces every status-dependent field.
    pub(crate) fn transition(&mut self, status: JobStatus, patch: StatusPatch) {
        self.status = status;
        self.progress = patch.progress.map(|p| p.min(100));
        self.error_message = patch
            .error_message
            .filter(|m| status == JobStatus::Failed && !m.trim().is_empty());
        self.analysis_result = patch
            .analysis_result
            .filter(|_| status == JobStatus::Completed);
    }
}
