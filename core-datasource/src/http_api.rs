//! REST implementation of [`DataSourceApi`].
//!
//! Talks to the feedback backend's `/files` endpoints through the injected
//! [`HttpClient`]. List and detail reads go through
//! [`HttpClient::execute`] so the client's retry policy applies; mutations
//! are sent exactly once.

use crate::api::{
    BatchDeleteReport, BatchUploadReport, DataSourceApi, ListPage, ListQuery, UploadFile,
    UploadOptions, UploadReceipt,
};
use crate::job::{JobId, JobRecord};
use crate::types::{
    decode_list, decode_record, error_message, BatchDeleteResponse, BatchUploadResponse,
    FileListResponse, IdsRequest, UploadResponse,
};
use crate::{DataSourceError, Result};
use async_trait::async_trait;
use bridge_traits::http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm, RetryPolicy,
};
use core_runtime::config::{ClientConfig, RequestTimeouts};
use core_runtime::logging::strip_path;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct HttpDataSourceApi {
    http: Arc<dyn HttpClient>,
    base_url: String,
    auth_token: Option<String>,
    timeouts: RequestTimeouts,
}

impl HttpDataSourceApi {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            timeouts: RequestTimeouts::default(),
        }
    }

    /// Builds the API from a validated config.
    pub fn from_config(config: &ClientConfig) -> core_runtime::Result<Self> {
        let http = config.require_http_client()?;
        let mut api = Self::new(http, config.api_base_url.clone());
        api.auth_token = config.auth_token.clone();
        api.timeouts = config.timeouts;
        Ok(api)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn file_url(&self, id: &JobId, suffix: &str) -> String {
        self.url(&format!(
            "/files/{}{}",
            urlencoding::encode(id.as_str()),
            suffix
        ))
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        let request = HttpRequest::new(method, url)
            .header("Accept", "application/json")
            .timeout(self.timeouts.default);
        match &self.auth_token {
            Some(token) => request.bearer_token(token.clone()),
            None => request,
        }
    }

    fn json_request(&self, method: HttpMethod, url: String, body: &impl serde::Serialize) -> Result<HttpRequest> {
        self.request(method, url)
            .json(body)
            .map_err(|e| DataSourceError::InvalidRequest(e.to_string()))
    }

    async fn send(&self, request: HttpRequest, what: &str) -> Result<HttpResponse> {
        let response = self.http.execute(request).await?;
        check_status(response, what)
    }

    /// Mutations are not idempotent on the backend; never resend them.
    async fn send_once(&self, request: HttpRequest, what: &str) -> Result<HttpResponse> {
        let response = self
            .http
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await?;
        check_status(response, what)
    }

    fn upload_form(file: &UploadFile, field: &str, form: MultipartForm) -> MultipartForm {
        let content_type = Some(file.content_type.clone()).filter(|c| !c.trim().is_empty());
        form.file(field, file.file_name.clone(), content_type, file.bytes.clone())
    }

    fn option_fields(options: UploadOptions) -> MultipartForm {
        MultipartForm::new()
            .text("autoAnalyze", options.auto_analyze.to_string())
            .text("notifyOnComplete", options.notify_on_complete.to_string())
    }
}

fn check_status(response: HttpResponse, what: &str) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let message = error_message(&response.body)
        .or_else(|| response.text().ok().filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| format!("{} failed", what));

    warn!(status = response.status, operation = what, "Backend rejected request");

    Err(match response.status {
        401 => DataSourceError::Unauthorized(message),
        404 => DataSourceError::NotFound(message),
        status => DataSourceError::Backend { status, message },
    })
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| DataSourceError::Decode(e.to_string()))
}

#[async_trait]
impl DataSourceApi for HttpDataSourceApi {
    #[instrument(skip(self), fields(page = query.page, page_size = query.page_size))]
    async fn list(&self, query: &ListQuery) -> Result<ListPage> {
        let mut request = self.request(HttpMethod::Get, self.url("/files/"));
        for (key, value) in query.to_query_pairs() {
            request = request.query(key, value);
        }

        let response = self.send(request, "list files").await?;
        let body: FileListResponse = decode(&response)?;
        let page = decode_list(body, query.page, query.page_size);

        debug!(
            records = page.records.len(),
            skipped = page.skipped,
            total = page.pagination.total,
            "Fetched file list"
        );
        Ok(page)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get(&self, id: &JobId) -> Result<JobRecord> {
        let request = self.request(HttpMethod::Get, self.file_url(id, ""));
        let response = self.send(request, "get file").await?;
        decode_record(decode::<Value>(&response)?)
    }

    #[instrument(skip(self, file), fields(file_name = %strip_path(&file.file_name), size = file.bytes.len()))]
    async fn upload(&self, file: UploadFile, options: UploadOptions) -> Result<UploadReceipt> {
        let form = Self::upload_form(&file, "file", Self::option_fields(options));
        let request = self
            .request(HttpMethod::Post, self.url("/files/upload"))
            .multipart(form)
            .timeout(self.timeouts.upload);

        let response = self.send_once(request, "upload file").await?;
        let receipt = decode::<UploadResponse>(&response)?.into_receipt(&file.file_name);
        debug!(job_id = %receipt.id, "Upload accepted");
        Ok(receipt)
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<BatchUploadReport> {
        if files.is_empty() {
            return Err(DataSourceError::InvalidRequest(
                "batch upload needs at least one file".to_string(),
            ));
        }

        let form = files
            .iter()
            .fold(Self::option_fields(options), |form, file| {
                Self::upload_form(file, "files", form)
            });
        let request = self
            .request(HttpMethod::Post, self.url("/files/batch-upload"))
            .multipart(form)
            .timeout(self.timeouts.batch_upload);

        let response = self.send_once(request, "batch upload").await?;
        Ok(decode::<BatchUploadResponse>(&response)?.into_report())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn delete(&self, id: &JobId) -> Result<()> {
        let request = self.request(HttpMethod::Delete, self.file_url(id, ""));
        self.send_once(request, "delete file").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(count = ids.len()))]
    async fn delete_batch(&self, ids: &[JobId]) -> Result<BatchDeleteReport> {
        let request = self.json_request(
            HttpMethod::Delete,
            self.url("/files/batch"),
            &IdsRequest::new(ids),
        )?;
        let response = self.send_once(request, "batch delete").await?;

        // Older backends answer with an empty body.
        let body = if response.body.iter().all(u8::is_ascii_whitespace) {
            BatchDeleteResponse::default()
        } else {
            decode(&response)?
        };
        Ok(body.into_report(ids))
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn reprocess(&self, id: &JobId) -> Result<()> {
        let request = self.request(HttpMethod::Post, self.file_url(id, "/reprocess"));
        self.send_once(request, "reprocess file").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(count = ids.len()))]
    async fn process_batch(&self, ids: &[JobId]) -> Result<()> {
        let request = self.json_request(
            HttpMethod::Post,
            self.url("/files/batch/process"),
            &IdsRequest::new(ids),
        )?;
        self.send_once(request, "batch process").await?;
        Ok(())
    }
}
