//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`ClientConfig`] and the host-provided
//! bridges into the shared core. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) so a missing
//! HTTP client falls back to the reqwest implementation; other hosts inject
//! their own through [`ClientConfigBuilder::http_client`].
//!
//! [`ClientConfigBuilder::http_client`]: core_runtime::config::ClientConfigBuilder::http_client

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{http::HttpClient, time::Clock};
use core_datasource::{DataSourceApi, DataSourceConfig, DataSourceCoordinator};
use core_runtime::{
    config::ClientConfig,
    events::{CoreEvent, EventBus, EventStream},
};
use tracing::info;

/// Bridge handles resolved from the config.
#[derive(Clone)]
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Uses the injected HTTP client, or the platform default when one exists.
    pub fn resolve(config: &ClientConfig) -> Result<Self> {
        let http_client = match &config.http_client {
            Some(client) => Arc::clone(client),
            None => default_http_client(config)?,
        };

        Ok(Self {
            http_client,
            clock: Arc::clone(&config.clock),
        })
    }
}

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
fn default_http_client(config: &ClientConfig) -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_timeout(config.timeouts.default)
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    Ok(Arc::new(client))
}

#[cfg(not(all(feature = "desktop-shims", not(target_arch = "wasm32"))))]
fn default_http_client(config: &ClientConfig) -> Result<Arc<dyn HttpClient>> {
    Ok(config.require_http_client()?)
}

struct ServiceInner {
    config: ClientConfig,
    events: EventBus,
    data_sources: Arc<DataSourceCoordinator>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.data_sources.shutdown();
    }
}

/// Primary façade exposed to host applications.
///
/// Cheap to clone; the data source coordinator is shut down once the last
/// clone is dropped, even if the host still holds the coordinator handle.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

impl CoreService {
    /// Builds the service against the REST backend in `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let deps = CoreDependencies::resolve(&config)?;

        let mut resolved = config;
        resolved.http_client = Some(deps.http_client);
        let events = EventBus::new(resolved.event_buffer_size);
        let data_sources = DataSourceCoordinator::from_client_config(&resolved, events.clone())?;

        info!(api_base_url = %resolved.api_base_url, "Core service initialized");
        Ok(Self::assemble(resolved, events, data_sources))
    }

    /// Builds the service around an existing backend implementation.
    pub fn with_api(config: ClientConfig, api: Arc<dyn DataSourceApi>) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let data_sources = DataSourceCoordinator::new(
            api,
            DataSourceConfig::from(&config),
            events.clone(),
            Arc::clone(&config.clock),
        );
        Self::assemble(config, events, data_sources)
    }

    fn assemble(config: ClientConfig, events: EventBus, data_sources: DataSourceCoordinator) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                events,
                data_sources: Arc::new(data_sources),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn data_sources(&self) -> Arc<DataSourceCoordinator> {
        Arc::clone(&self.inner.data_sources)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Publishes a host event on the shared bus.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.inner.events.emit(event);
    }

    /// Stops background polling. Idempotent.
    pub fn shutdown(&self) {
        self.inner.data_sources.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{error::Result as BridgeResult, HttpRequest, HttpResponse};
    use core_datasource::DataSourceError;
    use core_runtime::events::DataSourceEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct EmptyBackend {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for EmptyBackend {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let body = serde_json::json!({
                "items": [],
                "total": 0,
                "page": 1,
                "page_size": 20,
                "total_pages": 0
            });
            Ok(HttpResponse::new(200, body.to_string()))
        }
    }

    fn config(http: Arc<EmptyBackend>) -> ClientConfig {
        ClientConfig::builder()
            .api_base_url("http://localhost:8000/api/v1")
            .http_client(http)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_uses_injected_http_client() {
        let http = Arc::new(EmptyBackend::default());
        let service = CoreService::new(config(Arc::clone(&http))).unwrap();
        let mut events = service.events().subscribe();

        let outcome = service.data_sources().fetch_data_source_list(false).await;

        assert!(outcome.is_applied());
        assert_eq!(http.requests.load(Ordering::SeqCst), 1);
        assert!(!service.data_sources().has_data());
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::DataSource(DataSourceEvent::ListRefreshed { total: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_clones_share_coordinator() {
        let service = CoreService::new(config(Arc::new(EmptyBackend::default()))).unwrap();
        let other = service.clone();

        assert!(Arc::ptr_eq(&service.data_sources(), &other.data_sources()));
        assert_eq!(other.config().api_base_url, "http://localhost:8000/api/v1");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let service = CoreService::new(config(Arc::new(EmptyBackend::default()))).unwrap();
        service.shutdown();
        service.shutdown();
        assert!(service.data_sources().is_shut_down());
    }

    #[tokio::test]
    async fn test_dropping_last_clone_shuts_down() {
        let service = CoreService::new(config(Arc::new(EmptyBackend::default()))).unwrap();
        let other = service.clone();
        let data_sources = service.data_sources();

        drop(service);
        assert!(!data_sources.is_shut_down());

        drop(other);
        assert!(data_sources.is_shut_down());
        assert!(!data_sources.start_polling());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_is_capability_error() {
        let config = ClientConfig::builder()
            .api_base_url("http://localhost:8000/api/v1")
            .build()
            .unwrap();

        let err = CoreService::new(config).err().unwrap();
        assert!(matches!(
            err,
            CoreError::Runtime(core_runtime::Error::CapabilityMissing { .. })
        ));
    }

    #[test]
    fn test_error_conversions() {
        let err: CoreError = DataSourceError::NotFound("7".to_string()).into();
        assert!(matches!(err, CoreError::DataSource(_)));

        let err: CoreError = core_runtime::Error::Config("bad".to_string()).into();
        assert_eq!(err.to_string(), core_runtime::Error::Config("bad".to_string()).to_string());
    }
}
