//! Interceptor pipeline driving a unit of work's lifecycle.
//!
//! Hosts call [`Pipeline::before_dispatch`] when a request arrives (or
//! [`Pipeline::begin`] for console commands and queue messages),
//! [`Pipeline::on_error`] for errors the host handles, and
//! [`Pipeline::after_dispatch`] once the response is ready.

use crate::collector::SharedCollector;
use crate::exception::{CapturedError, ExceptionEnricher};
use crate::filters::PathFilter;
use crate::transport::{HttpTransport, Transport};
use crate::unit::UnitOfWork;
use crate::Result;
use apex_core::config::CollectorConfig;
use apex_core::http::{HttpRequest, HttpResponse};
use apex_core::work::WorkKind;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// One stage of the pipeline. Every hook has an empty default.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn before_dispatch(&self, _unit: &UnitOfWork, _request: Option<&HttpRequest>) {}

    fn on_error(&self, _unit: &UnitOfWork, _error: &CapturedError) {}

    async fn after_dispatch(
        &self,
        _unit: &UnitOfWork,
        _request: Option<&HttpRequest>,
        _response: Option<&HttpResponse>,
    ) {
    }
}

/// Ordered interceptor chain; after-dispatch hooks run in reverse order
pub struct Pipeline {
    config: Arc<CollectorConfig>,
    enricher: Arc<ExceptionEnricher>,
    stages: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config: Arc::new(config),
            enricher: Arc::new(ExceptionEnricher::new()),
            stages: Vec::new(),
        }
    }

    /// Pipeline with the collector stage posting over HTTPS
    pub fn collector(config: CollectorConfig) -> Result<Self> {
        let stage = CollectorStage::new(&config)?;
        Ok(Self::new(config).with_stage(stage))
    }

    pub fn with_enricher(mut self, enricher: ExceptionEnricher) -> Self {
        self.enricher = Arc::new(enricher);
        self
    }

    pub fn with_stage(mut self, stage: impl Interceptor + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Open a unit of work for an incoming HTTP request
    pub fn before_dispatch(&self, request: &HttpRequest) -> UnitOfWork {
        self.open(WorkKind::Http, Some(request))
    }

    /// Open a unit of work with no HTTP exchange (console command, queue message)
    pub fn begin(&self, kind: WorkKind) -> UnitOfWork {
        self.open(kind, None)
    }

    fn open(&self, kind: WorkKind, request: Option<&HttpRequest>) -> UnitOfWork {
        let unit = UnitOfWork::with_enricher(kind, self.config.clone(), self.enricher.clone());
        for stage in &self.stages {
            stage.before_dispatch(&unit, request);
        }
        unit
    }

    pub fn on_error(&self, unit: &UnitOfWork, error: &CapturedError) {
        for stage in &self.stages {
            stage.on_error(unit, error);
        }
    }

    pub async fn after_dispatch(
        &self,
        unit: &UnitOfWork,
        request: Option<&HttpRequest>,
        response: Option<&HttpResponse>,
    ) {
        unit.finish();
        for stage in self.stages.iter().rev() {
            stage.after_dispatch(unit, request, response).await;
        }
    }

    /// Run a console command or queue handler as one unit of work
    pub async fn run<F: Future>(&self, kind: WorkKind, work: F) -> F::Output {
        let unit = self.begin(kind);
        let output = unit.scope(work).await;
        self.after_dispatch(&unit, None, None).await;
        output
    }
}

/// Stage that captures, ships and resets the unit's data
pub struct CollectorStage {
    paths: PathFilter,
    transport: Arc<dyn Transport>,
}

impl CollectorStage {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport(config: &CollectorConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            paths: PathFilter::from_config(&config.path_filters),
            transport,
        }
    }

    fn reset(unit: &UnitOfWork) {
        unit.collector().clear();
        unit.query_tracker().clear();
    }
}

#[async_trait]
impl Interceptor for CollectorStage {
    fn before_dispatch(&self, unit: &UnitOfWork, _request: Option<&HttpRequest>) {
        Self::reset(unit);
    }

    // Errors are kept regardless of path rules
    fn on_error(&self, unit: &UnitOfWork, error: &CapturedError) {
        unit.record_error(error);
    }

    async fn after_dispatch(
        &self,
        unit: &UnitOfWork,
        request: Option<&HttpRequest>,
        response: Option<&HttpResponse>,
    ) {
        let collector: &SharedCollector = unit.collector();
        let groups = unit.query_tracker().detect_n1_groups();
        if !groups.is_empty() {
            debug!(groups = groups.len(), unit = %unit.id(), "N+1 query patterns detected");
        }

        if let Some(request) = request {
            if self.paths.is_eligible(request.path()) {
                collector.with(|c| c.collect(request, response, unit.started_at(), None));
            }
        }

        collector.send(unit.id(), self.transport.as_ref()).await;
        Self::reset(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::RecordingTransport;
    use apex_core::http::{Method, StatusCode, Uri};
    use std::sync::Mutex;

    fn pipeline(transport: Arc<RecordingTransport>) -> Pipeline {
        let config = CollectorConfig::with_token("tok");
        let stage = CollectorStage::with_transport(&config, transport);
        Pipeline::new(config).with_stage(stage)
    }

    #[tokio::test]
    async fn test_eligible_request_is_captured_and_sent() {
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = pipeline(transport.clone());

        let request = HttpRequest::new(Method::GET, Uri::from_static("/api/users"));
        let unit = pipeline.before_dispatch(&request);
        let response = HttpResponse::new(StatusCode::OK).with_body("[]");
        pipeline.after_dispatch(&unit, Some(&request), Some(&response)).await;

        assert_eq!(transport.count(), 1);
        let payload = transport.last_payload();
        assert_eq!(payload["trace_id"], unit.id().to_string());
        assert_eq!(payload["request"]["uri"], "/api/users");
        assert_eq!(payload["request"]["status_code"], 200);
        assert!(!unit.collector().lock().has_data());
    }

    #[tokio::test]
    async fn test_ineligible_path_sends_nothing_without_other_data() {
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = pipeline(transport.clone());

        let request = HttpRequest::new(Method::GET, Uri::from_static("/dashboard"));
        let unit = pipeline.before_dispatch(&request);
        pipeline
            .after_dispatch(&unit, Some(&request), Some(&HttpResponse::new(StatusCode::OK)))
            .await;

        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_errors_captured_on_ineligible_paths() {
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = pipeline(transport.clone());

        let request = HttpRequest::new(Method::GET, Uri::from_static("/dashboard"));
        let unit = pipeline.before_dispatch(&request);
        pipeline.on_error(
            &unit,
            &CapturedError::new("app::TemplateMissing", "home.html", "src/web.rs", 12),
        );
        pipeline
            .after_dispatch(
                &unit,
                Some(&request),
                Some(&HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR)),
            )
            .await;

        assert_eq!(transport.count(), 1);
        let payload = transport.last_payload();
        assert_eq!(payload["exception"]["class"], "app::TemplateMissing");
        assert!(payload.get("request").is_none());
    }

    #[tokio::test]
    async fn test_console_unit_flushes_logs_and_queries() {
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = pipeline(transport.clone());

        let exit = pipeline
            .run(WorkKind::Console, async {
                if let Some(unit) = UnitOfWork::current() {
                    unit.track_http_request("GET", "https://example.com", Some(200), Some(3.0), None);
                    for id in 1..=4 {
                        unit.query_tracker().record(
                            format!("SELECT * FROM jobs WHERE id = {}", id),
                            Vec::new(),
                            std::time::Duration::from_millis(1),
                        );
                    }
                }
                0
            })
            .await;

        assert_eq!(exit, 0);
        let payload = transport.last_payload();
        assert_eq!(payload["logs"].as_array().unwrap().len(), 1);
        let queries = payload["queries"].as_array().unwrap();
        assert_eq!(queries.len(), 4);
        assert!(queries.iter().all(|q| q["is_n1"] == true));
    }

    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn before_dispatch(&self, _unit: &UnitOfWork, _request: Option<&HttpRequest>) {
            self.events.lock().unwrap().push(format!("before:{}", self.name));
        }

        async fn after_dispatch(
            &self,
            _unit: &UnitOfWork,
            _request: Option<&HttpRequest>,
            _response: Option<&HttpResponse>,
        ) {
            self.events.lock().unwrap().push(format!("after:{}", self.name));
        }
    }

    #[tokio::test]
    async fn test_stage_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(CollectorConfig::default())
            .with_stage(Recorder { name: "outer", events: events.clone() })
            .with_stage(Recorder { name: "inner", events: events.clone() });

        let unit = pipeline.begin(WorkKind::Queue);
        pipeline.after_dispatch(&unit, None, None).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["before:outer", "before:inner", "after:inner", "after:outer"]
        );
    }
}
