//! Unit-of-work context.
//!
//! Each HTTP request, console command or queue message gets its own
//! [`UnitOfWork`] holding an isolated collector. The unit is passed explicitly
//! through the host's call chain and is also bound task-locally with
//! [`UnitOfWork::scope`], so the log layer, driver adapters and panic hook can
//! find it without global state.

use crate::collector::SharedCollector;
use crate::exception::{CapturedError, ExceptionEnricher};
use crate::logs::log_entry;
use crate::outgoing::{HttpExchange, TrackedHttpClient};
use crate::query::QueryTracker;
use apex_core::config::CollectorConfig;
use apex_core::models::LogEntry;
use apex_core::work::{WorkInfo, WorkKind};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: UnitOfWork;
}

#[derive(Debug)]
struct UnitInner {
    info: Mutex<WorkInfo>,
    started: Instant,
    collector: SharedCollector,
    queries: QueryTracker,
    enricher: Arc<ExceptionEnricher>,
}

/// Cheap-to-clone handle on one unit of work
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    inner: Arc<UnitInner>,
}

impl UnitOfWork {
    pub fn new(kind: WorkKind, config: Arc<CollectorConfig>) -> Self {
        Self::with_enricher(kind, config, Arc::new(ExceptionEnricher::new()))
    }

    pub fn with_enricher(
        kind: WorkKind,
        config: Arc<CollectorConfig>,
        enricher: Arc<ExceptionEnricher>,
    ) -> Self {
        let collector = SharedCollector::from_config(config);
        let queries = QueryTracker::new(collector.clone());

        Self {
            inner: Arc::new(UnitInner {
                info: Mutex::new(WorkInfo::new(kind)),
                started: Instant::now(),
                collector,
                queries,
                enricher,
            }),
        }
    }

    /// The unit bound to the running task, if any
    pub fn current() -> Option<UnitOfWork> {
        CURRENT.try_with(|unit| unit.clone()).ok()
    }

    /// Run `future` with this unit as the task's current unit
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        CURRENT.scope(self.clone(), future).await
    }

    pub fn sync_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }

    fn info_lock(&self) -> std::sync::MutexGuard<'_, WorkInfo> {
        self.inner.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Time-ordered id, also used as the payload's trace id
    pub fn id(&self) -> Uuid {
        self.info_lock().id
    }

    pub fn kind(&self) -> WorkKind {
        self.info_lock().kind
    }

    pub fn info(&self) -> WorkInfo {
        self.info_lock().clone()
    }

    pub fn started_at(&self) -> Instant {
        self.inner.started
    }

    pub fn finish(&self) {
        self.info_lock().finish();
    }

    pub fn collector(&self) -> &SharedCollector {
        &self.inner.collector
    }

    pub fn query_tracker(&self) -> &QueryTracker {
        &self.inner.queries
    }

    pub fn enricher(&self) -> &ExceptionEnricher {
        &self.inner.enricher
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.collector.is_enabled()
    }

    pub fn add_log(&self, entry: LogEntry) {
        self.inner.collector.with(|c| c.add_log(entry));
    }

    /// Enrich and store an error as this unit's exception
    pub fn record_error(&self, error: &CapturedError) {
        if !self.is_enabled() {
            return;
        }
        let record = self.inner.enricher.enrich(error);
        self.inner.collector.with(|c| c.set_exception(record));
    }

    /// Record an error without waiting on the collector lock. Returns whether
    /// it was stored; a lock held further up the stack means it was not.
    pub fn try_record_error(&self, error: &CapturedError) -> bool {
        let collector = &self.inner.collector;
        if collector.try_with(|c| c.is_enabled()) != Some(true) {
            return false;
        }
        let record = self.inner.enricher.enrich(error);
        collector.try_with(|c| c.set_exception(record)).is_some()
    }

    /// Capture a Rust error at the caller's location
    #[track_caller]
    pub fn capture_error<E>(&self, error: &E)
    where
        E: std::error::Error + ?Sized,
    {
        if self.is_enabled() {
            self.record_error(&CapturedError::from_error(error));
        }
    }

    /// Record the exception and an ERROR log line describing it
    pub fn log_exception(&self, error: &CapturedError, mut context: Map<String, Value>) {
        if !self.is_enabled() {
            return;
        }

        self.record_error(error);
        context.insert(
            "exception".to_string(),
            json!({
                "class": error.type_name,
                "message": error.message,
                "file": error.file,
                "line": error.line,
            }),
        );
        self.add_log(log_entry("ERROR", error.message.clone(), context, "app"));
    }

    /// Record a call made through a client that is not wrapped
    pub fn track_http_request(
        &self,
        method: &str,
        url: &str,
        status_code: Option<u16>,
        duration_ms: Option<f64>,
        error: Option<&str>,
    ) {
        let method = method.to_uppercase();
        let success = match (status_code, error) {
            (Some(status), _) => json!(status < 400),
            (None, Some(_)) => json!(false),
            (None, None) => Value::Null,
        };

        let context = match json!({
            "type": "http_request",
            "method": method,
            "url": url,
            "status_code": status_code,
            "duration_ms": duration_ms,
            "success": success,
            "error": error,
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        self.add_log(log_entry("INFO", format!("{} {}", method, url), context, "http"));
    }

    /// Wrap an HTTP client so its calls are recorded on this unit
    pub fn http_client<C: HttpExchange>(&self, inner: C) -> TrackedHttpClient<C> {
        TrackedHttpClient::for_collector(inner, self.inner.collector.clone())
    }
}
