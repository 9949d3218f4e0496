//! Per-unit accumulator and its send/clear lifecycle.
//!
//! A collector moves through `idle -> accumulating -> sent -> idle`: mutators add
//! data, [`SharedCollector::send`] ships it at most once, and [`Collector::clear`]
//! returns to a fresh state from anywhere.

use crate::capture::CaptureRules;
use crate::transport::Transport;
use apex_core::config::CollectorConfig;
use apex_core::http::{HttpRequest, HttpResponse};
use apex_core::models::{
    CapturedRequest, CapturedResponse, ExceptionRecord, LogEntry, N1Group, OutgoingCallRecord,
    Payload, QueryRecord, RequestSection,
};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Accumulator for one unit of work
#[derive(Debug)]
pub struct Collector {
    config: Arc<CollectorConfig>,
    rules: CaptureRules,
    request: Option<CapturedRequest>,
    response: Option<CapturedResponse>,
    exception: Option<ExceptionRecord>,
    logs: Vec<LogEntry>,
    queries: Vec<QueryRecord>,
    outgoing_requests: Vec<OutgoingCallRecord>,
    sent: bool,
}

impl Collector {
    pub fn new(config: Arc<CollectorConfig>) -> Self {
        let rules = CaptureRules::from_config(&config);
        Self {
            config,
            rules,
            request: None,
            response: None,
            exception: None,
            logs: Vec::new(),
            queries: Vec::new(),
            outgoing_requests: Vec::new(),
            sent: false,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Gate for every mutator: enabled flag plus a non-empty token
    pub fn is_enabled(&self) -> bool {
        self.config.is_active()
    }

    /// Capture the request/response pair. `end` defaults to now.
    pub fn collect(
        &mut self,
        request: &HttpRequest,
        response: Option<&HttpResponse>,
        start: Instant,
        end: Option<Instant>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let end = end.unwrap_or_else(Instant::now);
        let duration_ms = (end.saturating_duration_since(start).as_secs_f64() * 1000.0).round();

        self.request = Some(self.rules.capture_request(request));
        self.response = Some(self.rules.capture_response(response, duration_ms as u64));
    }

    pub fn add_log(&mut self, entry: LogEntry) {
        if self.is_enabled() {
            self.logs.push(entry);
        }
    }

    pub fn add_query(&mut self, query: QueryRecord) {
        if self.is_enabled() {
            self.queries.push(query);
        }
    }

    pub fn add_outgoing_request(&mut self, call: OutgoingCallRecord) {
        if self.is_enabled() {
            self.outgoing_requests.push(call);
        }
    }

    /// Record the unit's exception; a later one replaces an earlier one
    pub fn set_exception(&mut self, exception: ExceptionRecord) {
        if self.is_enabled() {
            self.exception = Some(exception);
        }
    }

    /// Mark every query belonging to a flagged group
    pub fn flag_n1_groups(&mut self, groups: &[N1Group]) {
        for query in &mut self.queries {
            if let Some(group) = groups.iter().find(|g| g.pattern == query.normalized_sql) {
                query.is_n1 = true;
                query.n1_group_hash = Some(group.hash.clone());
            }
        }
    }

    /// Whether any section would appear in a payload
    pub fn has_data(&self) -> bool {
        self.request.is_some()
            || self.exception.is_some()
            || !self.logs.is_empty()
            || !self.queries.is_empty()
            || !self.outgoing_requests.is_empty()
    }

    pub fn build_payload(&self, trace_id: Uuid) -> Payload {
        let request = if self.request.is_some() || self.response.is_some() {
            Some(RequestSection {
                request: self.request.clone(),
                response: self.response.clone(),
            })
        } else {
            None
        };

        Payload {
            trace_id: trace_id.to_string(),
            request,
            logs: self.logs.clone(),
            exception: self.exception.clone(),
            queries: self.queries.clone(),
            outgoing_requests: self.outgoing_requests.clone(),
        }
    }

    /// Payload to transmit, or `None` when sending would be a no-op.
    /// Latches `sent` together with building the payload.
    fn prepare_send(&mut self, trace_id: Uuid) -> Option<Payload> {
        if !self.is_enabled() || self.sent || !self.has_data() {
            return None;
        }
        self.sent = true;
        Some(self.build_payload(trace_id))
    }

    /// Reset every accumulator and the sent latch
    pub fn clear(&mut self) {
        self.request = None;
        self.response = None;
        self.exception = None;
        self.logs.clear();
        self.queries.clear();
        self.outgoing_requests.clear();
        self.sent = false;
    }

    pub fn request(&self) -> Option<&CapturedRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&CapturedResponse> {
        self.response.as_ref()
    }

    pub fn exception(&self) -> Option<&ExceptionRecord> {
        self.exception.as_ref()
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn queries(&self) -> &[QueryRecord] {
        &self.queries
    }

    pub fn outgoing_requests(&self) -> &[OutgoingCallRecord] {
        &self.outgoing_requests
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }
}

/// Cloneable handle to one unit's collector.
///
/// Trackers, the log layer and response guards all write through the same handle.
#[derive(Debug, Clone)]
pub struct SharedCollector {
    inner: Arc<Mutex<Collector>>,
}

impl SharedCollector {
    pub fn new(collector: Collector) -> Self {
        Self {
            inner: Arc::new(Mutex::new(collector)),
        }
    }

    pub fn from_config(config: Arc<CollectorConfig>) -> Self {
        Self::new(Collector::new(config))
    }

    /// Lock the collector. A panic while holding the lock never disables collection.
    pub fn lock(&self) -> MutexGuard<'_, Collector> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Collector) -> R) -> R {
        f(&mut self.lock())
    }

    /// Like [`with`](Self::with), but gives up instead of waiting when the lock
    /// is already held, e.g. by the frame that is panicking
    pub fn try_with<R>(&self, f: impl FnOnce(&mut Collector) -> R) -> Option<R> {
        match self.inner.try_lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(TryLockError::Poisoned(poisoned)) => Some(f(&mut poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_enabled()
    }

    /// Transmit the accumulated data once. Returns whether a payload was posted
    /// successfully; transport failures are logged at debug level and dropped.
    pub async fn send(&self, trace_id: Uuid, transport: &dyn Transport) -> bool {
        let prepared = {
            let mut collector = self.lock();
            let endpoint = collector.config.endpoint_url().to_string();
            let token = collector.config.token.clone();
            collector
                .prepare_send(trace_id)
                .map(|payload| (payload, endpoint, token))
        };

        let Some((payload, endpoint, token)) = prepared else {
            return false;
        };

        match transport.send(&endpoint, &token, &payload).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Telemetry payload dropped");
                false
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
