//! Tracking of HTTP calls made by the monitored process.
//!
//! A call is recorded once, when its response is first looked at or when the
//! response is dropped unread, whichever happens first. Failed calls are
//! recorded immediately with no status.

use crate::collector::SharedCollector;
use crate::unit::UnitOfWork;
use apex_core::models::OutgoingCallRecord;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Method, Request, RequestBuilder};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Anything that can issue a built request
#[async_trait]
pub trait HttpExchange: Send + Sync {
    type Response: ResponseMeta + Send;
    type Error: Display + Send;

    async fn execute(&self, request: Request) -> Result<Self::Response, Self::Error>;
}

/// Response metadata the wrapper exposes without consuming the response
pub trait ResponseMeta {
    fn status_code(&self) -> u16;
    fn headers(&self) -> &HeaderMap;
}

#[async_trait]
impl HttpExchange for reqwest::Client {
    type Response = reqwest::Response;
    type Error = reqwest::Error;

    async fn execute(&self, request: Request) -> Result<Self::Response, Self::Error> {
        reqwest::Client::execute(self, request).await
    }
}

impl ResponseMeta for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn headers(&self) -> &HeaderMap {
        reqwest::Response::headers(self)
    }
}

/// HTTP client wrapper that records every call on a collector
#[derive(Debug, Clone)]
pub struct TrackedHttpClient<C = reqwest::Client> {
    inner: C,
    collector: Option<SharedCollector>,
}

impl<C: HttpExchange> TrackedHttpClient<C> {
    /// Record into whichever unit of work is current when a call is made
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            collector: None,
        }
    }

    /// Record into a fixed collector
    pub fn for_collector(inner: C, collector: SharedCollector) -> Self {
        Self {
            inner,
            collector: Some(collector),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Collector to record `url` into, if it should be tracked at all
    fn target(&self, url: &str) -> Option<SharedCollector> {
        let collector = match &self.collector {
            Some(collector) => collector.clone(),
            None => UnitOfWork::current()?.collector().clone(),
        };

        let tracked = collector.with(|c| {
            c.is_enabled() && c.config().track_http_requests && !c.config().is_ingestion_url(url)
        });
        tracked.then_some(collector)
    }

    pub async fn execute(&self, request: Request) -> Result<TrackedResponse<C::Response>, C::Error> {
        let Some(collector) = self.target(request.url().as_str()) else {
            return self.inner.execute(request).await.map(TrackedResponse::untracked);
        };

        let call = PendingCall {
            method: request.method().as_str().to_uppercase(),
            url: request.url().to_string(),
            started: Instant::now(),
            collector,
        };

        match self.inner.execute(request).await {
            Ok(response) => Ok(TrackedResponse {
                guard: TrackGuard::new(Some(call), response.status_code()),
                inner: response,
            }),
            Err(error) => {
                call.record(None, Some(error.to_string()));
                Err(error)
            }
        }
    }
}

impl TrackedHttpClient<reqwest::Client> {
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Build and execute a request made with [`request`](Self::request)
    pub async fn send(
        &self,
        builder: RequestBuilder,
    ) -> reqwest::Result<TrackedResponse<reqwest::Response>> {
        let request = builder.build()?;
        self.execute(request).await
    }
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    url: String,
    started: Instant,
    collector: SharedCollector,
}

impl PendingCall {
    fn record(self, status_code: Option<u16>, error: Option<String>) {
        let duration = self.started.elapsed().as_secs_f64() * 1000.0;
        let record = OutgoingCallRecord {
            method: self.method,
            url: self.url,
            status_code,
            duration: (duration * 100.0).round() / 100.0,
            timestamp: Utc::now().to_rfc3339(),
            error,
        };
        self.collector.with(|c| c.add_outgoing_request(record));
    }
}

/// Records the call exactly once: on first access or on drop
#[derive(Debug)]
struct TrackGuard {
    call: std::sync::Mutex<Option<PendingCall>>,
    status_code: u16,
    tracked: AtomicBool,
}

impl TrackGuard {
    fn new(call: Option<PendingCall>, status_code: u16) -> Self {
        Self {
            tracked: AtomicBool::new(call.is_none()),
            call: std::sync::Mutex::new(call),
            status_code,
        }
    }

    fn track(&self) {
        if self.tracked.swap(true, Ordering::AcqRel) {
            return;
        }
        let call = self
            .call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(call) = call {
            call.record(Some(self.status_code), None);
        }
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.track();
    }
}

/// Response handed back by [`TrackedHttpClient`]
#[derive(Debug)]
pub struct TrackedResponse<R> {
    inner: R,
    guard: TrackGuard,
}

impl<R: ResponseMeta> TrackedResponse<R> {
    fn untracked(inner: R) -> Self {
        Self {
            guard: TrackGuard::new(None, inner.status_code()),
            inner,
        }
    }

    pub fn status(&self) -> u16 {
        self.guard.track();
        self.inner.status_code()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.guard.track();
        self.inner.headers()
    }

    /// Take the underlying response, recording the call first
    pub fn into_inner(self) -> R {
        let TrackedResponse { inner, guard } = self;
        guard.track();
        inner
    }
}

impl TrackedResponse<reqwest::Response> {
    pub async fn text(self) -> reqwest::Result<String> {
        self.into_inner().text().await
    }

    pub async fn bytes(self) -> reqwest::Result<bytes::Bytes> {
        self.into_inner().bytes().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> reqwest::Result<T> {
        self.into_inner().json().await
    }
}
