//! # Apex Telemetry
//!
//! In-process telemetry collector. Everything observed during one unit of work
//! (an HTTP request, a console command, a queue message) is accumulated on an
//! isolated collector and shipped to the ingestion API as a single payload.
//!
//! ## Features
//!
//! - **Redaction**: configurable exclude/mask rules for headers and bodies
//! - **Exceptions**: fingerprinted, source-annotated stack traces
//! - **Queries**: normalized SQL with N+1 pattern detection
//! - **Outgoing calls**: lazily tracked HTTP client responses
//! - **Log capture**: a `tracing` layer that records host events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apex_telemetry::{CollectorConfig, Pipeline};
//! use apex_core::http::{Method, StatusCode, Uri};
//! use apex_core::{HttpRequest, HttpResponse};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = CollectorConfig::load(None).await?;
//! let pipeline = Pipeline::collector(config)?;
//!
//! let request = HttpRequest::new(Method::GET, Uri::from_static("/api/users"));
//! let unit = pipeline.before_dispatch(&request);
//! let response = unit
//!     .scope(async { HttpResponse::new(StatusCode::OK).with_body("[]") })
//!     .await;
//! pipeline.after_dispatch(&unit, Some(&request), Some(&response)).await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod collector;
pub mod digest;
pub mod driver;
pub mod exception;
pub mod filters;
pub mod frames;
pub mod lifecycle;
pub mod logs;
pub mod middleware;
#[cfg(feature = "sea-orm")]
pub mod orm;
pub mod outgoing;
pub mod panic;
pub mod query;
pub mod redaction;
pub mod system;
pub mod transport;
pub mod unit;


pub use apex_core::config::CollectorConfig;
pub use collector::{Collector, SharedCollector};
pub use exception::{CapturedError, ExceptionEnricher};
pub use filters::PathFilter;
pub use lifecycle::{CollectorStage, Interceptor, Pipeline};
pub use logs::LogCaptureLayer;
pub use outgoing::{TrackedHttpClient, TrackedResponse};
pub use query::{normalize_sql, QueryTracker};
pub use redaction::Redactor;
pub use system::init_diagnostics;
pub use transport::{HttpTransport, Transport};
pub use unit::UnitOfWork;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry-specific errors. None of these ever reach the host's control flow
/// from a lifecycle hook; they surface only from setup calls.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Ingestion rejected payload: status {status_code}")]
    Rejected { status_code: u16 },

    #[error("Telemetry system error: {message}")]
    System { message: String },
}

impl From<apex_core::ApexError> for TelemetryError {
    fn from(err: apex_core::ApexError) -> Self {
        TelemetryError::Config {
            message: err.to_string(),
        }
    }
}

impl From<TelemetryError> for apex_core::ApexError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::Http(_) | TelemetryError::Rejected { .. } => {
                apex_core::ApexError::Transport {
                    message: err.to_string(),
                }
            }
            other => apex_core::ApexError::Telemetry {
                message: other.to_string(),
            },
        }
    }
}
