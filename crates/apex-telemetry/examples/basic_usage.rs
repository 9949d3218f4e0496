//! Basic collector usage
//!
//! Runs one HTTP request and one console command through the pipeline and
//! prints the payloads instead of posting them.
//!
//! Run with: cargo run --example basic_usage

use apex_core::models::Payload;
use apex_core::work::WorkKind;
use apex_core::http::{HeaderValue, Method, StatusCode, Uri};
use apex_core::{HttpRequest, HttpResponse};
use apex_telemetry::driver::{install, Connection, Driver, DriverResult, Middleware, Row, TrackerBinding};
use apex_telemetry::{
    init_diagnostics, panic::install_panic_capture, CapturedError, CollectorConfig,
    CollectorStage, Pipeline, Transport, UnitOfWork,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, endpoint: &str, _token: &str, payload: &Payload) -> apex_telemetry::Result<()> {
        println!("POST {}", endpoint);
        println!("{}", serde_json::to_string_pretty(payload)?);
        Ok(())
    }
}

/// In-memory stand-in for a real database driver
#[derive(Default)]
struct DemoDriver {
    middlewares: Vec<Arc<dyn Middleware>>,
}

struct DemoConnection;

impl Connection for DemoConnection {
    fn query(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<Vec<Row>> {
        Ok(Vec::new())
    }

    fn execute(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<u64> {
        Ok(1)
    }
}

impl DemoDriver {
    fn connect(&self) -> Box<dyn Connection> {
        let base: Box<dyn Connection> = Box::new(DemoConnection);
        self.middlewares.iter().fold(base, |conn, m| m.wrap(conn))
    }
}

impl Driver for DemoDriver {
    fn supports_middleware(&self) -> bool {
        true
    }

    fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = CollectorConfig::with_token("demo-token");
    config.body.mask = vec!["card_number".to_string()];

    init_diagnostics(&config.logging, true)?;
    install_panic_capture();

    let stage = CollectorStage::with_transport(&config, Arc::new(StdoutTransport));
    let pipeline = Pipeline::new(config).with_stage(stage);

    let mut driver = DemoDriver::default();
    install(&mut driver, TrackerBinding::CurrentUnit);

    let request = HttpRequest::new(Method::POST, Uri::from_static("/api/checkout"))
        .with_header("Authorization", HeaderValue::from_static("Bearer abc"))
        .with_header("User-Agent", HeaderValue::from_static("demo/1.0"))
        .with_body(
            json!({ "card_number": "4111111111111111", "password": "x", "items": [1, 2] })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );

    let unit = pipeline.before_dispatch(&request);
    let response = unit
        .scope(async {
            tracing::info!(target: "demo::checkout", items = 2, "Checking out cart");

            let mut conn = driver.connect();
            for id in 1..=4 {
                conn.query(&format!("SELECT * FROM products WHERE id = {}", id), &[])
                    .map_err(|e| anyhow::anyhow!(e))?;
            }

            if let Some(unit) = UnitOfWork::current() {
                unit.track_http_request("POST", "https://payments.example.com/charge", Some(402), Some(84.2), None);
            }

            anyhow::Ok(
                HttpResponse::new(StatusCode::PAYMENT_REQUIRED)
                    .with_header("Content-Type", HeaderValue::from_static("application/json"))
                    .with_body(r#"{"error":"payment required"}"#),
            )
        })
        .await?;
    pipeline.after_dispatch(&unit, Some(&request), Some(&response)).await;

    pipeline
        .run(WorkKind::Console, async {
            if let Some(unit) = UnitOfWork::current() {
                let error = CapturedError::new("demo::ImportFailed", "row 12 invalid", file!(), line!());
                unit.log_exception(&error, Default::default());
            }
        })
        .await;

    Ok(())
}
