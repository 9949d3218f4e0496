//! Database driver integration.
//!
//! Drivers come in two shapes: older ones accept a start/stop [`SqlLogger`],
//! newer ones let a [`Middleware`] wrap each [`Connection`]. [`install`] checks
//! the driver's capability once and attaches the matching adapter; both adapters
//! feed the same [`QueryTracker`].

use crate::query::QueryTracker;
use crate::unit::UnitOfWork;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub type DriverResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub type Row = Map<String, Value>;

/// Start/stop logging hook of older drivers
pub trait SqlLogger: Send + Sync {
    fn start_query(&self, sql: &str, params: &[Value]);
    fn stop_query(&self);
}

/// Statement execution surface of middleware-capable drivers
pub trait Connection: Send {
    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>>;

    /// Returns affected rows
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64>;
}

pub trait Middleware: Send + Sync {
    fn wrap(&self, connection: Box<dyn Connection>) -> Box<dyn Connection>;
}

/// What a database driver lets us hook into
pub trait Driver {
    fn supports_middleware(&self) -> bool;

    fn set_logger(&mut self, _logger: Arc<dyn SqlLogger>) {}

    fn add_middleware(&mut self, _middleware: Arc<dyn Middleware>) {}
}

/// Which hook API a driver was attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverApi {
    Logger,
    Middleware,
}

impl DriverApi {
    pub fn detect(driver: &dyn Driver) -> Self {
        if driver.supports_middleware() {
            DriverApi::Middleware
        } else {
            DriverApi::Logger
        }
    }
}

/// Where adapters find the tracker for the statement being run
#[derive(Debug, Clone)]
pub enum TrackerBinding {
    /// Always the same tracker
    Fixed(QueryTracker),
    /// The tracker of the unit of work the statement runs in
    CurrentUnit,
}

impl TrackerBinding {
    pub(crate) fn resolve(&self) -> Option<QueryTracker> {
        match self {
            TrackerBinding::Fixed(tracker) => Some(tracker.clone()),
            TrackerBinding::CurrentUnit => {
                UnitOfWork::current().map(|unit| unit.query_tracker().clone())
            }
        }
    }
}

/// Attach query tracking to `driver` through whichever API it supports
pub fn install(driver: &mut dyn Driver, binding: TrackerBinding) -> DriverApi {
    let api = DriverApi::detect(driver);
    match api {
        DriverApi::Middleware => driver.add_middleware(Arc::new(TrackingMiddleware::new(binding))),
        DriverApi::Logger => driver.set_logger(Arc::new(LoggerAdapter::new(binding))),
    }
    debug!(?api, "Query tracking installed");
    api
}

/// [`SqlLogger`] that forwards to the tracker
#[derive(Debug, Clone)]
pub struct LoggerAdapter {
    binding: TrackerBinding,
}

impl LoggerAdapter {
    pub fn new(binding: TrackerBinding) -> Self {
        Self { binding }
    }
}

impl SqlLogger for LoggerAdapter {
    fn start_query(&self, sql: &str, params: &[Value]) {
        if let Some(tracker) = self.binding.resolve() {
            tracker.on_query_start(sql, params.to_vec());
        }
    }

    fn stop_query(&self) {
        if let Some(tracker) = self.binding.resolve() {
            tracker.on_query_end();
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingMiddleware {
    binding: TrackerBinding,
}

impl TrackingMiddleware {
    pub fn new(binding: TrackerBinding) -> Self {
        Self { binding }
    }
}

impl Middleware for TrackingMiddleware {
    fn wrap(&self, connection: Box<dyn Connection>) -> Box<dyn Connection> {
        Box::new(TrackedConnection {
            inner: connection,
            binding: self.binding.clone(),
        })
    }
}

/// Connection wrapper that records every statement, including failed ones
pub struct TrackedConnection {
    inner: Box<dyn Connection>,
    binding: TrackerBinding,
}

impl TrackedConnection {
    fn tracked<T>(
        &mut self,
        sql: &str,
        params: &[Value],
        run: impl FnOnce(&mut dyn Connection) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let tracker = self.binding.resolve();
        if let Some(tracker) = &tracker {
            tracker.on_query_start(sql, params.to_vec());
        }

        let result = run(self.inner.as_mut());

        if let Some(tracker) = &tracker {
            tracker.on_query_end();
        }
        result
    }
}

impl Connection for TrackedConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        self.tracked(sql, params, |conn| conn.query(sql, params))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        self.tracked(sql, params, |conn| conn.execute(sql, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::active_config;
    use crate::collector::SharedCollector;
    use serde_json::json;

    struct MemoryConnection;

    impl Connection for MemoryConnection {
        fn query(&mut self, sql: &str, _params: &[Value]) -> DriverResult<Vec<Row>> {
            if sql.contains("missing_table") {
                return Err("no such table: missing_table".into());
            }
            Ok(vec![Row::new()])
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<u64> {
            Ok(1)
        }
    }

    #[derive(Default)]
    struct LegacyDriver {
        logger: Option<Arc<dyn SqlLogger>>,
    }

    impl LegacyDriver {
        fn run(&self, sql: &str, params: &[Value]) {
            if let Some(logger) = &self.logger {
                logger.start_query(sql, params);
                logger.stop_query();
            }
        }
    }

    impl Driver for LegacyDriver {
        fn supports_middleware(&self) -> bool {
            false
        }

        fn set_logger(&mut self, logger: Arc<dyn SqlLogger>) {
            self.logger = Some(logger);
        }
    }

    #[derive(Default)]
    struct ModernDriver {
        middlewares: Vec<Arc<dyn Middleware>>,
    }

    impl ModernDriver {
        fn connect(&self) -> Box<dyn Connection> {
            let base: Box<dyn Connection> = Box::new(MemoryConnection);
            self.middlewares.iter().fold(base, |conn, m| m.wrap(conn))
        }
    }

    impl Driver for ModernDriver {
        fn supports_middleware(&self) -> bool {
            true
        }

        fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
            self.middlewares.push(middleware);
        }
    }

    fn binding() -> (TrackerBinding, SharedCollector) {
        let collector = SharedCollector::from_config(active_config());
        let tracker = QueryTracker::new(collector.clone()).without_caller_attribution();
        (TrackerBinding::Fixed(tracker), collector)
    }

    #[test]
    fn test_legacy_driver_gets_logger() {
        let (binding, collector) = binding();
        let mut driver = LegacyDriver::default();

        assert_eq!(install(&mut driver, binding), DriverApi::Logger);
        driver.run("SELECT * FROM users WHERE id = ?", &[json!(1)]);

        let collector = collector.lock();
        assert_eq!(collector.queries().len(), 1);
        assert_eq!(collector.queries()[0].bindings, vec![json!(1)]);
    }

    #[test]
    fn test_modern_driver_gets_middleware() {
        let (binding, collector) = binding();
        let mut driver = ModernDriver::default();

        assert_eq!(install(&mut driver, binding), DriverApi::Middleware);
        let mut conn = driver.connect();
        conn.query("SELECT * FROM users", &[]).unwrap();
        conn.execute("UPDATE users SET active = 1", &[]).unwrap();

        assert_eq!(collector.lock().queries().len(), 2);
    }

    #[test]
    fn test_failed_statement_is_still_recorded() {
        let (binding, collector) = binding();
        let mut driver = ModernDriver::default();
        install(&mut driver, binding);

        let mut conn = driver.connect();
        assert!(conn.query("SELECT * FROM missing_table", &[]).is_err());

        let collector = collector.lock();
        assert_eq!(collector.queries().len(), 1);
        assert_eq!(collector.queries()[0].sql, "SELECT * FROM missing_table");
    }

    #[test]
    fn test_current_unit_binding_outside_unit_is_inert() {
        let mut driver = ModernDriver::default();
        install(&mut driver, TrackerBinding::CurrentUnit);

        let mut conn = driver.connect();
        assert_eq!(conn.execute("DELETE FROM sessions", &[]).unwrap(), 1);
    }
}
