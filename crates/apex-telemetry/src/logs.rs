//! Capture of host log events into the current unit of work

use crate::unit::UnitOfWork;
use apex_core::config::LogLevel;
use apex_core::models::LogEntry;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Build a log entry stamped with the current time
pub fn log_entry(
    level: &str,
    message: impl Into<String>,
    context: Map<String, Value>,
    channel: &str,
) -> LogEntry {
    LogEntry {
        level: level.to_uppercase(),
        message: message.into(),
        context,
        channel: channel.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        source_class: None,
        function: None,
        file: None,
        line: None,
    }
}

/// `tracing` layer that turns events into [`LogEntry`] records on the unit of
/// work bound to the emitting task. Events outside a unit are ignored.
#[derive(Debug, Clone)]
pub struct LogCaptureLayer {
    min_level: Level,
}

impl Default for LogCaptureLayer {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

impl LogCaptureLayer {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level: min_level.into(),
        }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level {
            return;
        }

        let Some(unit) = UnitOfWork::current() else {
            return;
        };
        if !unit.is_enabled() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut entry = log_entry(
            metadata.level().as_str(),
            visitor.message.unwrap_or_default(),
            visitor.fields,
            metadata.target(),
        );
        entry.source_class = metadata.module_path().map(str::to_string);
        entry.file = metadata.file().map(str::to_string);
        entry.line = metadata.line();

        unit.add_log(entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), json!(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .insert(field.name().to_string(), json!(value.to_string()));
    }

    // `info!("...")` delivers its message through here as format arguments
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), json!(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::active_config;
    use crate::filters::OwnEventsFilter;
    use apex_core::work::WorkKind;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn with_capture<R>(min_level: LogLevel, f: impl FnOnce() -> R) -> R {
        let subscriber =
            Registry::default().with(LogCaptureLayer::new(min_level).with_filter(OwnEventsFilter::new()));
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn test_events_become_log_entries() {
        let unit = UnitOfWork::new(WorkKind::Http, active_config());

        with_capture(LogLevel::Debug, || {
            unit.sync_scope(|| {
                tracing::warn!(target: "shop::orders", order_id = 42, paid = false, "Order {} stuck", 42);
            })
        });

        let collector = unit.collector().lock();
        let log = &collector.logs()[0];
        assert_eq!(log.level, "WARN");
        assert_eq!(log.message, "Order 42 stuck");
        assert_eq!(log.channel, "shop::orders");
        assert_eq!(log.context["order_id"], 42);
        assert_eq!(log.context["paid"], false);
        assert!(log.file.as_deref().unwrap_or_default().ends_with("logs.rs"));
        assert!(log.line.is_some());
    }

    #[test]
    fn test_level_threshold() {
        let unit = UnitOfWork::new(WorkKind::Http, active_config());

        with_capture(LogLevel::Info, || {
            unit.sync_scope(|| {
                tracing::debug!(target: "shop", "too chatty");
                tracing::error!(target: "shop", "kept");
            })
        });

        let collector = unit.collector().lock();
        assert_eq!(collector.logs().len(), 1);
        assert_eq!(collector.logs()[0].message, "kept");
    }

    #[test]
    fn test_own_events_and_unscoped_events_are_skipped() {
        let unit = UnitOfWork::new(WorkKind::Http, active_config());

        with_capture(LogLevel::Trace, || {
            tracing::info!(target: "shop", "no unit bound");
            unit.sync_scope(|| {
                tracing::info!(target: "apex_telemetry::transport", "internal");
            })
        });

        assert!(unit.collector().lock().logs().is_empty());
    }

    #[test]
    fn test_log_entry_uppercases_level() {
        let entry = log_entry("error", "boom", Map::new(), "app");
        assert_eq!(entry.level, "ERROR");
        assert_eq!(entry.channel, "app");
        assert!(entry.file.is_none());
    }
}
