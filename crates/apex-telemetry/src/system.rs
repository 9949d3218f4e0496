//! Subscriber setup for the collector's own diagnostics and log capture

use crate::filters::OwnEventsFilter;
use crate::logs::LogCaptureLayer;
use crate::{Result, TelemetryError};
use apex_core::config::{LogFormat, LoggingConfig};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Install the global subscriber: a console layer at the configured level and,
/// when `capture_logs` is set, the layer that records host events on the
/// current unit of work.
pub fn init_diagnostics(config: &LoggingConfig, capture_logs: bool) -> Result<()> {
    let capture = capture_logs.then(|| {
        LogCaptureLayer::new(config.capture_level).with_filter(OwnEventsFilter::new())
    });

    Registry::default()
        .with(console_layer(config)?)
        .with(capture)
        .try_init()
        .map_err(|e| TelemetryError::System {
            message: format!("Failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::debug!(
        telemetry.event = "diagnostics_initialized",
        telemetry.version = env!("CARGO_PKG_VERSION"),
        "Collector diagnostics initialized"
    );

    Ok(())
}

/// Level filter for diagnostics; `RUST_LOG` takes precedence when set
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::new(env_filter));
    }

    let level: Level = config.level.into();
    let mut filter = EnvFilter::new(level.to_string());
    for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
        filter = filter.add_directive(directive.parse().map_err(|e| TelemetryError::Config {
            message: format!("Invalid filter directive '{}': {}", directive, e),
        })?);
    }

    Ok(filter)
}

fn console_layer(config: &LoggingConfig) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    let filter = build_env_filter(config)?;

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_filter(filter)
            .boxed(),
    };

    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_core::config::LogLevel;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_from_config() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: LogLevel::Info,
            ..LoggingConfig::default()
        };

        let filter = build_env_filter(&config).unwrap();
        assert!(filter.to_string().contains("info"));
        assert!(filter.to_string().contains("hyper=warn"));
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_config() {
        std::env::set_var("RUST_LOG", "shop=trace");
        let filter = build_env_filter(&LoggingConfig::default()).unwrap();
        std::env::remove_var("RUST_LOG");

        assert_eq!(filter.to_string(), "shop=trace");
    }

    #[test]
    fn test_console_layers_build_for_every_format() {
        for format in [LogFormat::Json, LogFormat::Pretty, LogFormat::Compact] {
            let config = LoggingConfig {
                format,
                ..LoggingConfig::default()
            };
            assert!(console_layer(&config).is_ok());
        }
    }
}
