mod metrics;

pub use metrics::{MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "council_stream" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from a textual level such as "debug". Unknown levels fall back to info.
    pub fn from_level_str(level: &str, json: bool) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json,
        }
    }

    /// Add per-target levels from settings. Entries whose level does not
    /// parse are skipped.
    pub fn with_module_levels<'a, I>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (module, level) in modules {
            if let Ok(level) = level.parse::<Level>() {
                self.module_levels.push((module.clone(), level));
            }
        }
        self
    }

    /// Filter directive string, e.g. `info,council_stream=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Handle kept alive for the lifetime of the process.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .init();

    TelemetryGuard {
        metrics: Arc::new(MetricsRecorder::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("council_stream".into(), Level::DEBUG)],
            json: true,
        };
        assert_eq!(config.filter_directives(), "warn,council_stream=debug");
    }

    #[test]
    fn module_levels_from_settings_map() {
        let modules = std::collections::BTreeMap::from([
            ("council_engine".to_string(), "trace".to_string()),
            ("council_stream".to_string(), "debug".to_string()),
            ("noisy".to_string(), "shouting".to_string()),
        ]);
        let config = TelemetryConfig::from_level_str("warn", false).with_module_levels(&modules);
        assert_eq!(
            config.filter_directives(),
            "warn,council_engine=trace,council_stream=debug"
        );
    }

    #[test]
    fn level_string_parsing() {
        assert_eq!(TelemetryConfig::from_level_str("debug", false).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_level_str("TRACE", false).log_level, Level::TRACE);
        assert_eq!(TelemetryConfig::from_level_str("loud", false).log_level, Level::INFO);
    }
}
