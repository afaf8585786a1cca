use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format for the stdout log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "supervisor_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from string levels, skipping entries that don't parse.
    pub fn from_levels<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a str, &'a str)>,
        format: LogFormat,
    ) -> Self {
        let log_level = Level::from_str(level).unwrap_or(Level::INFO);
        let module_levels = modules
            .into_iter()
            .filter_map(|(module, lvl)| {
                Level::from_str(lvl)
                    .ok()
                    .map(|lvl| (module.to_string(), lvl))
            })
            .collect();
        Self {
            log_level,
            module_levels,
            format,
        }
    }

    /// Filter directive string, e.g. `info,supervisor_llm=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Returned by [`init_telemetry`]; reports what was installed.
pub struct TelemetryGuard {
    config: TelemetryConfig,
    installed: bool,
}

impl TelemetryGuard {
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// False when another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter_str = config.filter_directives();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    let installed = tracing_subscriber::registry().with(fmt_layer).try_init().is_ok();
    if !installed {
        eprintln!("supervisor-telemetry: a global subscriber is already installed");
    }

    TelemetryGuard { config, installed }
}
