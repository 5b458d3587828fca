//! Shared tracing configuration for the gridtile workspace.
//!
//! Binaries, integration tests and benches install their `tracing`
//! subscriber through this crate so that planner and allocator events render
//! the same way everywhere. Planning code itself only depends on `tracing`;
//! the subscriber is chosen by whoever owns the process.
//!
//! ```rust
//! use gridtile_tracing::{init_global_tracing, TracingConfig};
//!
//! let config = TracingConfig::for_ci();
//! // A second install in the same process reports `SubscriberInit`.
//! let _ = init_global_tracing(&config);
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

const ENV_PROFILE: &str = "GRIDTILE_TRACING_PROFILE";
const ENV_DIRECTIVES: &str = "GRIDTILE_TRACING_DIRECTIVES";
const ENV_FORMAT: &str = "GRIDTILE_TRACING_FORMAT";
const ENV_PERF_TRACING: &str = "GRIDTILE_PERF_TRACING";
const ENV_PERF_THRESHOLD: &str = "GRIDTILE_PERF_THRESHOLD_US";

/// How the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `gridtile_ops=trace,info`). When
    /// absent, `RUST_LOG` is consulted and then [`Self::default_directive`].
    pub directives: Option<String>,
    /// Directive used when nothing else resolves.
    pub default_directive: String,
    /// Emit event targets (module paths).
    pub include_targets: bool,
    /// ANSI colouring; CI logs usually want this off.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter output.
    pub output: TracingOutput,
    /// Whether planner/allocator performance spans report timings.
    pub enable_performance_tracing: bool,
    /// Performance spans shorter than this are not reported.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for interactive use.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON lines without colour, for log collection.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            ..Self::for_local()
        }
    }

    /// Debug-level planner and allocator events with span timings.
    pub fn for_performance() -> Self {
        Self {
            directives: Some("gridtile_ops=debug,gridtile_device=debug".to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Json,
            enable_performance_tracing: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `GRIDTILE_TRACING_PROFILE` - `local` (default), `ci` or `performance`
    /// - `GRIDTILE_TRACING_DIRECTIVES` - overrides filter directives
    /// - `GRIDTILE_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `GRIDTILE_PERF_TRACING` - `true`/`1`/`yes` enables performance spans
    /// - `GRIDTILE_PERF_THRESHOLD_US` - minimum reported span duration
    pub fn from_env() -> Self {
        let profile = env::var(ENV_PROFILE)
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var(ENV_DIRECTIVES) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Some(output) = env::var(ENV_FORMAT)
            .ok()
            .and_then(|value| TracingOutput::from_env_value(&value))
        {
            config.output = output;
            if output == TracingOutput::Json {
                config.ansi = false;
            }
        }

        if let Ok(flag) = env::var(ENV_PERF_TRACING) {
            config.enable_performance_tracing =
                flag == "1" || flag.eq_ignore_ascii_case("true") || flag.eq_ignore_ascii_case("yes");
        }

        if let Some(threshold) = env::var(ENV_PERF_THRESHOLD)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.performance_threshold_us = Some(threshold);
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Formatter output choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// A directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for the configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// Filter and formatting layers, for callers composing their own registry.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let base = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(base.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(base.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(base.json().with_ansi(false)),
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
///
/// Also applies the performance-span switch and threshold, even when a
/// subscriber was already installed.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    let subscriber = build_subscriber(config)?;
    performance::configure(config.enable_performance_tracing, config.performance_threshold_us);
    subscriber.try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment mutation is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn reset_env() {
        for key in [ENV_PROFILE, ENV_DIRECTIVES, ENV_FORMAT, ENV_PERF_TRACING, ENV_PERF_THRESHOLD, "RUST_LOG"] {
            env::remove_var(key);
        }
    }

    #[test]
    fn rejects_invalid_directive() {
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(build_subscriber(&config), Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    fn builds_every_output() {
        for output in [TracingOutput::Compact, TracingOutput::Pretty, TracingOutput::Json] {
            let config = TracingConfig {
                output,
                directives: Some("debug".to_string()),
                ..TracingConfig::default()
            };
            assert!(build_subscriber(&config).is_ok());
        }
    }

    #[test]
    fn from_env_respects_profile_and_format() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();

        env::set_var(ENV_PROFILE, "ci");
        env::set_var(ENV_FORMAT, "compact");
        env::set_var(ENV_DIRECTIVES, "gridtile_device=trace");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("gridtile_device=trace"));
        assert_eq!(config.output, TracingOutput::Compact);
        assert!(!config.ansi);

        reset_env();
    }

    #[test]
    fn from_env_reads_performance_settings() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();

        env::set_var(ENV_PERF_TRACING, "yes");
        env::set_var(ENV_PERF_THRESHOLD, "250");

        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, Some(250));

        reset_env();
    }

    #[test]
    fn init_applies_performance_settings() {
        let _guard = performance::SETTINGS_LOCK.lock().unwrap();

        let mut config = TracingConfig::for_performance();
        config.performance_threshold_us = Some(1_000);
        // Only the first install succeeds; the settings apply either way.
        let _ = init_global_tracing(&config);
        assert!(performance::performance_tracing_enabled());
        assert_eq!(performance::default_threshold_us(), Some(1_000));

        let _ = init_global_tracing(&TracingConfig::for_ci());
        assert!(!performance::performance_tracing_enabled());
        assert!(!crate::perf_span!("silenced").reports(u64::MAX));

        performance::configure(true, None);
    }

    #[test]
    fn performance_preset() {
        let config = TracingConfig::for_performance();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.output, TracingOutput::Json);
        assert!(config.directives.unwrap().contains("gridtile_ops"));
    }
}
