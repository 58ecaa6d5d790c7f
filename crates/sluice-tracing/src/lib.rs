//! Shared tracing setup for the sluice workspace.
//!
//! Binaries, integration tests and benches install their `tracing`
//! subscriber through this crate so that the device adapters, the buffer
//! transfer layer and the dispatcher all log with the same format and filter
//! conventions.
//!
//! ```rust
//! use sluice_tracing::{build_subscriber, TracingConfig};
//!
//! let config = TracingConfig::for_ci();
//! let _subscriber = build_subscriber(&config).expect("valid default directives");
//! ```

pub mod performance;
mod redact;

#[macro_use]
pub mod macros;

use std::collections::HashSet;
use std::env;
use std::sync::Arc;

pub use tracing::{debug, error, info, trace, warn};

use redact::{JsonRedactingFields, TextRedactingFields};
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Environment variable selecting a preset (`local`, `ci`, `performance`).
pub const ENV_PROFILE: &str = "SLUICE_TRACING_PROFILE";
/// Environment variable overriding the filter directives.
pub const ENV_DIRECTIVES: &str = "SLUICE_TRACING_DIRECTIVES";
/// Environment variable selecting the output format (`pretty`, `compact`, `json`).
pub const ENV_FORMAT: &str = "SLUICE_TRACING_FORMAT";
/// Comma-separated list of field names whose values are redacted.
pub const ENV_REDACT_FIELDS: &str = "SLUICE_TRACING_REDACT_FIELDS";
/// Replacement text for redacted values.
pub const ENV_REDACT_TOKEN: &str = "SLUICE_TRACING_REDACT_TOKEN";
/// Enables or disables performance spans (`true`/`1`/`yes`).
pub const ENV_PERF_TRACING: &str = "SLUICE_PERF_TRACING";
/// Minimum span duration in microseconds before a performance span is logged.
pub const ENV_PERF_THRESHOLD_US: &str = "SLUICE_PERF_THRESHOLD_US";

/// How the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `sluice_core=debug,info`). Falls back to
    /// `RUST_LOG`, then to [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Directive used when nothing else resolves.
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    /// ANSI colours. Always off for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter output.
    pub output: TracingOutput,
    /// Field names whose values are replaced by [`TracingConfig::redaction_text`].
    pub redacted_fields: Vec<String>,
    /// Replacement for redacted values.
    pub redaction_text: String,
    /// Whether [`performance::PerformanceSpan`]s should log at all.
    pub enable_performance_tracing: bool,
    /// Spans shorter than this many microseconds are not logged.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            redacted_fields: Vec::new(),
            redaction_text: "***REDACTED***".to_string(),
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON lines without colour codes, for CI and log collectors.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            ..Self::for_local()
        }
    }

    /// JSON output with span timing and debug level for the transfer and
    /// dispatch paths.
    pub fn for_performance() -> Self {
        Self {
            directives: Some("sluice_backends=debug,sluice_core=debug,info".to_string()),
            ansi: false,
            span_events: FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
            output: TracingOutput::Json,
            enable_performance_tracing: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from the `SLUICE_TRACING_*` / `SLUICE_PERF_*`
    /// environment variables, starting from the preset named by
    /// [`ENV_PROFILE`].
    pub fn from_env() -> Self {
        let profile = env::var(ENV_PROFILE)
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" | "perf" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Some(directives) = non_empty_var(ENV_DIRECTIVES) {
            config.directives = Some(directives);
        }

        if let Some(output) = non_empty_var(ENV_FORMAT).and_then(|v| TracingOutput::from_env_value(&v)) {
            config.output = output;
            if config.output == TracingOutput::Json {
                config.ansi = false;
            }
        }

        if let Some(fields) = non_empty_var(ENV_REDACT_FIELDS) {
            let fields: Vec<String> = fields
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect();
            if !fields.is_empty() {
                config.redacted_fields = fields;
            }
        }

        if let Some(token) = non_empty_var(ENV_REDACT_TOKEN) {
            config.redaction_text = token;
        }

        if let Ok(flag) = env::var(ENV_PERF_TRACING) {
            config.enable_performance_tracing =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        if let Some(threshold) = non_empty_var(ENV_PERF_THRESHOLD_US).and_then(|v| v.parse::<u64>().ok()) {
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

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Output format of the formatter layer.
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

/// Failure while installing the shared subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// Filter and formatter layers, for callers composing their own registry.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let redacted: Arc<HashSet<String>> = Arc::new(config.redacted_fields.iter().cloned().collect());
    let replacement = Arc::new(config.redaction_text.clone());
    let redacting = !redacted.is_empty();

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => {
            let layer = tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone());
            if redacting {
                Box::new(layer.fmt_fields(TextRedactingFields::new(redacted, replacement)))
            } else {
                Box::new(layer)
            }
        }
        TracingOutput::Pretty => {
            let layer = tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone());
            if redacting {
                Box::new(layer.fmt_fields(TextRedactingFields::new(redacted, replacement)))
            } else {
                Box::new(layer)
            }
        }
        TracingOutput::Json => {
            let layer = tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_ansi(false)
                .with_span_events(config.span_events.clone());
            if redacting {
                Box::new(layer.fmt_fields(JsonRedactingFields::new(redacted, replacement)))
            } else {
                Box::new(layer)
            }
        }
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install a compact test-writer subscriber, ignoring "already installed".
///
/// Integration tests call this at the top of each test; only the first call
/// in a test binary takes effect.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_fmt()
        .compact()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            ENV_PROFILE,
            ENV_DIRECTIVES,
            ENV_FORMAT,
            ENV_REDACT_FIELDS,
            ENV_REDACT_TOKEN,
            ENV_PERF_TRACING,
            ENV_PERF_THRESHOLD_US,
            "RUST_LOG",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn invalid_directive_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(build_subscriber(&config), Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    fn every_preset_builds() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        for config in [
            TracingConfig::for_local(),
            TracingConfig::for_ci(),
            TracingConfig::for_performance(),
        ] {
            assert!(build_subscriber(&config).is_ok());
        }
    }

    #[test]
    fn redacting_layers_build_for_all_outputs() {
        for output in [TracingOutput::Compact, TracingOutput::Pretty, TracingOutput::Json] {
            let config = TracingConfig {
                directives: Some("info".to_string()),
                output,
                redacted_fields: vec!["path".to_string()],
                ..TracingConfig::default()
            };
            assert!(subscriber_layers(&config).is_ok());
        }
    }

    #[test]
    fn env_overrides_profile_format_and_redaction() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        env::set_var(ENV_PROFILE, "ci");
        env::set_var(ENV_FORMAT, "compact");
        env::set_var(ENV_DIRECTIVES, "sluice_core=trace");
        env::set_var(ENV_REDACT_FIELDS, "path, host ,");
        env::set_var(ENV_REDACT_TOKEN, "[hidden]");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("sluice_core=trace"));
        assert_eq!(config.output, TracingOutput::Compact);
        assert!(!config.ansi);
        assert_eq!(config.redacted_fields, vec!["path", "host"]);
        assert_eq!(config.redaction_text, "[hidden]");

        clear_env();
    }

    #[test]
    fn env_controls_performance_tracing() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        env::set_var(ENV_PERF_TRACING, "yes");
        env::set_var(ENV_PERF_THRESHOLD_US, "250");
        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, Some(250));

        env::set_var(ENV_PERF_TRACING, "off");
        env::set_var(ENV_PERF_THRESHOLD_US, "not-a-number");
        let config = TracingConfig::from_env();
        assert!(!config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, None);

        clear_env();
    }

    #[test]
    fn performance_preset_targets_workspace_crates() {
        let config = TracingConfig::for_performance();
        assert_eq!(config.output, TracingOutput::Json);
        assert!(config.enable_performance_tracing);
        assert!(config
            .directives
            .as_deref()
            .is_some_and(|d| d.contains("sluice_backends") && d.contains("sluice_core")));
    }
}
