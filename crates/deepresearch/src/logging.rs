//! Global tracing subscriber setup.
//!
//! Library code logs through both `tracing` and the `log` facade; `log`
//! records are bridged into the subscriber with `tracing_log::LogTracer`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    pub format: LogFormat,
    /// Directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    /// Forces `debug` for this crate regardless of the filter.
    pub verbose: bool,
}

impl From<&LoggingConfig> for LoggingOptions {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            format: config.format,
            filter: config.filter.clone(),
            verbose: false,
        }
    }
}

/// `RUST_LOG` wins, then the configured directive, then `info`.
pub fn build_env_filter(options: &LoggingOptions) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(options.filter.as_deref().unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if options.verbose {
        match "deepresearch=debug".parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    } else {
        filter
    }
}

/// Installs the global subscriber. Returns `false` if one was already set,
/// which is not an error.
pub fn init_tracing(options: &LoggingOptions) -> bool {
    let fmt_layer = match options.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(options))
        .with(fmt_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    // ok() in case a logger is already installed
    tracing_log::LogTracer::init().ok();
    true
}
