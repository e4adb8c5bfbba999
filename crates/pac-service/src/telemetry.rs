//! Tracing subscriber installation.

use crate::config::{ConfigError, LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(logging: &LoggingConfig) -> String {
    format!("{level},pac_core={level}", level = logging.level)
}

/// Installs the global subscriber: `RUST_LOG` filtering and either a text
/// or a JSON formatter.
pub fn init(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(logging)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match logging.log_format()? {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            )
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Invalid {
        message: format!("cannot install tracing subscriber: {}", e),
    })
}
