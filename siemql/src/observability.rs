//! Logging bootstrap

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. Output goes to stderr so event
/// streams on stdout stay machine readable.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "json" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        other => {
            return Err(Error::Configuration(format!(
                "unknown log format '{}', expected 'pretty' or 'json'",
                other
            )))
        }
    };
    installed.map_err(|e| Error::Configuration(format!("logging already initialized: {}", e)))
}
