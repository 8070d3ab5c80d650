//! Subscriber setup for binaries built on plumb.
//!
//! The library only emits `tracing` events. Applications install a
//! subscriber once at startup:
//!
//! ```rust,no_run
//! use plumb::config::LoggingConfig;
//!
//! plumb::logging::init(&LoggingConfig::from_env()?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber: `EnvFilter` plus a text or JSON `fmt`
/// layer. Fails instead of panicking when a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|err| {
        eprintln!("Warning: invalid log filter '{}': {err}, using plumb=info", config.filter);
        EnvFilter::new("plumb=info")
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}
