//! Configuration loaded from environment variables.
//!
//! ```rust,no_run
//! use plumb::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! # Ok::<(), plumb::config::ConfigError>(())
//! ```
//!
//! | Variable | Default | |
//! |---|---|---|
//! | `PLUMB_LISTEN_ADDR` | `0.0.0.0:8080` | socket address |
//! | `PLUMB_BODY_READ_TIMEOUT` | `30s` | `300ms`, `1m30s`, ... |
//! | `PLUMB_SHUTDOWN_TIMEOUT` | `30s` | drain limit after a shutdown signal |
//! | `PLUMB_CORS_ORIGINS` | `*` | comma-separated origins, `*` allows all |
//! | `LOG_LEVEL` | | `trace` to `error`, wins over `RUST_LOG` |
//! | `RUST_LOG` | `plumb=info` | full filter syntax |
//! | `LOG_FORMAT` | `text` | `text` or `json` |

use std::net::SocketAddr;
use std::time::Duration;

use crate::duration::parse_duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse {key}='{value}': {error}")]
    Parse {
        key: String,
        value: String,
        error: String,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_opt)
    }

    /// Loads from any key lookup, e.g. a map in tests.
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_source(&get)?,
            logging: LoggingConfig::from_source(&get)?,
        })
    }

    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!("  Body read timeout: {:?}", self.server.body_read_timeout);
        info!("  Shutdown timeout: {:?}", self.server.shutdown_timeout);
        info!("  CORS origins: {}", self.server.cors_origins);
        info!("  Log filter: {} ({:?})", self.logging.filter, self.logging.format);
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Limit for reading a request body. Expiry answers `408`.
    pub body_read_timeout: Duration,
    /// How long in-flight connections may run after a shutdown signal.
    pub shutdown_timeout: Duration,
    /// Comma-separated origins for [`Cors`](crate::middleware::Cors).
    pub cors_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            body_read_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            cors_origins: "*".to_owned(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_opt)
    }

    fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let listen_addr = match get("PLUMB_LISTEN_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Parse {
                key: "PLUMB_LISTEN_ADDR".into(),
                value: raw,
                error: e.to_string(),
            })?,
            None => defaults.listen_addr,
        };

        Ok(Self {
            listen_addr,
            body_read_timeout: duration(&get, "PLUMB_BODY_READ_TIMEOUT", defaults.body_read_timeout)?,
            shutdown_timeout: duration(&get, "PLUMB_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout)?,
            cors_origins: get("PLUMB_CORS_ORIGINS").unwrap_or(defaults.cors_origins),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "plumb=info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_opt)
    }

    /// Priority: `LOG_LEVEL` > `RUST_LOG` > `plumb=info`.
    fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let filter = match get("LOG_LEVEL").map(|l| l.to_lowercase()) {
            Some(level) if matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") => {
                format!("plumb={level}")
            }
            Some(level) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_LEVEL".into(),
                    message: format!("'{level}', expected: trace, debug, info, warn, error"),
                });
            }
            None => get("RUST_LOG").unwrap_or_else(|| "plumb=info".to_owned()),
        };

        let format = match get("LOG_FORMAT").map(|f| f.to_lowercase()).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT".into(),
                    message: format!("'{other}', expected: text, json"),
                });
            }
        };

        Ok(Self { filter, format })
    }
}

/// Environment variable, `None` when missing or empty.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn duration(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(key) {
        Some(raw) => parse_duration(&raw).map_err(|e| ConfigError::Parse {
            key: key.into(),
            value: raw,
            error: e.to_string(),
        }),
        None => Ok(default),
    }
}
