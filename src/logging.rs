//! Logging setup
//!
//! Installs a global `tracing` subscriber. `SQLWEAVE_LOG` overrides the
//! configured level and accepts any `EnvFilter` directive
//! (`sqlweave::ir_builder=debug,info`).

use crate::config::LoggingConfig;
use std::env;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive
pub const LOG_ENV: &str = "SQLWEAVE_LOG";

/// Filter from `SQLWEAVE_LOG`, else the configured level; an invalid
/// directive falls back to `info`
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    let level = env::var(LOG_ENV)
        .ok()
        .unwrap_or_else(|| config.level.clone());
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber; a second call leaves the first in place
pub fn init(config: &LoggingConfig) {
    let json = config.format == "json";
    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter(config))
            .with_target(true)
            .with_writer(std::io::stderr)
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "sqlweave=loud".to_string(),
            format: "text".to_string(),
        };
        if env::var(LOG_ENV).is_err() {
            assert_eq!(filter(&config).to_string(), "info");
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
        tracing::info!("logging initialized");
    }
}
