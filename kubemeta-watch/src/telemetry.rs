//! Tracing subscriber setup for embedding binaries.
//!
//! Library code only emits events; call [`init_tracing`] once at startup.

use kubemeta_core::{ConfigError, KubeMetaResult, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins over the configured directive.
pub fn build_filter(config: &LoggingConfig) -> KubeMetaResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        ConfigError::InvalidValue {
            field: "logging.filter".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Install the global subscriber, JSON or human-readable per config.
pub fn init_tracing(config: &LoggingConfig) -> KubeMetaResult<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| ConfigError::Parse {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            filter: "kubemeta=notalevel".to_string(),
            json: false,
        };
        let err = build_filter(&config).unwrap_err();
        assert!(format!("{}", err).contains("logging.filter"));
    }

    #[test]
    fn test_default_filter_builds() {
        assert!(build_filter(&LoggingConfig::default()).is_ok());
    }
}
