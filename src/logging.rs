// Tracing bootstrap for the engine

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{Environment, LoggingConfig};

/// Installs the global subscriber. RUST_LOG wins over the configured level;
/// calling this more than once is a no-op.
pub fn init_logging(environment: Environment, config: &LoggingConfig) {
    let level = config
        .level
        .clone()
        .unwrap_or_else(|| default_level(environment).to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = if config.json {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    if tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .is_err()
    {
        tracing::debug!("global tracing subscriber already installed");
        return;
    }

    tracing::info!(environment = environment.as_str(), "logging initialized");
}

fn default_level(environment: Environment) -> &'static str {
    match environment {
        Environment::Production => "info",
        Environment::Staging | Environment::Development => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        let config = LoggingConfig::default();
        init_logging(Environment::Development, &config);
        init_logging(Environment::Production, &config);
    }
}
