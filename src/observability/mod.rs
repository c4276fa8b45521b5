pub mod log;
pub mod noop;
pub mod traits;

pub use self::log::LogObserver;
pub use noop::NoopObserver;
pub use traits::{Observer, ObserverEvent, ObserverMetric};

use crate::config::ObservabilityConfig;
use std::sync::Arc;

/// Factory: create the right observer from config
pub fn create_observer(config: &ObservabilityConfig) -> Arc<dyn Observer> {
    match config.backend.as_str() {
        "log" => Arc::new(LogObserver::new()),
        "none" | "noop" => Arc::new(NoopObserver),
        _ => {
            tracing::warn!(
                "Unknown observability backend '{}', falling back to noop",
                config.backend
            );
            Arc::new(NoopObserver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str) -> ObservabilityConfig {
        ObservabilityConfig {
            backend: name.into(),
        }
    }

    #[test]
    fn factory_log_returns_log() {
        assert_eq!(create_observer(&backend("log")).name(), "log");
    }

    #[test]
    fn factory_none_and_noop_return_noop() {
        assert_eq!(create_observer(&backend("none")).name(), "noop");
        assert_eq!(create_observer(&backend("noop")).name(), "noop");
    }

    #[test]
    fn factory_unknown_falls_back_to_noop() {
        assert_eq!(create_observer(&backend("xyzzy_unknown")).name(), "noop");
        assert_eq!(create_observer(&backend("")).name(), "noop");
    }

    #[test]
    fn default_config_uses_log() {
        assert_eq!(
            create_observer(&ObservabilityConfig::default()).name(),
            "log"
        );
    }
}
