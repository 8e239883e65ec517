//! Configuration loading (environment variables with defaults).

use std::time::Duration;

/// Runtime configuration for the order service.
#[derive(Debug, Clone)]
pub struct OrderflowConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Caller-side wait bound for a command reply.
    pub ask_timeout: Duration,
    /// Simulated shipping delay of the fulfilment process.
    pub shipping_delay: Duration,
    /// Idle period after which an in-memory order instance is evicted.
    pub idle_evict: Duration,
}

impl Default for OrderflowConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            ask_timeout: Duration::from_millis(5000),
            shipping_delay: Duration::from_millis(3000),
            idle_evict: Duration::from_millis(60_000),
        }
    }
}

impl OrderflowConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("ORDERFLOW_BIND_ADDR").unwrap_or(defaults.bind_addr),
            ask_timeout: duration_ms_var("ORDERFLOW_ASK_TIMEOUT_MS", defaults.ask_timeout),
            shipping_delay: duration_ms_var("ORDERFLOW_SHIPPING_DELAY_MS", defaults.shipping_delay),
            idle_evict: duration_ms_var("ORDERFLOW_IDLE_EVICT_MS", defaults.idle_evict),
        }
    }
}

fn duration_ms_var(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}
