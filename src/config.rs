use clap::Args;

/// Server settings, read from flags with environment fallbacks.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Interface to bind
    #[arg(long, env = "EXCHANGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "EXCHANGE_PORT", default_value_t = 3001)]
    pub port: u16,

    /// Upper bound for the `depth` query of the order book endpoint
    #[arg(long, env = "EXCHANGE_MAX_DEPTH", default_value_t = 100)]
    pub max_depth: usize,

    /// Upper bound for the `limit` query of the recent trades endpoint
    #[arg(long, env = "EXCHANGE_MAX_TRADES", default_value_t = 1000)]
    pub max_trades: usize,

    /// Log filter used when RUST_LOG is not set, e.g. "info" or "exchange_engine=debug"
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Clamps a requested depth to `[1, max_depth]`.
    pub fn effective_depth(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(crate::engine::DEFAULT_DEPTH)
            .clamp(1, self.max_depth.max(1))
    }

    /// Clamps a requested trade count to `[1, max_trades]`.
    pub fn effective_trades_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(crate::engine::DEFAULT_TRADES_LIMIT)
            .clamp(1, self.max_trades.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            max_depth: 100,
            max_trades: 1000,
            log_level: "info".into(),
        }
    }
}
