use crate::{Error, Result};

/// Runtime configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Strategy definitions (TOML).
    pub strategy_config_path: String,

    /// JSON-lines file the bar feed reads from.
    pub feed_path: String,

    // Paper execution
    pub paper_initial_equity: f64,
    pub paper_slippage_bps: f64,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` if present.
    /// Missing or malformed values are reported as `Error::Config`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Ok(Config {
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            feed_path: required_env("FEED_PATH")?,
            paper_initial_equity: parsed_env("PAPER_INITIAL_EQUITY", 10_000.0)?,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 0.0)?,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env(key: &str, default: f64) -> Result<f64> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} must be a number, got '{raw}'")))?;
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!("{key} must be a non-negative number")));
            }
            Ok(value)
        }
    }
}
