use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, Result};
use risk::{RiskConfig, SizingConfig, VolumeConstraints};

use crate::indicators::IndicatorSpec;
use crate::signals::SignalSpec;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// name = "BTC EMA cross"
/// instrument = "BTCUSDT"
/// timeframe = "1h"
/// atr_input = 2
///
/// [[strategy.indicators]]
/// kind = "ema"
/// period = 12
///
/// [[strategy.indicators]]
/// kind = "ema"
/// period = 26
///
/// [[strategy.indicators]]
/// kind = "atr"
/// period = 14
///
/// [strategy.signal]
/// rule = "crossover"
/// fast = 0
/// slow = 1
///
/// [strategy.sizing]
/// mode = "fixed"
/// base_volume = 0.01
/// max_volume = 1.0
///
/// [strategy.risk.levels]
/// method = "atr"
/// stop_multiplier = 2.0
/// take_multiplier = 4.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

/// How entries reach the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    #[default]
    Market,
    /// Resting stop at the signal's breakout price.
    Stop,
    /// Resting limit at the signal's breakout price.
    Limit,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs.
    pub name: String,
    /// Instrument symbol, e.g. "BTCUSDT".
    pub instrument: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,
    pub signal: SignalSpec,
    pub sizing: SizingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub constraints: VolumeConstraints,
    /// Index of the ATR cell used for ATR-based stops.
    #[serde(default)]
    pub atr_input: Option<usize>,
    #[serde(default = "default_true")]
    pub allow_short: bool,
    /// Flip directly on an opposite signal instead of closing and waiting.
    #[serde(default = "default_true")]
    pub allow_reversal: bool,
    #[serde(default)]
    pub entry_order: EntryOrder,
    /// Probability of acting on an entry signal, drawn from a seeded RNG.
    #[serde(default)]
    pub entry_probability: Option<f64>,
    #[serde(default)]
    pub seed: u64,
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_true() -> bool {
    true
}

impl StrategyConfig {
    /// Reject configurations that cannot run. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Error::Config(format!("strategy '{}': {msg}", self.name));
        if self.name.trim().is_empty() {
            return Err(Error::Config("strategy name must not be empty".into()));
        }
        if self.instrument.trim().is_empty() {
            return Err(fail("instrument must not be empty".into()));
        }
        for spec in &self.indicators {
            spec.validate().map_err(fail)?;
        }
        self.signal.validate(self.indicators.len()).map_err(fail)?;
        self.sizing.validate().map_err(fail)?;
        self.constraints.validate().map_err(fail)?;
        self.risk.validate().map_err(fail)?;

        match self.atr_input {
            Some(i) => match self.indicators.get(i) {
                Some(IndicatorSpec::Atr { .. }) => {}
                _ => return Err(fail(format!("atr_input {i} is not an ATR indicator"))),
            },
            None if self.risk.needs_atr() => {
                return Err(fail("ATR levels need atr_input".into()));
            }
            None => {}
        }
        if let Some(p) = self.entry_probability {
            if !(p > 0.0 && p <= 1.0) {
                return Err(fail(format!("entry_probability {p} must be in (0, 1]")));
            }
        }
        Ok(())
    }
}

impl StrategyFileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse strategy config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(Error::Config("no [[strategy]] entries".into()));
        }
        let mut names = HashSet::new();
        for s in &self.strategies {
            s.validate()?;
            if !names.insert(s.name.as_str()) {
                return Err(Error::Config(format!("duplicate strategy name '{}'", s.name)));
            }
        }
        Ok(())
    }
}
