//! Incremental indicator cells.
//!
//! Every cell consumes one final bar per `update` call and reports
//! `None` until it has seen enough history. Cells own their state
//! exclusively and `reset` returns them to the freshly built state.

pub mod atr;
pub mod bollinger;
pub mod channel;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use atr::Atr;
pub use bollinger::Bollinger;
pub use channel::Channel;
pub use ema::Ema;
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;

use serde::{Deserialize, Serialize};

use common::Bar;

/// Output of one indicator cell for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Single(f64),
    Band { upper: f64, middle: f64, lower: f64 },
    Macd { line: f64, signal: f64, histogram: f64 },
}

impl IndicatorValue {
    /// The headline value: the single value, the band middle, or the MACD line.
    pub fn primary(&self) -> f64 {
        match *self {
            IndicatorValue::Single(v) => v,
            IndicatorValue::Band { middle, .. } => middle,
            IndicatorValue::Macd { line, .. } => line,
        }
    }

    /// Read one named component. `None` if this value has no such component.
    pub fn field(&self, field: Field) -> Option<f64> {
        match (*self, field) {
            (_, Field::Value) => Some(self.primary()),
            (IndicatorValue::Band { upper, .. }, Field::Upper) => Some(upper),
            (IndicatorValue::Band { middle, .. }, Field::Middle) => Some(middle),
            (IndicatorValue::Band { lower, .. }, Field::Lower) => Some(lower),
            (IndicatorValue::Macd { line, .. }, Field::Line) => Some(line),
            (IndicatorValue::Macd { signal, .. }, Field::Signal) => Some(signal),
            (IndicatorValue::Macd { histogram, .. }, Field::Histogram) => Some(histogram),
            _ => None,
        }
    }
}

/// Component selector for multi-valued indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    #[default]
    Value,
    Upper,
    Middle,
    Lower,
    Line,
    Signal,
    Histogram,
}

/// Which bar field a cell reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Open,
    High,
    Low,
    #[default]
    Close,
    Volume,
    Typical,
}

impl Source {
    pub fn pick(self, bar: &Bar) -> f64 {
        match self {
            Source::Open => bar.open,
            Source::High => bar.high,
            Source::Low => bar.low,
            Source::Close => bar.close,
            Source::Volume => bar.volume,
            Source::Typical => bar.typical_price(),
        }
    }
}

/// One incremental indicator.
pub trait Indicator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Consume one final bar. Returns the new value once formed.
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue>;

    fn is_formed(&self) -> bool;

    /// Forget all history.
    fn reset(&mut self);
}

/// Serializable description of an indicator cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    Sma {
        period: usize,
        #[serde(default)]
        source: Source,
    },
    Ema {
        period: usize,
        #[serde(default)]
        source: Source,
    },
    Rsi {
        period: usize,
        #[serde(default)]
        source: Source,
    },
    Atr {
        period: usize,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
        #[serde(default)]
        source: Source,
    },
    Bollinger {
        period: usize,
        #[serde(default = "default_width")]
        width: f64,
        #[serde(default)]
        source: Source,
    },
    /// Highest high / lowest low over `period` bars.
    Channel {
        period: usize,
    },
}

fn default_width() -> f64 {
    2.0
}

impl IndicatorSpec {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            IndicatorSpec::Sma { period, .. }
            | IndicatorSpec::Ema { period, .. }
            | IndicatorSpec::Atr { period }
            | IndicatorSpec::Channel { period } => {
                if period == 0 {
                    return Err(format!("{self:?}: period must be >= 1"));
                }
            }
            IndicatorSpec::Rsi { period, .. } => {
                if period < 2 {
                    return Err("RSI period must be >= 2".into());
                }
            }
            IndicatorSpec::Macd { fast, slow, signal, .. } => {
                if fast == 0 || signal == 0 || fast >= slow {
                    return Err("MACD needs 0 < fast < slow and signal >= 1".into());
                }
            }
            IndicatorSpec::Bollinger { period, width, .. } => {
                if period < 2 || !(width > 0.0) {
                    return Err("Bollinger needs period >= 2 and width > 0".into());
                }
            }
        }
        Ok(())
    }

    /// Build a fresh cell. Call `validate` first.
    pub fn build(&self) -> Box<dyn Indicator> {
        match *self {
            IndicatorSpec::Sma { period, source } => Box::new(Sma::new(period, source)),
            IndicatorSpec::Ema { period, source } => Box::new(Ema::new(period, source)),
            IndicatorSpec::Rsi { period, source } => Box::new(Rsi::new(period, source)),
            IndicatorSpec::Atr { period } => Box::new(Atr::new(period)),
            IndicatorSpec::Macd { fast, slow, signal, source } => {
                Box::new(Macd::new(fast, slow, signal, source))
            }
            IndicatorSpec::Bollinger { period, width, source } => {
                Box::new(Bollinger::new(period, width, source))
            }
            IndicatorSpec::Channel { period } => Box::new(Channel::new(period)),
        }
    }
}

/// Synthetic bars from close prices for tests.
///
/// open = previous close, high/low one unit outside the body, volume 1000,
/// one minute apart.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    use chrono::{Duration, TimeZone, Utc};
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            let open_time = start + Duration::minutes(i as i64);
            Bar {
                instrument: "TEST".into(),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
                open_time,
                close_time: open_time + Duration::minutes(1),
                is_final: true,
            }
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}"
    );
}
