use common::Bar;

use super::{Ema, Indicator, IndicatorValue, Source};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal = EMA(line, signal_period),
/// histogram = line − signal.
#[derive(Debug, Clone)]
pub struct Macd {
    source: Source,
    name: String,
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, source: Source) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self {
            source,
            name: format!("macd_{fast}_{slow}_{signal}"),
            fast: Ema::new(fast, source),
            slow: Ema::new(slow, source),
            signal: Ema::new(signal, source),
        }
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let x = self.source.pick(bar);
        let fast = self.fast.push(x);
        let slow = self.slow.push(x);
        let line = fast? - slow?;
        let signal = self.signal.push(line)?;
        Some(IndicatorValue::Macd {
            line,
            signal,
            histogram: line - signal,
        })
    }

    fn is_formed(&self) -> bool {
        self.signal.value().is_some()
    }

    fn reset(&mut self) {
        self.fast.clear();
        self.slow.clear();
        self.signal.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;

    #[test]
    fn macd_forms_after_slow_plus_signal_minus_one_bars() {
        let mut macd = Macd::new(3, 6, 4, Source::Close);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&closes);
        let first = bars
            .iter()
            .position(|b| macd.update(b).is_some())
            .unwrap();
        assert_eq!(first, 6 + 4 - 2);
    }

    #[test]
    fn uptrend_has_positive_line() {
        let mut macd = Macd::new(3, 6, 4, Source::Close);
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + 2.0 * i as f64).collect();
        let last = make_bars(&closes)
            .iter()
            .filter_map(|b| macd.update(b))
            .last()
            .unwrap();
        match last {
            IndicatorValue::Macd { line, signal, histogram } => {
                assert!(line > 0.0);
                assert!((histogram - (line - signal)).abs() < 1e-12);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn reset_replays_identically() {
        let mut macd = Macd::new(3, 6, 4, Source::Close);
        let bars = make_bars(&[5.0, 7.0, 6.0, 9.0, 8.0, 11.0, 10.0, 13.0, 12.0, 15.0]);
        let first: Vec<_> = bars.iter().map(|b| macd.update(b)).collect();
        macd.reset();
        let second: Vec<_> = bars.iter().map(|b| macd.update(b)).collect();
        assert_eq!(first, second);
    }
}
