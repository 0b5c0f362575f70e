use common::Bar;

use super::{Indicator, IndicatorValue, Source};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Returns `None` until `period + 1` values have been seen.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    source: Source,
    name: String,
    prev: Option<f64>,
    changes: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize, source: Source) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            period,
            source,
            name: format!("rsi_{period}"),
            prev: None,
            changes: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) -> Option<f64> {
        let Some(prev) = self.prev.replace(x) else {
            return None;
        };
        let change = x - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        self.changes += 1;
        if self.changes < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            return None;
        }
        if self.changes == self.period {
            // First average over the initial `period` changes
            self.avg_gain = (self.gain_sum + gain) / n;
            self.avg_loss = (self.loss_sum + loss) / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        Some(self.current())
    }

    fn current(&self) -> f64 {
        if self.avg_loss == 0.0 {
            // Flat series sits at the midpoint rather than pinning to 100.
            return if self.avg_gain == 0.0 { 50.0 } else { 100.0 };
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.push(self.source.pick(bar)).map(IndicatorValue::Single)
    }

    fn is_formed(&self) -> bool {
        self.changes >= self.period
    }

    fn reset(&mut self) {
        self.prev = None;
        self.changes = 0;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }
}
