//! Exponential Moving Average.
//!
//! EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seeded with the SMA of the first `period` values.

use common::Bar;

use super::{Indicator, IndicatorValue, Source};

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    source: Source,
    name: String,
    alpha: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize, source: Source) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            source,
            name: format!("ema_{period}"),
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    /// Push a raw value. Returns the EMA once the seed window is complete.
    pub fn push(&mut self, x: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                let next = self.alpha * x + (1.0 - self.alpha) * prev;
                self.value = Some(next);
            }
            None => {
                self.seed_sum += x;
                self.seen += 1;
                if self.seen == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn clear(&mut self) {
        self.seed_sum = 0.0;
        self.seen = 0;
        self.value = None;
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.push(self.source.pick(bar)).map(IndicatorValue::Single)
    }

    fn is_formed(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.clear();
    }
}
