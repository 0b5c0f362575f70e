use common::Bar;

use super::{Indicator, IndicatorValue};

/// Average True Range with Wilder smoothing.
///
/// The first bar's true range is `high - low`; later bars include the gap
/// from the previous close. Seeded with the mean of the first `period` ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
    prev_close: Option<f64>,
    seen: usize,
    seed_sum: f64,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            name: format!("atr_{period}"),
            prev_close: None,
            seen: 0,
            seed_sum: 0.0,
            value: None,
        }
    }

    fn true_range(&self, bar: &Bar) -> f64 {
        let range = bar.high - bar.low;
        match self.prev_close {
            Some(pc) => range.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
            None => range,
        }
    }
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let tr = self.true_range(bar);
        self.prev_close = Some(bar.close);
        let n = self.period as f64;
        self.value = match self.value {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.seen += 1;
                self.seed_sum += tr;
                (self.seen == self.period).then(|| self.seed_sum / n)
            }
        };
        self.value.map(IndicatorValue::Single)
    }

    fn is_formed(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.seen = 0;
        self.seed_sum = 0.0;
        self.value = None;
    }
}
