use std::collections::VecDeque;

use common::Bar;

use super::{Indicator, IndicatorValue, Source};

/// Simple moving average over the last `period` values.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    source: Source,
    name: String,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize, source: Source) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            source,
            name: format!("sma_{period}"),
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        }
    }

    /// Push a raw value. Returns the average once `period` values are held.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.push(self.source.pick(bar)).map(IndicatorValue::Single)
    }

    fn is_formed(&self) -> bool {
        self.window.len() == self.period
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    #[test]
    fn sma_forms_after_period_values() {
        let mut sma = Sma::new(3, Source::Close);
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0]);
        assert!(sma.update(&bars[0]).is_none());
        assert!(sma.update(&bars[1]).is_none());
        assert_approx(sma.update(&bars[2]).unwrap().primary(), 2.0, 1e-12);
        assert_approx(sma.update(&bars[3]).unwrap().primary(), 3.0, 1e-12);
    }

    #[test]
    fn sma_of_volume_reads_volume() {
        let mut sma = Sma::new(2, Source::Volume);
        let bars = make_bars(&[5.0, 6.0]);
        sma.update(&bars[0]);
        assert_approx(sma.update(&bars[1]).unwrap().primary(), 1000.0, 1e-12);
    }
}
