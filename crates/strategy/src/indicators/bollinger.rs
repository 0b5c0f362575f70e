use std::collections::VecDeque;

use common::Bar;

use super::{Indicator, IndicatorValue, Source};

/// Bollinger bands: SMA middle, `width` population standard deviations out.
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    width: f64,
    source: Source,
    name: String,
    window: VecDeque<f64>,
}

impl Bollinger {
    pub fn new(period: usize, width: f64, source: Source) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self {
            period,
            width,
            source,
            name: format!("bollinger_{period}"),
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push_back(self.source.pick(bar));
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        // Recomputed from the window each bar so replays stay bit-identical.
        let n = self.period as f64;
        let middle = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / n;
        let offset = self.width * variance.sqrt();
        Some(IndicatorValue::Band {
            upper: middle + offset,
            middle,
            lower: middle - offset,
        })
    }

    fn is_formed(&self) -> bool {
        self.window.len() == self.period
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}
