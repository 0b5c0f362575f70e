use std::collections::VecDeque;

use common::Bar;

use super::{Indicator, IndicatorValue};

/// Price channel: highest high and lowest low over the last `period` bars,
/// middle halfway between.
#[derive(Debug, Clone)]
pub struct Channel {
    period: usize,
    name: String,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
}

impl Channel {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "channel period must be >= 1");
        Self {
            period,
            name: format!("channel_{period}"),
            highs: VecDeque::with_capacity(period + 1),
            lows: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Channel {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.highs.push_back(bar.high);
        self.lows.push_back(bar.low);
        if self.highs.len() > self.period {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.period {
            return None;
        }
        let upper = self.highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lower = self.lows.iter().copied().fold(f64::INFINITY, f64::min);
        Some(IndicatorValue::Band {
            upper,
            middle: (upper + lower) / 2.0,
            lower,
        })
    }

    fn is_formed(&self) -> bool {
        self.highs.len() == self.period
    }

    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;

    #[test]
    fn channel_tracks_rolling_extremes() {
        let mut ch = Channel::new(3);
        let bars = make_bars(&[10.0, 12.0, 11.0, 9.0]);
        let values: Vec<_> = bars.iter().filter_map(|b| ch.update(b)).collect();
        assert_eq!(values.len(), 2);
        // bars[1]: open 10 close 12 -> high 13; bars[3]: open 11 close 9 -> low 8
        assert_eq!(values[1].field(crate::indicators::Field::Upper), Some(13.0));
        assert_eq!(values[1].field(crate::indicators::Field::Lower), Some(8.0));
    }
}
