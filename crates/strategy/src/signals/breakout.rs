use common::{Direction, Signal};

use super::filter::{all_allow, Filter};
use super::{crossed_above, crossed_below, SignalContext, SignalEvaluator, SignalOutput};

/// Close beyond the previous bar's band, optionally confirmed by filters.
#[derive(Debug, Clone)]
pub struct BandBreakout {
    band: usize,
    filters: Vec<Filter>,
    exit_at_middle: bool,
}

impl BandBreakout {
    pub fn new(band: usize, filters: Vec<Filter>, exit_at_middle: bool) -> Self {
        Self { band, filters, exit_at_middle }
    }
}

impl SignalEvaluator for BandBreakout {
    fn name(&self) -> &str {
        "band_breakout"
    }

    fn lookback(&self) -> usize {
        2
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput {
        let (Some(curr), Some(prev)) = (ctx.frame(0), ctx.frame(1)) else {
            return SignalOutput::neutral();
        };
        // The previous band excludes the current bar's own range.
        let Some((upper, _, lower)) = prev.band(self.band) else {
            return SignalOutput::neutral();
        };
        let close = curr.close();

        if close > upper && all_allow(&self.filters, ctx, Direction::Long) {
            return SignalOutput::at(Signal::Long, upper);
        }
        if close < lower && all_allow(&self.filters, ctx, Direction::Short) {
            return SignalOutput::at(Signal::Short, lower);
        }

        if self.exit_at_middle {
            if let Some((_, middle, _)) = curr.band(self.band) {
                if crossed_below(prev.close(), close, middle) {
                    return SignalOutput::of(Signal::ExitLong);
                }
                if crossed_above(prev.close(), close, middle) {
                    return SignalOutput::of(Signal::ExitShort);
                }
            }
        }
        SignalOutput::neutral()
    }

    fn opposite_band_touched(&self, ctx: &SignalContext<'_>, direction: Direction) -> bool {
        let Some((upper, _, lower)) = ctx.frame(0).and_then(|f| f.band(self.band)) else {
            return false;
        };
        match direction {
            Direction::Long => ctx.bar.low <= lower,
            Direction::Short => ctx.bar.high >= upper,
            Direction::Flat => false,
        }
    }
}
