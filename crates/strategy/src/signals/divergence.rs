use common::Signal;

use super::{SignalContext, SignalEvaluator, SignalOutput};
use crate::pipeline::InputRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bullish,
    Bearish,
}

/// Price and oscillator slopes disagreeing over `slope_bars`.
///
/// Falling price with a rising oscillator is bullish, the reverse bearish.
/// The divergence must hold on `confirm_bars` consecutive bars and fires
/// once, on the bar the streak completes.
#[derive(Debug, Clone)]
pub struct Divergence {
    oscillator: InputRef,
    slope_bars: usize,
    confirm_bars: usize,
}

impl Divergence {
    pub fn new(oscillator: InputRef, slope_bars: usize, confirm_bars: usize) -> Self {
        Self {
            oscillator,
            slope_bars: slope_bars.max(1),
            confirm_bars: confirm_bars.max(1),
        }
    }

    /// Divergence measured at `back` bars before the current one.
    fn kind_at(&self, ctx: &SignalContext<'_>, back: usize) -> Option<Kind> {
        let now = ctx.frame(back)?;
        let then = ctx.frame(back + self.slope_bars)?;
        let price_slope = now.close() - then.close();
        let osc_slope = now.read(self.oscillator)? - then.read(self.oscillator)?;
        if price_slope < 0.0 && osc_slope > 0.0 {
            Some(Kind::Bullish)
        } else if price_slope > 0.0 && osc_slope < 0.0 {
            Some(Kind::Bearish)
        } else {
            None
        }
    }
}

impl SignalEvaluator for Divergence {
    fn name(&self) -> &str {
        "divergence"
    }

    fn lookback(&self) -> usize {
        self.slope_bars + self.confirm_bars
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput {
        let Some(kind) = self.kind_at(ctx, 0) else {
            return SignalOutput::neutral();
        };
        if (1..self.confirm_bars).any(|back| self.kind_at(ctx, back) != Some(kind)) {
            return SignalOutput::neutral();
        }
        // Already fired when the streak started earlier.
        if self.kind_at(ctx, self.confirm_bars) == Some(kind) {
            return SignalOutput::neutral();
        }
        SignalOutput::of(match kind {
            Kind::Bullish => Signal::Long,
            Kind::Bearish => Signal::Short,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testing::{frames, history_of, singles};

    fn run(eval: &Divergence, closes: &[f64], osc: &[f64]) -> Vec<Signal> {
        let fs = frames(closes, singles(&[osc]));
        (0..fs.len())
            .map(|i| {
                let h = history_of(&fs, i, 16);
                let ctx = SignalContext { bar: &fs[i].bar, frames: &h, peers: None };
                eval.evaluate(&ctx).signal
            })
            .collect()
    }

    #[test]
    fn lower_low_with_higher_oscillator_is_bullish() {
        let eval = Divergence::new(InputRef::Index(0), 2, 1);
        let signals = run(&eval, &[10.0, 9.0, 8.0], &[30.0, 35.0, 40.0]);
        assert_eq!(signals, vec![Signal::Neutral, Signal::Neutral, Signal::Long]);
    }

    #[test]
    fn higher_high_with_lower_oscillator_is_bearish() {
        let eval = Divergence::new(InputRef::Index(0), 1, 1);
        let signals = run(&eval, &[10.0, 11.0], &[70.0, 60.0]);
        assert_eq!(signals[1], Signal::Short);
    }

    #[test]
    fn confirmation_fires_once_when_streak_completes() {
        let eval = Divergence::new(InputRef::Index(0), 1, 2);
        let signals = run(&eval, &[10.0, 9.0, 8.0, 7.0], &[30.0, 31.0, 32.0, 33.0]);
        assert_eq!(signals, vec![Signal::Neutral, Signal::Neutral, Signal::Long, Signal::Neutral]);
    }

    #[test]
    fn agreeing_slopes_are_neutral() {
        let eval = Divergence::new(InputRef::Index(0), 1, 1);
        let signals = run(&eval, &[10.0, 11.0, 12.0], &[50.0, 55.0, 60.0]);
        assert!(signals.iter().all(|s| *s == Signal::Neutral));
    }
}
