use serde::{Deserialize, Serialize};

use common::Signal;

use super::{crossed_above, crossed_below, SignalContext, SignalEvaluator, SignalOutput};
use crate::pipeline::InputRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Buy the recovery from below `lower`, sell the fall back from above `upper`.
    #[default]
    Reversion,
    /// Buy the push through `upper`, sell the break of `lower`.
    Momentum,
}

/// Oscillator crossing fixed levels (RSI 30/70 style).
#[derive(Debug, Clone)]
pub struct ThresholdCross {
    input: InputRef,
    lower: f64,
    upper: f64,
    mode: ThresholdMode,
    exit_level: Option<f64>,
}

impl ThresholdCross {
    pub fn new(
        input: InputRef,
        lower: f64,
        upper: f64,
        mode: ThresholdMode,
        exit_level: Option<f64>,
    ) -> Self {
        Self { input, lower, upper, mode, exit_level }
    }
}

impl SignalEvaluator for ThresholdCross {
    fn name(&self) -> &str {
        "threshold"
    }

    fn lookback(&self) -> usize {
        2
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput {
        let (Some(curr), Some(prev)) = (ctx.frame(0), ctx.frame(1)) else {
            return SignalOutput::neutral();
        };
        let (Some(v), Some(p)) = (curr.read(self.input), prev.read(self.input)) else {
            return SignalOutput::neutral();
        };

        let entry = match self.mode {
            ThresholdMode::Reversion => {
                if crossed_above(p, v, self.lower) {
                    Some(SignalOutput::at(Signal::Long, self.lower))
                } else if crossed_below(p, v, self.upper) {
                    Some(SignalOutput::at(Signal::Short, self.upper))
                } else {
                    None
                }
            }
            ThresholdMode::Momentum => {
                if crossed_above(p, v, self.upper) {
                    Some(SignalOutput::at(Signal::Long, self.upper))
                } else if crossed_below(p, v, self.lower) {
                    Some(SignalOutput::at(Signal::Short, self.lower))
                } else {
                    None
                }
            }
        };
        if let Some(out) = entry {
            return out;
        }

        let Some(exit) = self.exit_level else {
            return SignalOutput::neutral();
        };
        let (up, down) = (crossed_above(p, v, exit), crossed_below(p, v, exit));
        let signal = match self.mode {
            ThresholdMode::Reversion if up => Signal::ExitLong,
            ThresholdMode::Reversion if down => Signal::ExitShort,
            ThresholdMode::Momentum if down => Signal::ExitLong,
            ThresholdMode::Momentum if up => Signal::ExitShort,
            _ => Signal::Neutral,
        };
        SignalOutput::of(signal)
    }
}
