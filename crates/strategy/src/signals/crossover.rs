use common::{Direction, Signal};

use super::filter::{all_allow, Filter};
use super::{crossover, Cross, SignalContext, SignalEvaluator, SignalOutput};
use crate::pipeline::InputRef;

/// Fast line crossing a slow line (MA pairs, MACD line vs signal).
#[derive(Debug, Clone)]
pub struct MaCrossover {
    fast: InputRef,
    slow: InputRef,
    filters: Vec<Filter>,
}

impl MaCrossover {
    pub fn new(fast: InputRef, slow: InputRef, filters: Vec<Filter>) -> Self {
        Self { fast, slow, filters }
    }
}

impl SignalEvaluator for MaCrossover {
    fn name(&self) -> &str {
        "crossover"
    }

    fn lookback(&self) -> usize {
        2
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput {
        let (Some(curr), Some(prev)) = (ctx.frame(0), ctx.frame(1)) else {
            return SignalOutput::neutral();
        };
        let readings = (
            prev.read(self.fast),
            prev.read(self.slow),
            curr.read(self.fast),
            curr.read(self.slow),
        );
        let (Some(pf), Some(ps), Some(f), Some(s)) = readings else {
            return SignalOutput::neutral();
        };
        let (signal, direction) = match crossover(pf, ps, f, s) {
            Some(Cross::Above) => (Signal::Long, Direction::Long),
            Some(Cross::Below) => (Signal::Short, Direction::Short),
            None => return SignalOutput::neutral(),
        };
        if !all_allow(&self.filters, ctx, direction) {
            return SignalOutput::neutral();
        }
        SignalOutput::at(signal, s)
    }
}
