use tracing::debug;

use common::Signal;

use super::{crossed_above, crossed_below, SignalContext, SignalEvaluator, SignalOutput};
use crate::snapshot::Reading;

/// Breadth thrust across a basket of peer instruments.
///
/// Breadth is the fraction of peers closing above their own moving average
/// (indicator `ma` in each peer's pipeline). A rise through `threshold`
/// goes long; a fall through `exit_threshold` exits.
#[derive(Debug, Clone)]
pub struct Breadth {
    peers: Vec<String>,
    ma: usize,
    threshold: f64,
    exit_threshold: Option<f64>,
}

impl Breadth {
    pub fn new(peers: Vec<String>, ma: usize, threshold: f64, exit_threshold: Option<f64>) -> Self {
        Self { peers, ma, threshold, exit_threshold }
    }

    /// `(previous, current)` breadth, or `None` if any peer lacks two formed readings.
    fn breadth(&self, ctx: &SignalContext<'_>) -> Option<(f64, f64)> {
        let above = |r: &Reading| r.value(self.ma).map(|ma| r.close > ma);
        let mut prev_up = 0usize;
        let mut curr_up = 0usize;
        for peer in &self.peers {
            let published = match ctx.peer(peer) {
                Ok(p) => p,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Breadth unavailable");
                    return None;
                }
            };
            let previous = published.previous.as_ref()?;
            prev_up += usize::from(above(previous)?);
            curr_up += usize::from(above(&published.current)?);
        }
        let n = self.peers.len() as f64;
        Some((prev_up as f64 / n, curr_up as f64 / n))
    }
}

impl SignalEvaluator for Breadth {
    fn name(&self) -> &str {
        "breadth"
    }

    fn lookback(&self) -> usize {
        1
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput {
        let Some((prev, curr)) = self.breadth(ctx) else {
            return SignalOutput::neutral();
        };
        if crossed_above(prev, curr, self.threshold) {
            return SignalOutput::of(Signal::Long);
        }
        if let Some(exit) = self.exit_threshold {
            if crossed_below(prev, curr, exit) {
                return SignalOutput::of(Signal::ExitLong);
            }
        }
        SignalOutput::neutral()
    }
}
