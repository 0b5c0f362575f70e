//! Signal rules over indicator frames.
//!
//! Evaluators are pure: the same frames and snapshot view always give the
//! same output. They never mutate position or risk state.

pub mod breadth;
pub mod breakout;
pub mod crossover;
pub mod divergence;
pub mod filter;
pub mod threshold;

pub use breadth::Breadth;
pub use breakout::BandBreakout;
pub use crossover::MaCrossover;
pub use divergence::Divergence;
pub use filter::Filter;
pub use threshold::{ThresholdCross, ThresholdMode};

use serde::{Deserialize, Serialize};

use common::{Bar, Direction, Error, Result, Signal};

use crate::history::History;
use crate::pipeline::{Frame, InputRef};
use crate::snapshot::{PublishedValue, SnapshotView};

// ─── Evaluation context ──────────────────────────────────────────────────────

/// Everything an evaluator may read for one bar.
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    pub bar: &'a Bar,
    /// Formed frames, newest last. The current bar's frame is `frame(0)`.
    pub frames: &'a History<Frame>,
    pub peers: Option<&'a SnapshotView>,
}

impl<'a> SignalContext<'a> {
    pub fn frame(&self, back: usize) -> Option<&'a Frame> {
        self.frames.get(back)
    }

    pub fn peer(&self, instrument: &str) -> Result<&'a PublishedValue> {
        match self.peers {
            Some(view) => view.get(instrument),
            None => Err(Error::StaleSnapshot(instrument.to_string())),
        }
    }
}

/// Evaluator output: the signal plus any price it was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalOutput {
    pub signal: Signal,
    /// Level whose crossing produced the signal, used for stop/limit entries.
    pub breakout_price: Option<f64>,
}

impl SignalOutput {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn of(signal: Signal) -> Self {
        Self {
            signal,
            breakout_price: None,
        }
    }

    pub fn at(signal: Signal, price: f64) -> Self {
        Self {
            signal,
            breakout_price: Some(price),
        }
    }
}

// ─── Evaluator trait ─────────────────────────────────────────────────────────

pub trait SignalEvaluator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Frames required, including the current one.
    fn lookback(&self) -> usize;

    fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalOutput;

    /// Whether the current bar touched the band opposite to an open position.
    /// Rules without a band never report a touch.
    fn opposite_band_touched(&self, _ctx: &SignalContext<'_>, _direction: Direction) -> bool {
        false
    }
}

// ─── Crossing predicates ─────────────────────────────────────────────────────

/// Touching the level on the previous bar and closing beyond it counts.
pub fn crossed_above(prev: f64, curr: f64, level: f64) -> bool {
    prev <= level && curr > level
}

pub fn crossed_below(prev: f64, curr: f64, level: f64) -> bool {
    prev >= level && curr < level
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    Above,
    Below,
}

/// Crossing of `fast` over `slow` between two consecutive bars.
pub fn crossover(prev_fast: f64, prev_slow: f64, fast: f64, slow: f64) -> Option<Cross> {
    if prev_fast <= prev_slow && fast > slow {
        Some(Cross::Above)
    } else if prev_fast >= prev_slow && fast < slow {
        Some(Cross::Below)
    } else {
        None
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SignalSpec {
    Threshold {
        input: InputRef,
        lower: f64,
        upper: f64,
        #[serde(default)]
        mode: ThresholdMode,
        #[serde(default)]
        exit_level: Option<f64>,
    },
    Crossover {
        fast: InputRef,
        slow: InputRef,
        #[serde(default)]
        filters: Vec<Filter>,
    },
    BandBreakout {
        band: usize,
        #[serde(default)]
        filters: Vec<Filter>,
        #[serde(default)]
        exit_at_middle: bool,
    },
    Divergence {
        oscillator: InputRef,
        slope_bars: usize,
        #[serde(default = "default_confirm_bars")]
        confirm_bars: usize,
    },
    Breadth {
        peers: Vec<String>,
        /// Indicator index compared against each peer's close.
        ma: usize,
        threshold: f64,
        #[serde(default)]
        exit_threshold: Option<f64>,
    },
}

fn default_confirm_bars() -> usize {
    1
}

fn check_input(input: InputRef, cells: usize, what: &str) -> std::result::Result<(), String> {
    if input.index() >= cells {
        return Err(format!(
            "{what} refers to indicator {} but only {cells} are configured",
            input.index()
        ));
    }
    Ok(())
}

impl SignalSpec {
    /// Check indicator references against a pipeline of `cells` indicators.
    pub fn validate(&self, cells: usize) -> std::result::Result<(), String> {
        match self {
            SignalSpec::Threshold { input, lower, upper, .. } => {
                check_input(*input, cells, "threshold input")?;
                if lower >= upper {
                    return Err(format!("threshold lower {lower} must be below upper {upper}"));
                }
            }
            SignalSpec::Crossover { fast, slow, filters } => {
                check_input(*fast, cells, "crossover fast")?;
                check_input(*slow, cells, "crossover slow")?;
                for f in filters {
                    f.validate(cells)?;
                }
            }
            SignalSpec::BandBreakout { band, filters, .. } => {
                check_input(InputRef::Index(*band), cells, "breakout band")?;
                for f in filters {
                    f.validate(cells)?;
                }
            }
            SignalSpec::Divergence { oscillator, slope_bars, confirm_bars } => {
                check_input(*oscillator, cells, "divergence oscillator")?;
                if *slope_bars == 0 || *confirm_bars == 0 {
                    return Err("divergence slope_bars and confirm_bars must be >= 1".into());
                }
            }
            SignalSpec::Breadth { peers, ma, threshold, exit_threshold } => {
                if peers.is_empty() {
                    return Err("breadth needs at least one peer".into());
                }
                if *ma >= cells {
                    return Err(format!("breadth ma index {ma} out of range"));
                }
                let in_unit = |x: f64| (0.0..=1.0).contains(&x);
                if !in_unit(*threshold) || !exit_threshold.map_or(true, in_unit) {
                    return Err("breadth thresholds must lie in [0, 1]".into());
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn SignalEvaluator> {
        match self.clone() {
            SignalSpec::Threshold { input, lower, upper, mode, exit_level } => {
                Box::new(ThresholdCross::new(input, lower, upper, mode, exit_level))
            }
            SignalSpec::Crossover { fast, slow, filters } => {
                Box::new(MaCrossover::new(fast, slow, filters))
            }
            SignalSpec::BandBreakout { band, filters, exit_at_middle } => {
                Box::new(BandBreakout::new(band, filters, exit_at_middle))
            }
            SignalSpec::Divergence { oscillator, slope_bars, confirm_bars } => {
                Box::new(Divergence::new(oscillator, slope_bars, confirm_bars))
            }
            SignalSpec::Breadth { peers, ma, threshold, exit_threshold } => {
                Box::new(Breadth::new(peers, ma, threshold, exit_threshold))
            }
        }
    }

    /// Peer instruments this rule reads from the snapshot.
    pub fn peers(&self) -> Vec<String> {
        let from_filters = |filters: &[Filter]| -> Vec<String> {
            filters
                .iter()
                .filter_map(|f| match f {
                    Filter::PeerTrend { instrument, .. } => Some(instrument.clone()),
                    _ => None,
                })
                .collect()
        };
        match self {
            SignalSpec::Breadth { peers, .. } => peers.clone(),
            SignalSpec::Crossover { filters, .. } | SignalSpec::BandBreakout { filters, .. } => {
                from_filters(filters)
            }
            _ => Vec::new(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_then_crossing_counts() {
        assert!(crossed_above(10.0, 10.5, 10.0));
        assert!(crossed_above(9.0, 10.5, 10.0));
        assert!(!crossed_above(10.0, 10.0, 10.0));
        assert!(!crossed_above(10.5, 11.0, 10.0));
        assert!(crossed_below(10.0, 9.5, 10.0));
        assert!(!crossed_below(9.5, 9.0, 10.0));
    }

    #[test]
    fn crossover_direction() {
        assert_eq!(crossover(1.0, 2.0, 3.0, 2.0), Some(Cross::Above));
        assert_eq!(crossover(3.0, 2.0, 1.0, 2.0), Some(Cross::Below));
        assert_eq!(crossover(3.0, 2.0, 4.0, 2.0), None);
    }

    #[test]
    fn spec_validation_catches_bad_indices() {
        let spec = SignalSpec::Crossover {
            fast: InputRef::Index(0),
            slow: InputRef::Index(2),
            filters: vec![],
        };
        assert!(spec.validate(2).is_err());
        assert!(spec.validate(3).is_ok());
    }

    #[test]
    fn breadth_peers_are_reported() {
        let spec = SignalSpec::Breadth {
            peers: vec!["ETH".into(), "SOL".into()],
            ma: 0,
            threshold: 0.6,
            exit_threshold: None,
        };
        assert_eq!(spec.peers(), vec!["ETH".to_string(), "SOL".to_string()]);
    }
}
