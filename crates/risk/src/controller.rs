use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use common::{Bar, Direction, ExitReason};

use crate::ratchet;

// ─── Configuration ────────────────────────────────────────────────────────────

/// How initial stop / take levels are derived when a position opens.
/// Exactly one method is active per strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LevelMethod {
    /// Fractions of the entry price (0.02 = 2%).
    Percent {
        #[serde(default)]
        stop: Option<f64>,
        #[serde(default)]
        take: Option<f64>,
    },
    /// Absolute price distances from entry.
    PriceDistance {
        #[serde(default)]
        stop: Option<f64>,
        #[serde(default)]
        take: Option<f64>,
    },
    /// Multiples of the ATR at entry.
    Atr {
        #[serde(default)]
        stop_multiplier: Option<f64>,
        #[serde(default)]
        take_multiplier: Option<f64>,
    },
    /// Stop beyond the recent swing low/high; take at `reward_ratio` times the risk.
    Structural {
        lookback: usize,
        #[serde(default)]
        buffer: f64,
        #[serde(default)]
        reward_ratio: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Favorable excursion (price units) before trailing starts.
    pub activation_distance: f64,
    /// Distance kept between the best close and the stop.
    pub trailing_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum BreakEvenTrigger {
    /// Intrabar favorable excursion reached `distance`.
    Distance { distance: f64 },
    /// The partial target was taken.
    PartialTake,
    /// Price touched the band opposite to the entry side.
    OppositeBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakEvenConfig {
    #[serde(flatten)]
    pub trigger: BreakEvenTrigger,
    /// Stop is placed at `entry + offset` in the position's favor.
    #[serde(default)]
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialTakeConfig {
    /// Favorable distance from entry at which the first chunk is closed.
    pub distance: f64,
    /// Fraction of the open volume to close, in (0, 1).
    pub fraction: f64,
}

/// Risk parameters of one strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub levels: Option<LevelMethod>,
    #[serde(default)]
    pub trailing: Option<TrailingConfig>,
    #[serde(default)]
    pub break_even: Option<BreakEvenConfig>,
    #[serde(default)]
    pub partial_take: Option<PartialTakeConfig>,
    #[serde(default)]
    pub max_hold_bars: Option<u32>,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        let positive = |v: Option<f64>, name: &str| match v {
            Some(x) if !(x > 0.0) => Err(format!("{name} must be > 0")),
            _ => Ok(()),
        };
        match &self.levels {
            Some(LevelMethod::Percent { stop, take }) => {
                positive(*stop, "percent stop")?;
                positive(*take, "percent take")?;
                if stop.map_or(false, |s| s >= 1.0) {
                    return Err("percent stop must be below 1.0".into());
                }
            }
            Some(LevelMethod::PriceDistance { stop, take }) => {
                positive(*stop, "stop distance")?;
                positive(*take, "take distance")?;
            }
            Some(LevelMethod::Atr { stop_multiplier, take_multiplier }) => {
                positive(*stop_multiplier, "stop_multiplier")?;
                positive(*take_multiplier, "take_multiplier")?;
            }
            Some(LevelMethod::Structural { lookback, buffer, reward_ratio }) => {
                if *lookback == 0 {
                    return Err("structural lookback must be >= 1".into());
                }
                if *buffer < 0.0 {
                    return Err("structural buffer must be >= 0".into());
                }
                positive(*reward_ratio, "reward_ratio")?;
            }
            None => {}
        }
        if let Some(t) = &self.trailing {
            positive(Some(t.trailing_distance), "trailing_distance")?;
            if t.activation_distance < 0.0 {
                return Err("activation_distance must be >= 0".into());
            }
        }
        if let Some(p) = &self.partial_take {
            positive(Some(p.distance), "partial_take distance")?;
            if !(p.fraction > 0.0 && p.fraction < 1.0) {
                return Err("partial_take fraction must be in (0, 1)".into());
            }
        }
        if let Some(be) = &self.break_even {
            match be.trigger {
                BreakEvenTrigger::Distance { distance } => positive(Some(distance), "break_even distance")?,
                BreakEvenTrigger::PartialTake if self.partial_take.is_none() => {
                    return Err("break_even on partial_take requires partial_take".into());
                }
                _ => {}
            }
            if be.offset < 0.0 {
                return Err("break_even offset must be >= 0".into());
            }
        }
        if self.max_hold_bars == Some(0) {
            return Err("max_hold_bars must be >= 1".into());
        }
        Ok(())
    }

    /// Bars of history the structural method needs for its swing extremes.
    pub fn swing_lookback(&self) -> Option<usize> {
        match self.levels {
            Some(LevelMethod::Structural { lookback, .. }) => Some(lookback),
            _ => None,
        }
    }

    pub fn needs_atr(&self) -> bool {
        matches!(
            self.levels,
            Some(LevelMethod::Atr { stop_multiplier: Some(_), .. })
                | Some(LevelMethod::Atr { take_multiplier: Some(_), .. })
        )
    }
}

// ─── Level computation ────────────────────────────────────────────────────────

/// Market context available when levels are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelInputs {
    pub atr: Option<f64>,
    pub swing_low: Option<f64>,
    pub swing_high: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InitialLevels {
    pub stop: Option<f64>,
    pub take: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("{0} is not formed")]
    NotFormed(&'static str),

    #[error("cannot place risk levels for a flat position")]
    FlatPosition,

    #[error("{which} level {level} is on the wrong side of entry {entry}")]
    WrongSide {
        which: &'static str,
        level: f64,
        entry: f64,
    },
}

impl From<RiskError> for common::Error {
    fn from(e: RiskError) -> Self {
        match e {
            RiskError::NotFormed(what) => common::Error::NotFormed(what.to_string()),
            other => common::Error::InvalidSizing(other.to_string()),
        }
    }
}

/// Compute initial stop / take for a position entered at `entry`.
pub fn compute_levels(
    method: Option<&LevelMethod>,
    direction: Direction,
    entry: f64,
    inputs: &LevelInputs,
) -> Result<InitialLevels, RiskError> {
    let sign = match direction {
        Direction::Flat => return Err(RiskError::FlatPosition),
        d => d.sign(),
    };
    let Some(method) = method else {
        return Ok(InitialLevels::default());
    };

    let levels = match method {
        LevelMethod::Percent { stop, take } => InitialLevels {
            stop: stop.map(|p| entry * (1.0 - sign * p)),
            take: take.map(|p| entry * (1.0 + sign * p)),
        },
        LevelMethod::PriceDistance { stop, take } => InitialLevels {
            stop: stop.map(|d| entry - sign * d),
            take: take.map(|d| entry + sign * d),
        },
        LevelMethod::Atr { stop_multiplier, take_multiplier } => {
            let atr = inputs.atr.ok_or(RiskError::NotFormed("ATR"))?;
            InitialLevels {
                stop: stop_multiplier.map(|m| entry - sign * m * atr),
                take: take_multiplier.map(|m| entry + sign * m * atr),
            }
        }
        LevelMethod::Structural { buffer, reward_ratio, .. } => {
            let stop = match direction {
                Direction::Long => inputs.swing_low.ok_or(RiskError::NotFormed("swing low"))? - buffer,
                _ => inputs.swing_high.ok_or(RiskError::NotFormed("swing high"))? + buffer,
            };
            let risk = (entry - stop) * sign;
            InitialLevels {
                stop: Some(stop),
                take: reward_ratio.map(|r| entry + sign * r * risk),
            }
        }
    };

    if let Some(stop) = levels.stop {
        if (entry - stop) * sign <= 0.0 {
            return Err(RiskError::WrongSide { which: "stop", level: stop, entry });
        }
    }
    if let Some(take) = levels.take {
        if (take - entry) * sign <= 0.0 {
            return Err(RiskError::WrongSide { which: "take", level: take, entry });
        }
    }
    Ok(levels)
}

// ─── State machine ────────────────────────────────────────────────────────────

/// Live risk state of the open position. Exists only while not flat.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLevels {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: Option<f64>,
    pub take_price: Option<f64>,
    /// Best close seen since trailing activated.
    pub trailing_anchor: Option<f64>,
    pub break_even_armed: bool,
    pub partial_taken: bool,
    pub max_hold_bars: Option<u32>,
    pub bars_held: u32,
}

/// What the controller wants done on this bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskDecision {
    Hold,
    /// Close part of the position and stay armed.
    Reduce { fraction: f64, price: f64 },
    /// Close everything.
    Exit { reason: ExitReason, price: f64 },
}

/// Owns stop / take / trailing / break-even / time-exit state for one position.
#[derive(Debug, Clone)]
pub struct RiskController {
    config: RiskConfig,
    levels: Option<RiskLevels>,
}

impl RiskController {
    pub fn new(config: RiskConfig) -> Self {
        Self { config, levels: None }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn levels(&self) -> Option<&RiskLevels> {
        self.levels.as_ref()
    }

    /// Arm the controller for a freshly opened position.
    pub fn init(
        &mut self,
        direction: Direction,
        entry_price: f64,
        inputs: &LevelInputs,
    ) -> Result<&RiskLevels, RiskError> {
        let initial = compute_levels(self.config.levels.as_ref(), direction, entry_price, inputs)?;
        debug!(
            %direction,
            entry = entry_price,
            stop = ?initial.stop,
            take = ?initial.take,
            "Risk levels initialised"
        );
        Ok(&*self.levels.insert(RiskLevels {
            direction,
            entry_price,
            stop_price: initial.stop,
            take_price: initial.take,
            trailing_anchor: None,
            break_even_armed: false,
            partial_taken: false,
            max_hold_bars: self.config.max_hold_bars,
            bars_held: 0,
        }))
    }

    /// Move the reference entry after a pyramid add. Stops are left alone.
    pub fn rebase_entry(&mut self, average_entry_price: f64) {
        if let Some(levels) = self.levels.as_mut() {
            levels.entry_price = average_entry_price;
        }
    }

    /// Drop all state once the position is flat.
    pub fn clear(&mut self) {
        self.levels = None;
    }

    /// Evaluate one final bar against the open position.
    ///
    /// Close conditions are checked against intrabar extremes in fixed
    /// priority: stop-loss, take-profit, time exit. Level adjustments
    /// (partial take, break-even, trailing) happen only when nothing closed
    /// and take effect from the next bar.
    pub fn evaluate(&mut self, bar: &Bar, opposite_band_touched: bool) -> RiskDecision {
        let config = &self.config;
        let Some(levels) = self.levels.as_mut() else {
            return RiskDecision::Hold;
        };
        let sign = levels.direction.sign();
        levels.bars_held += 1;

        if let Some(stop) = levels.stop_price {
            let hit = match levels.direction {
                Direction::Long => bar.low <= stop,
                _ => bar.high >= stop,
            };
            if hit {
                return RiskDecision::Exit {
                    reason: ExitReason::StopLoss,
                    price: gap_adjusted(bar.open, stop, -sign),
                };
            }
        }

        if let Some(take) = levels.take_price {
            let hit = match levels.direction {
                Direction::Long => bar.high >= take,
                _ => bar.low <= take,
            };
            if hit {
                return RiskDecision::Exit {
                    reason: ExitReason::TakeProfit,
                    price: gap_adjusted(bar.open, take, sign),
                };
            }
        }

        if let Some(max) = levels.max_hold_bars {
            if levels.bars_held >= max {
                return RiskDecision::Exit {
                    reason: ExitReason::TimeExit,
                    price: bar.close,
                };
            }
        }

        let mut decision = RiskDecision::Hold;
        let excursion = match levels.direction {
            Direction::Long => bar.high - levels.entry_price,
            _ => levels.entry_price - bar.low,
        };

        if let Some(partial) = &config.partial_take {
            if !levels.partial_taken && excursion >= partial.distance {
                levels.partial_taken = true;
                let target = levels.entry_price + sign * partial.distance;
                decision = RiskDecision::Reduce {
                    fraction: partial.fraction,
                    price: gap_adjusted(bar.open, target, sign),
                };
            }
        }

        if let Some(be) = &config.break_even {
            let triggered = match be.trigger {
                BreakEvenTrigger::Distance { distance } => excursion >= distance,
                BreakEvenTrigger::PartialTake => levels.partial_taken,
                BreakEvenTrigger::OppositeBand => opposite_band_touched,
            };
            if triggered && !levels.break_even_armed {
                levels.break_even_armed = true;
                let target = levels.entry_price + sign * be.offset;
                if ratchet::tighten(levels.direction, &mut levels.stop_price, target) {
                    debug!(stop = target, "Stop moved to break-even");
                }
            }
        }

        if let Some(trailing) = &config.trailing {
            let favorable = (bar.close - levels.entry_price) * sign;
            if favorable >= trailing.activation_distance {
                let anchor = match levels.trailing_anchor {
                    Some(a) if (a - bar.close) * sign >= 0.0 => a,
                    _ => bar.close,
                };
                levels.trailing_anchor = Some(anchor);
                let candidate = anchor - sign * trailing.trailing_distance;
                if ratchet::tighten(levels.direction, &mut levels.stop_price, candidate) {
                    debug!(stop = candidate, anchor, "Trailing stop ratcheted");
                }
            }
        }

        decision
    }
}

/// Fill price for a level crossed intrabar: the level itself, or the open
/// when the bar gapped through it. `adverse` is the sign of price movement
/// that makes the gap worse than the level (-1 below, +1 above).
fn gap_adjusted(open: f64, level: f64, adverse: f64) -> f64 {
    if (open - level) * adverse > 0.0 {
        open
    } else {
        level
    }
}
