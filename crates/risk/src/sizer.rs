use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::{Direction, PositionState, TradeOutcome};

/// How entry volume is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// Always `base_volume`.
    Fixed,
    /// Risk `risk_percent` of equity over the stop distance.
    RiskPercent,
    /// Multiply the last trade's volume after a loss, reset after a win.
    Martingale,
    /// `base_volume` entry plus geometric adds every `grid_step` of favorable movement.
    Pyramid,
}

/// Per-strategy sizing parameters. Immutable for the run.
///
/// Mode-specific fields are optional; setting a field that belongs to a
/// different mode is rejected by [`SizingConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    pub mode: SizingMode,
    pub base_volume: f64,
    /// Percent of equity risked per trade (1.0 = 1%).
    #[serde(default)]
    pub risk_percent: Option<f64>,
    #[serde(default)]
    pub martingale_multiplier: Option<f64>,
    pub max_volume: f64,
    /// Favorable price move required between pyramid entries.
    #[serde(default)]
    pub grid_step: Option<f64>,
    #[serde(default)]
    pub max_grid_levels: Option<u32>,
    /// Volume factor applied per grid level (`base_volume * level_scale^level`).
    #[serde(default = "default_level_scale")]
    pub level_scale: f64,
}

fn default_level_scale() -> f64 {
    1.0
}

impl SizingConfig {
    pub fn fixed(base_volume: f64, max_volume: f64) -> Self {
        Self {
            mode: SizingMode::Fixed,
            base_volume,
            risk_percent: None,
            martingale_multiplier: None,
            max_volume,
            grid_step: None,
            max_grid_levels: None,
            level_scale: 1.0,
        }
    }

    /// Reject contradictory or out-of-range parameters. Called once at startup.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_volume > 0.0) {
            return Err("base_volume must be > 0".into());
        }
        if !(self.max_volume >= self.base_volume) {
            return Err("max_volume must be >= base_volume".into());
        }
        if !(self.level_scale > 0.0) {
            return Err("level_scale must be > 0".into());
        }

        let grid_set = self.grid_step.is_some() || self.max_grid_levels.is_some();
        match self.mode {
            SizingMode::Fixed => {
                if self.risk_percent.is_some() || self.martingale_multiplier.is_some() || grid_set {
                    return Err("fixed sizing does not take risk, martingale or grid parameters".into());
                }
            }
            SizingMode::RiskPercent => {
                match self.risk_percent {
                    Some(p) if p > 0.0 && p <= 100.0 => {}
                    _ => return Err("risk_percent sizing needs risk_percent in (0, 100]".into()),
                }
                if self.martingale_multiplier.is_some() || grid_set {
                    return Err("risk_percent sizing cannot be combined with martingale or grid".into());
                }
            }
            SizingMode::Martingale => {
                match self.martingale_multiplier {
                    Some(m) if m >= 1.0 => {}
                    _ => return Err("martingale sizing needs martingale_multiplier >= 1".into()),
                }
                if self.risk_percent.is_some() || grid_set {
                    return Err("martingale sizing cannot be combined with risk_percent or grid".into());
                }
            }
            SizingMode::Pyramid => {
                match self.grid_step {
                    Some(s) if s > 0.0 => {}
                    _ => return Err("pyramid sizing needs grid_step > 0".into()),
                }
                if self.max_grid_levels.is_none() {
                    return Err("pyramid sizing needs max_grid_levels".into());
                }
                if self.risk_percent.is_some() || self.martingale_multiplier.is_some() {
                    return Err("pyramid sizing cannot be combined with risk_percent or martingale".into());
                }
            }
        }
        Ok(())
    }
}

/// Volume granularity and bounds of the traded instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeConstraints {
    pub volume_step: f64,
    pub min_volume: f64,
    pub max_volume: f64,
}

impl Default for VolumeConstraints {
    fn default() -> Self {
        Self {
            volume_step: 0.001,
            min_volume: 0.001,
            max_volume: 1_000_000.0,
        }
    }
}

impl VolumeConstraints {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.volume_step > 0.0) {
            return Err("volume_step must be > 0".into());
        }
        if !(self.min_volume >= self.volume_step) {
            return Err("min_volume must be >= volume_step".into());
        }
        if !(self.max_volume >= self.min_volume) {
            return Err("max_volume must be >= min_volume".into());
        }
        Ok(())
    }

    /// Round down to a whole number of volume steps.
    pub fn floor_to_step(&self, raw: f64) -> f64 {
        if !raw.is_finite() || raw <= 0.0 {
            return 0.0;
        }
        // Tolerance keeps 0.3 / 0.1 from flooring to 2 steps.
        let steps = (raw / self.volume_step + 1e-9).floor();
        steps * self.volume_step
    }
}

/// Pyramid bookkeeping for the open position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GridState {
    /// Number of adds already filled on top of the initial entry.
    pub level: u32,
    pub last_entry_price: Option<f64>,
}

impl GridState {
    pub fn opened(price: f64) -> Self {
        Self {
            level: 0,
            last_entry_price: Some(price),
        }
    }

    pub fn record_add(&mut self, price: f64) {
        self.level += 1;
        self.last_entry_price = Some(price);
    }
}

/// Everything the sizer may look at for one decision.
#[derive(Debug, Clone, Copy)]
pub struct SizingInput<'a> {
    /// Direction of the order being sized.
    pub direction: Direction,
    pub price: f64,
    pub position: &'a PositionState,
    pub last_trade: Option<TradeOutcome>,
    pub equity: f64,
    /// Distance from entry to the initial stop, when one is configured.
    pub stop_distance: Option<f64>,
    pub grid: GridState,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("computed volume {raw} is not positive after step normalisation")]
    NonPositive { raw: f64 },

    #[error("computed volume {volume} is below the instrument minimum {min}")]
    BelowMinimum { volume: f64, min: f64 },

    #[error("computed volume {volume} exceeds the maximum {max}")]
    ExceedsMax { volume: f64, max: f64 },

    #[error("risk sizing needs a positive stop distance")]
    MissingStopDistance,

    #[error("adding to an open position requires pyramid sizing")]
    AddNotAllowed,

    #[error("price has not moved a full grid step beyond the last entry")]
    GridNotReady,

    #[error("all {levels} grid levels are used")]
    GridExhausted { levels: u32 },
}

impl SizingError {
    /// True for the expected "not yet" outcomes of pyramiding, as opposed
    /// to sizing failures worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SizingError::GridNotReady | SizingError::GridExhausted { .. } | SizingError::AddNotAllowed
        )
    }
}

impl From<SizingError> for common::Error {
    fn from(e: SizingError) -> Self {
        common::Error::InvalidSizing(e.to_string())
    }
}

/// Compute the volume for an entry, or for an add when `input.position`
/// already holds the same direction.
///
/// The result is always a whole number of volume steps inside
/// `[min_volume, min(config.max_volume, constraints.max_volume)]`. Only the
/// instrument limits clamp; a strategy cap that would be crossed is an error.
pub fn compute_volume(
    config: &SizingConfig,
    constraints: &VolumeConstraints,
    input: &SizingInput<'_>,
) -> Result<f64, SizingError> {
    let max = config.max_volume.min(constraints.max_volume);

    if !input.position.is_flat() && input.position.direction == input.direction {
        return grid_add_volume(config, constraints, input, max);
    }

    match config.mode {
        SizingMode::Fixed | SizingMode::Pyramid => bounded(config.base_volume, constraints, max),

        SizingMode::RiskPercent => {
            let distance = match input.stop_distance {
                Some(d) if d > 0.0 && d.is_finite() => d,
                _ => return Err(SizingError::MissingStopDistance),
            };
            let risk_percent = config.risk_percent.unwrap_or(0.0);
            let raw = input.equity * risk_percent / 100.0 / distance;
            let stepped = constraints.floor_to_step(raw);
            if stepped <= 0.0 {
                return Err(SizingError::NonPositive { raw });
            }
            let volume = stepped.clamp(constraints.min_volume, constraints.max_volume);
            if volume > config.max_volume + 1e-12 {
                return Err(SizingError::ExceedsMax {
                    volume,
                    max: config.max_volume,
                });
            }
            Ok(volume)
        }

        SizingMode::Martingale => {
            let multiplier = config.martingale_multiplier.unwrap_or(1.0);
            let raw = match input.last_trade {
                Some(trade) if trade.was_loss() => trade.volume * multiplier,
                _ => config.base_volume,
            };
            bounded(raw, constraints, max)
        }
    }
}

fn grid_add_volume(
    config: &SizingConfig,
    constraints: &VolumeConstraints,
    input: &SizingInput<'_>,
    max: f64,
) -> Result<f64, SizingError> {
    if config.mode != SizingMode::Pyramid {
        return Err(SizingError::AddNotAllowed);
    }
    let levels = config.max_grid_levels.unwrap_or(0);
    if input.grid.level >= levels {
        return Err(SizingError::GridExhausted { levels });
    }
    let step = config.grid_step.unwrap_or(f64::INFINITY);
    let last = input.grid.last_entry_price.unwrap_or(input.position.average_entry_price);
    let moved = (input.price - last) * input.direction.sign();
    if moved < step {
        return Err(SizingError::GridNotReady);
    }

    let next_level = input.grid.level + 1;
    let raw = config.base_volume * config.level_scale.powi(next_level as i32);
    bounded(raw, constraints, max)
}

/// Step-normalise and reject anything outside `[min, max]` instead of clamping.
fn bounded(raw: f64, constraints: &VolumeConstraints, max: f64) -> Result<f64, SizingError> {
    let stepped = constraints.floor_to_step(raw);
    if stepped <= 0.0 {
        return Err(SizingError::NonPositive { raw });
    }
    if stepped > max + 1e-12 {
        return Err(SizingError::ExceedsMax { volume: stepped, max });
    }
    if stepped < constraints.min_volume - 1e-12 {
        return Err(SizingError::BelowMinimum {
            volume: stepped,
            min: constraints.min_volume,
        });
    }
    Ok(stepped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_constraints() -> VolumeConstraints {
        VolumeConstraints {
            volume_step: 1.0,
            min_volume: 1.0,
            max_volume: 100.0,
        }
    }

    fn input<'a>(position: &'a PositionState, last_trade: Option<TradeOutcome>) -> SizingInput<'a> {
        SizingInput {
            direction: Direction::Long,
            price: 100.0,
            position,
            last_trade,
            equity: 10_000.0,
            stop_distance: None,
            grid: GridState::default(),
        }
    }

    fn martingale(max_volume: f64) -> SizingConfig {
        SizingConfig {
            mode: SizingMode::Martingale,
            martingale_multiplier: Some(2.0),
            ..SizingConfig::fixed(1.0, max_volume)
        }
    }

    #[test]
    fn fixed_returns_base_volume() {
        let flat = PositionState::flat();
        let cfg = SizingConfig::fixed(3.0, 10.0);
        assert_eq!(compute_volume(&cfg, &unit_constraints(), &input(&flat, None)), Ok(3.0));
    }

    #[test]
    fn martingale_doubles_after_loss_and_resets_after_win() {
        let flat = PositionState::flat();
        let cfg = martingale(10.0);
        let loss = TradeOutcome { volume: 1.0, pnl: -5.0 };
        let win = TradeOutcome { volume: 2.0, pnl: 8.0 };

        assert_eq!(compute_volume(&cfg, &unit_constraints(), &input(&flat, Some(loss))), Ok(2.0));
        assert_eq!(compute_volume(&cfg, &unit_constraints(), &input(&flat, Some(win))), Ok(1.0));
    }

    #[test]
    fn martingale_above_max_is_rejected_not_clamped() {
        let flat = PositionState::flat();
        let cfg = martingale(4.0);
        let loss = TradeOutcome { volume: 4.0, pnl: -1.0 };
        assert_eq!(
            compute_volume(&cfg, &unit_constraints(), &input(&flat, Some(loss))),
            Err(SizingError::ExceedsMax { volume: 8.0, max: 4.0 })
        );
    }

    #[test]
    fn risk_percent_divides_risk_by_stop_distance() {
        let flat = PositionState::flat();
        let cfg = SizingConfig {
            mode: SizingMode::RiskPercent,
            risk_percent: Some(1.0),
            ..SizingConfig::fixed(1.0, 1_000.0)
        };
        let constraints = VolumeConstraints {
            volume_step: 0.1,
            min_volume: 0.1,
            max_volume: 1_000.0,
        };
        let mut inp = input(&flat, None);
        inp.stop_distance = Some(4.0);
        // 10_000 * 1% / 4 = 25
        let v = compute_volume(&cfg, &constraints, &inp).unwrap();
        assert!((v - 25.0).abs() < 1e-9);

        inp.stop_distance = None;
        assert_eq!(compute_volume(&cfg, &constraints, &inp), Err(SizingError::MissingStopDistance));
    }

    #[test]
    fn risk_percent_above_strategy_cap_is_rejected() {
        let flat = PositionState::flat();
        let cfg = SizingConfig {
            mode: SizingMode::RiskPercent,
            risk_percent: Some(1.0),
            ..SizingConfig::fixed(1.0, 5.0)
        };
        let mut inp = input(&flat, None);
        inp.stop_distance = Some(1.0);
        // 10_000 * 1% / 1 = 100
        assert_eq!(
            compute_volume(&cfg, &unit_constraints(), &inp),
            Err(SizingError::ExceedsMax { volume: 100.0, max: 5.0 })
        );

        // The instrument limit still clamps.
        let tight = VolumeConstraints { max_volume: 4.0, ..unit_constraints() };
        let loose = SizingConfig { max_volume: 50.0, ..cfg };
        assert_eq!(compute_volume(&loose, &tight, &inp), Ok(4.0));
    }

    #[test]
    fn risk_percent_below_one_step_short_circuits() {
        let flat = PositionState::flat();
        let cfg = SizingConfig {
            mode: SizingMode::RiskPercent,
            risk_percent: Some(0.01),
            ..SizingConfig::fixed(1.0, 1_000.0)
        };
        let mut inp = input(&flat, None);
        inp.stop_distance = Some(50.0);
        assert!(matches!(
            compute_volume(&cfg, &unit_constraints(), &inp),
            Err(SizingError::NonPositive { .. })
        ));
    }

    #[test]
    fn floor_to_step_tolerates_float_noise() {
        let c = VolumeConstraints {
            volume_step: 0.1,
            min_volume: 0.1,
            max_volume: 10.0,
        };
        assert!((c.floor_to_step(0.3) - 0.3).abs() < 1e-12);
        assert!((c.floor_to_step(0.35) - 0.3).abs() < 1e-12);
        assert_eq!(c.floor_to_step(-1.0), 0.0);
    }

    #[test]
    fn pyramid_adds_only_after_grid_step_and_within_levels() {
        let cfg = SizingConfig {
            mode: SizingMode::Pyramid,
            grid_step: Some(5.0),
            max_grid_levels: Some(2),
            level_scale: 2.0,
            ..SizingConfig::fixed(1.0, 10.0)
        };
        let long = PositionState {
            direction: Direction::Long,
            volume: 1.0,
            average_entry_price: 100.0,
            ..PositionState::default()
        };
        let mut inp = input(&long, None);
        inp.grid = GridState::opened(100.0);

        inp.price = 103.0;
        assert_eq!(compute_volume(&cfg, &unit_constraints(), &inp), Err(SizingError::GridNotReady));

        inp.price = 105.0;
        assert_eq!(compute_volume(&cfg, &unit_constraints(), &inp), Ok(2.0));

        inp.grid.record_add(105.0);
        inp.price = 110.0;
        assert_eq!(compute_volume(&cfg, &unit_constraints(), &inp), Ok(4.0));

        inp.grid.record_add(110.0);
        inp.price = 120.0;
        assert_eq!(
            compute_volume(&cfg, &unit_constraints(), &inp),
            Err(SizingError::GridExhausted { levels: 2 })
        );
    }

    #[test]
    fn add_without_pyramid_mode_is_benign_refusal() {
        let long = PositionState {
            direction: Direction::Long,
            volume: 1.0,
            average_entry_price: 100.0,
            ..PositionState::default()
        };
        let err = compute_volume(&SizingConfig::fixed(1.0, 5.0), &unit_constraints(), &input(&long, None))
            .unwrap_err();
        assert!(err.is_benign());
    }

    #[test]
    fn validate_rejects_contradictory_modes() {
        let cfg = SizingConfig {
            martingale_multiplier: Some(2.0),
            ..SizingConfig::fixed(1.0, 5.0)
        };
        assert!(cfg.validate().is_err());

        let cfg = SizingConfig {
            mode: SizingMode::Martingale,
            martingale_multiplier: Some(2.0),
            risk_percent: Some(1.0),
            ..SizingConfig::fixed(1.0, 5.0)
        };
        assert!(cfg.validate().is_err());

        assert!(martingale(5.0).validate().is_ok());
    }
}
