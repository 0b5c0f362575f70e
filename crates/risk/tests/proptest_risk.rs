use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{Bar, Direction, PositionState, TradeOutcome};
use risk::{
    compute_volume, GridState, LevelInputs, LevelMethod, RiskConfig, RiskController,
    RiskDecision, SizingConfig, SizingError, SizingInput, SizingMode, TrailingConfig, VolumeConstraints,
};

fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Bar {
        instrument: "TESTUSDT".into(),
        open,
        high,
        low,
        close,
        volume: 1.0,
        open_time: t,
        close_time: t,
        is_final: true,
    }
}

fn sizing_mode() -> impl Strategy<Value = SizingMode> {
    prop_oneof![
        Just(SizingMode::Fixed),
        Just(SizingMode::RiskPercent),
        Just(SizingMode::Martingale),
        Just(SizingMode::Pyramid),
    ]
}

proptest! {
    /// Accepted long stops never move down, whatever the price path.
    #[test]
    fn long_trailing_stop_is_non_decreasing(
        moves in prop::collection::vec(-3.0f64..3.0, 1..120),
        activation in 0.0f64..5.0,
        distance in 0.1f64..5.0,
    ) {
        let mut rc = RiskController::new(RiskConfig {
            levels: Some(LevelMethod::PriceDistance { stop: Some(1_000.0), take: None }),
            trailing: Some(TrailingConfig { activation_distance: activation, trailing_distance: distance }),
            ..RiskConfig::default()
        });
        rc.init(Direction::Long, 10_000.0, &LevelInputs::default()).unwrap();

        let mut close = 10_000.0;
        let mut last_stop = rc.levels().unwrap().stop_price.unwrap();
        for m in moves {
            let open = close;
            close += m;
            let high = open.max(close) + 0.5;
            let low = open.min(close) - 0.5;
            if let RiskDecision::Exit { .. } = rc.evaluate(&bar(open, high, low, close), false) {
                break;
            }
            let stop = rc.levels().unwrap().stop_price.unwrap();
            prop_assert!(stop >= last_stop, "stop loosened from {} to {}", last_stop, stop);
            last_stop = stop;
        }
    }

    /// Sizing output is a positive number of steps no larger than the cap, or an error.
    #[test]
    fn computed_volume_stays_within_bounds(
        mode in sizing_mode(),
        base in 0.01f64..10.0,
        extra in 0.0f64..50.0,
        equity in 0.0f64..1_000_000.0,
        stop_distance in 0.0f64..100.0,
        last_volume in 0.0f64..100.0,
        last_pnl in -100.0f64..100.0,
    ) {
        let max_volume = base + extra;
        let config = SizingConfig {
            mode,
            risk_percent: (mode == SizingMode::RiskPercent).then_some(1.0),
            martingale_multiplier: (mode == SizingMode::Martingale).then_some(2.0),
            grid_step: (mode == SizingMode::Pyramid).then_some(1.0),
            max_grid_levels: (mode == SizingMode::Pyramid).then_some(3),
            ..SizingConfig::fixed(base, max_volume)
        };
        let constraints = VolumeConstraints { volume_step: 0.01, min_volume: 0.01, max_volume: 1_000.0 };
        let flat = PositionState::flat();
        let input = SizingInput {
            direction: Direction::Long,
            price: 100.0,
            position: &flat,
            last_trade: Some(TradeOutcome { volume: last_volume, pnl: last_pnl }),
            equity,
            stop_distance: Some(stop_distance),
            grid: GridState::default(),
        };
        if let Ok(volume) = compute_volume(&config, &constraints, &input) {
            prop_assert!(volume >= constraints.volume_step - 1e-12);
            prop_assert!(volume <= max_volume + 1e-9);
        }
    }

    /// Pyramid adds on a held position respect the cap however steep the level scale.
    #[test]
    fn pyramid_add_stays_within_bounds(
        base in 0.01f64..5.0,
        extra in 0.0f64..20.0,
        level_scale in 1.0f64..3.0,
        max_levels in 1u32..6,
        level in 0u32..6,
        step in 0.5f64..5.0,
        moved in -10.0f64..20.0,
        short in any::<bool>(),
    ) {
        let max_volume = base + extra;
        let config = SizingConfig {
            mode: SizingMode::Pyramid,
            grid_step: Some(step),
            max_grid_levels: Some(max_levels),
            level_scale,
            ..SizingConfig::fixed(base, max_volume)
        };
        let constraints = VolumeConstraints { volume_step: 0.01, min_volume: 0.01, max_volume: 1_000.0 };
        let direction = if short { Direction::Short } else { Direction::Long };
        let held = PositionState {
            direction,
            volume: base,
            average_entry_price: 100.0,
            ..PositionState::default()
        };
        let input = SizingInput {
            direction,
            price: 100.0 + moved * direction.sign(),
            position: &held,
            last_trade: None,
            equity: 10_000.0,
            stop_distance: None,
            grid: GridState { level, last_entry_price: Some(100.0) },
        };
        match compute_volume(&config, &constraints, &input) {
            Ok(volume) => {
                prop_assert!(level < max_levels);
                prop_assert!(moved >= step - 1e-9);
                prop_assert!(volume >= constraints.min_volume - 1e-12);
                prop_assert!(volume <= max_volume + 1e-9);
                let expected = base * level_scale.powi(level as i32 + 1);
                prop_assert!(volume <= expected + 1e-9, "add {} above raw size {}", volume, expected);
            }
            Err(e) => prop_assert!(
                e.is_benign()
                    || matches!(
                        e,
                        SizingError::ExceedsMax { .. }
                            | SizingError::NonPositive { .. }
                            | SizingError::BelowMinimum { .. }
                    ),
                "unexpected sizing error {:?}",
                e
            ),
        }
    }
}
