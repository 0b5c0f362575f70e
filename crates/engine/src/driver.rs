//! Per-instrument strategy driver.
//!
//! Bar processing is synchronous: the owning task reads equity, then calls
//! `on_bar` and forwards the resulting actions. Execution feedback (acks,
//! fills, rejections) arrives later through the same task.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use common::{
    Bar, Direction, EngineEvent, ExitReason, Fill, OrderHandle, OrderKind, PositionState,
    RejectionReason, Signal, TradeOutcome,
};
use risk::{
    compute_levels, compute_volume, LevelInputs, RiskController, RiskDecision, RiskLevels,
    SizingInput,
};
use strategy::{
    EntryOrder, Frame, History, IndicatorPipeline, Reading, SharedSnapshot, SignalContext,
    SignalEvaluator, SignalOutput, StrategyConfig,
};

use crate::orders::{FillOutcome, ManagerAction, OrderManager};

/// What one driver step produced.
#[derive(Debug, Default)]
pub struct BarDecision {
    pub actions: Vec<ManagerAction>,
    pub events: Vec<EngineEvent>,
}

impl BarDecision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug)]
pub struct StrategyDriver {
    config: StrategyConfig,
    pipeline: IndicatorPipeline,
    evaluator: Box<dyn SignalEvaluator>,
    risk: RiskController,
    orders: OrderManager,
    frames: History<Frame>,
    bars: History<Bar>,
    snapshot: Option<SharedSnapshot>,
    rng: StdRng,
    bar_index: u64,
}

impl StrategyDriver {
    /// Build a driver from a validated config.
    pub fn new(config: StrategyConfig, snapshot: Option<SharedSnapshot>) -> Self {
        let evaluator = config.signal.build();
        // One spare frame so rules can tell a new condition from a continuing one.
        let frames = History::new(evaluator.lookback() + 1);
        let bars = History::new(config.risk.swing_lookback().unwrap_or(1));
        Self {
            pipeline: IndicatorPipeline::from_specs(&config.indicators),
            risk: RiskController::new(config.risk.clone()),
            orders: OrderManager::new(config.instrument.clone(), config.constraints),
            rng: StdRng::seed_from_u64(config.seed),
            evaluator,
            frames,
            bars,
            snapshot,
            bar_index: 0,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn instrument(&self) -> &str {
        &self.config.instrument
    }

    pub fn timeframe(&self) -> &str {
        &self.config.timeframe
    }

    /// Indicator cell names in pipeline order.
    pub fn indicator_names(&self) -> Vec<&str> {
        self.pipeline.names()
    }

    pub fn position(&self) -> &PositionState {
        self.orders.position()
    }

    pub fn risk_levels(&self) -> Option<&RiskLevels> {
        self.risk.levels()
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    /// Forget all history, position and RNG state.
    pub fn reset(&mut self) {
        self.pipeline.reset();
        self.frames.clear();
        self.bars.clear();
        self.risk.clear();
        self.orders = OrderManager::new(self.config.instrument.clone(), self.config.constraints);
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.bar_index = 0;
    }

    // ─── Bar processing ───────────────────────────────────────────────────

    /// Process one bar. With `trading == false` indicators, history and the
    /// snapshot still update but no intents are produced.
    pub fn on_bar(&mut self, bar: &Bar, equity: f64, trading: bool) -> BarDecision {
        let mut out = BarDecision::default();
        if bar.instrument != self.config.instrument || !self.pipeline.accepts(bar) {
            debug!(
                strategy = %self.config.name,
                instrument = %bar.instrument,
                close_time = %bar.close_time,
                "Bar skipped"
            );
            return out;
        }

        let frame = self.pipeline.update(bar);
        self.bar_index += 1;
        self.bars.push(bar.clone());
        if let Some(snapshot) = &self.snapshot {
            snapshot.publish(
                &bar.instrument,
                Reading {
                    close_time: bar.close_time,
                    close: bar.close,
                    values: frame.as_ref().map(Frame::primaries),
                },
            );
        }
        let formed = match frame {
            Some(frame) => {
                self.frames.push(frame);
                true
            }
            None => false,
        };
        if !trading {
            return out;
        }

        let view = self.snapshot.as_ref().map(SharedSnapshot::view);
        let ctx = SignalContext {
            bar,
            frames: &self.frames,
            peers: view.as_ref(),
        };

        // Exits on the position held coming into this bar.
        let position = self.orders.position().clone();
        if !position.is_flat() && self.risk.levels().is_some() {
            let touched = formed && self.evaluator.opposite_band_touched(&ctx, position.direction);
            match self.risk.evaluate(bar, touched) {
                RiskDecision::Exit { reason, price } => {
                    info!(
                        strategy = %self.config.name,
                        instrument = %bar.instrument,
                        %reason,
                        price,
                        "Exit triggered"
                    );
                    out.actions = self.orders.close(reason);
                    out.events.push(EngineEvent::ExitTriggered {
                        instrument: bar.instrument.clone(),
                        reason,
                        price,
                    });
                    return out;
                }
                RiskDecision::Reduce { fraction, price } => {
                    info!(
                        strategy = %self.config.name,
                        instrument = %bar.instrument,
                        fraction,
                        price,
                        "Partial take"
                    );
                    out.actions = self.orders.reduce(fraction, ExitReason::PartialTake);
                    out.events.push(EngineEvent::ExitTriggered {
                        instrument: bar.instrument.clone(),
                        reason: ExitReason::PartialTake,
                        price,
                    });
                    return out;
                }
                RiskDecision::Hold => {}
            }
        }

        if !formed || self.frames.len() < self.evaluator.lookback() {
            return out;
        }
        let output = self.evaluator.evaluate(&ctx);
        if output.signal != Signal::Neutral {
            debug!(
                strategy = %self.config.name,
                instrument = %bar.instrument,
                signal = ?output.signal,
                breakout = ?output.breakout_price,
                "Signal"
            );
        }
        self.act_on_signal(output, bar, equity, &position, &mut out);
        out
    }

    fn act_on_signal(
        &mut self,
        output: SignalOutput,
        bar: &Bar,
        equity: f64,
        position: &PositionState,
        out: &mut BarDecision,
    ) {
        let held = position.direction;
        let direction = match (output.signal, held) {
            (Signal::ExitLong, Direction::Long) | (Signal::ExitShort, Direction::Short) => {
                self.close_on_signal(bar, out);
                return;
            }
            (Signal::Long, _) => Direction::Long,
            (Signal::Short, _) => Direction::Short,
            _ => return,
        };

        if direction == Direction::Short && !self.config.allow_short {
            if held == Direction::Long {
                self.close_on_signal(bar, out);
            }
            return;
        }

        if held == direction {
            self.try_add(direction, bar, equity, position, out);
        } else if held == Direction::Flat {
            self.try_open(direction, output, bar, equity, out);
        } else if self.config.allow_reversal {
            self.try_reverse(direction, bar, equity, out);
        } else {
            self.close_on_signal(bar, out);
        }
    }

    fn close_on_signal(&mut self, bar: &Bar, out: &mut BarDecision) {
        let actions = self.orders.close(ExitReason::Signal);
        if !actions.is_empty() {
            out.events.push(EngineEvent::ExitTriggered {
                instrument: bar.instrument.clone(),
                reason: ExitReason::Signal,
                price: bar.close,
            });
        }
        out.actions.extend(actions);
    }

    /// Seeded coin flip for stochastic strategies.
    fn entry_allowed(&mut self) -> bool {
        match self.config.entry_probability {
            Some(p) => self.rng.gen_bool(p),
            None => true,
        }
    }

    fn skip(&self, bar: &Bar, reason: String, out: &mut BarDecision) {
        warn!(
            strategy = %self.config.name,
            instrument = %bar.instrument,
            reason = %reason,
            "Entry skipped"
        );
        out.events.push(EngineEvent::EntrySkipped {
            instrument: bar.instrument.clone(),
            reason,
        });
    }

    /// Volume for a fresh trade in `direction` entered around `reference`,
    /// following on from `last_trade`.
    fn size_entry(
        &self,
        direction: Direction,
        reference: f64,
        equity: f64,
        last_trade: Option<TradeOutcome>,
    ) -> Result<f64, String> {
        let inputs = self.level_inputs();
        let levels = compute_levels(self.config.risk.levels.as_ref(), direction, reference, &inputs)
            .map_err(|e| e.to_string())?;
        let flat = PositionState::flat();
        let input = SizingInput {
            direction,
            price: reference,
            position: &flat,
            last_trade,
            equity,
            stop_distance: levels.stop.map(|stop| (reference - stop).abs()),
            grid: Default::default(),
        };
        compute_volume(&self.config.sizing, &self.config.constraints, &input)
            .map_err(|e| e.to_string())
    }

    fn try_open(
        &mut self,
        direction: Direction,
        output: SignalOutput,
        bar: &Bar,
        equity: f64,
        out: &mut BarDecision,
    ) {
        if !self.entry_allowed() {
            debug!(strategy = %self.config.name, "Entry declined by probability gate");
            return;
        }
        let resting = match (self.config.entry_order, output.breakout_price) {
            (EntryOrder::Stop, Some(price)) => Some((OrderKind::Stop, price)),
            (EntryOrder::Limit, Some(price)) => Some((OrderKind::Limit, price)),
            _ => None,
        };
        let reference = resting.map_or(bar.close, |(_, price)| price);
        match self.size_entry(direction, reference, equity, self.orders.last_trade()) {
            Ok(volume) => out.actions.extend(self.orders.open(direction, volume, resting)),
            Err(reason) => self.skip(bar, reason, out),
        }
    }

    fn try_reverse(&mut self, direction: Direction, bar: &Bar, equity: f64, out: &mut BarDecision) {
        if !self.entry_allowed() {
            self.close_on_signal(bar, out);
            return;
        }
        // The leg being closed is the trade the new one follows.
        let closing = self.orders.prospective_outcome(bar.close);
        match self.size_entry(direction, bar.close, equity, closing) {
            Ok(volume) => {
                let actions = self.orders.reverse(volume);
                if !actions.is_empty() {
                    info!(
                        strategy = %self.config.name,
                        instrument = %bar.instrument,
                        to = %direction,
                        volume,
                        "Reversing position"
                    );
                }
                out.actions.extend(actions);
            }
            Err(reason) => {
                // Still leave the losing side even if the new one cannot be sized.
                self.skip(bar, reason, out);
                self.close_on_signal(bar, out);
            }
        }
    }

    fn try_add(
        &mut self,
        direction: Direction,
        bar: &Bar,
        equity: f64,
        position: &PositionState,
        out: &mut BarDecision,
    ) {
        let input = SizingInput {
            direction,
            price: bar.close,
            position,
            last_trade: self.orders.last_trade(),
            equity,
            stop_distance: None,
            grid: self.orders.grid(),
        };
        match compute_volume(&self.config.sizing, &self.config.constraints, &input) {
            Ok(volume) => out.actions.extend(self.orders.add(volume)),
            Err(e) if e.is_benign() => {
                debug!(strategy = %self.config.name, reason = %e, "No add this bar");
            }
            Err(e) => self.skip(bar, e.to_string(), out),
        }
    }

    /// ATR and swing extremes as of the latest bar.
    fn level_inputs(&self) -> LevelInputs {
        let atr = self
            .config
            .atr_input
            .and_then(|i| self.frames.latest()?.value(i).map(|v| v.primary()));
        let (swing_low, swing_high) = match self.config.risk.swing_lookback() {
            Some(n) if self.bars.len() >= n => (
                Some(self.bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min)),
                Some(self.bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)),
            ),
            _ => (None, None),
        };
        LevelInputs { atr, swing_low, swing_high }
    }

    // ─── Execution feedback ───────────────────────────────────────────────

    pub fn on_submitted(&mut self, intent_id: &str, handle: OrderHandle) -> Vec<ManagerAction> {
        self.orders.on_submitted(intent_id, handle)
    }

    pub fn on_rejected(&mut self, intent_id: &str, reason: RejectionReason) -> Vec<EngineEvent> {
        match self.orders.on_rejected(intent_id, &reason) {
            Some(intent) => vec![EngineEvent::OrderRejected {
                instrument: intent.instrument,
                intent_id: intent.id,
                reason,
            }],
            None => Vec::new(),
        }
    }

    /// Apply a fill and arm or clear the risk controller accordingly.
    pub fn on_fill(&mut self, fill: &Fill) -> BarDecision {
        let mut out = BarDecision::default();
        let Some(outcome) = self.orders.on_fill(fill, self.bar_index) else {
            return out;
        };
        info!(
            strategy = %self.config.name,
            instrument = %fill.instrument,
            side = %fill.side,
            price = fill.fill_price,
            volume = fill.fill_volume,
            "Fill applied"
        );
        out.events.push(EngineEvent::Filled {
            instrument: fill.instrument.clone(),
            fill: fill.clone(),
            position: self.orders.position().clone(),
        });

        match outcome {
            FillOutcome::Opened { .. } if self.orders.is_flattening() => {
                debug!(strategy = %self.config.name, "Entry filled after close; not arming");
            }
            FillOutcome::Opened { direction, price } => self.arm(direction, price, &mut out),
            FillOutcome::Added { .. } => {
                self.risk.rebase_entry(self.orders.position().average_entry_price);
            }
            FillOutcome::Reduced { .. } => {}
            FillOutcome::Closed(trade) => {
                self.risk.clear();
                out.events.push(EngineEvent::TradeClosed {
                    instrument: fill.instrument.clone(),
                    outcome: trade,
                });
            }
            FillOutcome::Reversed { closed, direction, price } => {
                self.risk.clear();
                out.events.push(EngineEvent::TradeClosed {
                    instrument: fill.instrument.clone(),
                    outcome: closed,
                });
                self.arm(direction, price, &mut out);
            }
        }
        out.actions.extend(self.orders.close_residual());
        out
    }

    /// Initialise risk levels for a new position. A position whose levels
    /// cannot be placed is closed straight away.
    fn arm(&mut self, direction: Direction, price: f64, out: &mut BarDecision) {
        let inputs = self.level_inputs();
        match self.risk.init(direction, price, &inputs) {
            Ok(levels) => {
                info!(
                    strategy = %self.config.name,
                    %direction,
                    entry = price,
                    stop = ?levels.stop_price,
                    take = ?levels.take_price,
                    "Position armed"
                );
            }
            Err(e) => {
                warn!(
                    strategy = %self.config.name,
                    error = %e,
                    "Risk levels unavailable; closing position"
                );
                out.actions.extend(self.orders.close(ExitReason::StopLoss));
                out.events.push(EngineEvent::ExitTriggered {
                    instrument: self.config.instrument.clone(),
                    reason: ExitReason::StopLoss,
                    price,
                });
            }
        }
    }

    /// Adopt the account's position, e.g. at startup.
    pub fn reconcile(&mut self, position: PositionState) -> BarDecision {
        let mut out = BarDecision::default();
        let was_flat = self.orders.position().is_flat();
        self.orders.reconcile(position);
        let now = self.orders.position().clone();
        if now.is_flat() {
            self.risk.clear();
        } else if was_flat || self.risk.levels().map(|l| l.direction) != Some(now.direction) {
            self.arm(now.direction, now.average_entry_price, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{IntentReason, OrderIntent, OrderSide};
    use strategy::StrategyFileConfig;

    const CROSS: &str = r#"
[[strategy]]
name = "cross"
instrument = "BTC"

[[strategy.indicators]]
kind = "sma"
period = 1

[[strategy.indicators]]
kind = "sma"
period = 3

[strategy.signal]
rule = "crossover"
fast = 0
slow = 1

[strategy.sizing]
mode = "fixed"
base_volume = 1.0
max_volume = 10.0

[strategy.constraints]
volume_step = 0.1
min_volume = 0.1
max_volume = 100.0

[strategy.risk.levels]
method = "price_distance"
stop = 2.0
take = 5.0
"#;

    fn config(toml: &str) -> StrategyConfig {
        StrategyFileConfig::parse(toml).unwrap().strategies.remove(0)
    }

    fn bar(i: i64, open: f64, close: f64) -> Bar {
        let open_time = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(i);
        Bar {
            instrument: "BTC".into(),
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume: 100.0,
            open_time,
            close_time: open_time + Duration::minutes(1),
            is_final: true,
        }
    }

    fn submits(decision: &BarDecision) -> Vec<&OrderIntent> {
        decision
            .actions
            .iter()
            .filter_map(|a| match a {
                ManagerAction::Submit(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    fn fill_for(driver: &mut StrategyDriver, intent: &OrderIntent, handle: &str, price: f64) -> BarDecision {
        driver.on_submitted(&intent.id, OrderHandle(handle.into()));
        driver.on_fill(&Fill {
            handle: OrderHandle(handle.into()),
            instrument: intent.instrument.clone(),
            side: intent.side,
            fill_price: price,
            fill_volume: intent.volume,
            timestamp: Utc::now(),
        })
    }

    /// Three flat bars then a jump: long entry on bar 3.
    fn enter_long(driver: &mut StrategyDriver) -> OrderIntent {
        for i in 0..3 {
            assert!(submits(&driver.on_bar(&bar(i, 10.0, 10.0), 10_000.0, true)).is_empty());
        }
        let decision = driver.on_bar(&bar(3, 10.0, 12.0), 10_000.0, true);
        let intents = submits(&decision);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].reason, IntentReason::Open);
        assert_eq!(intents[0].side, OrderSide::Buy);
        intents[0].clone()
    }

    #[test]
    fn entry_fill_arms_risk_levels() {
        let mut driver = StrategyDriver::new(config(CROSS), None);
        let intent = enter_long(&mut driver);
        assert!(driver.position().is_flat());

        let decision = fill_for(&mut driver, &intent, "h1", 12.0);
        assert!(matches!(decision.events[0], EngineEvent::Filled { .. }));
        let levels = driver.risk_levels().unwrap();
        assert_eq!(levels.stop_price, Some(10.0));
        assert_eq!(levels.take_price, Some(17.0));
    }

    #[test]
    fn stop_exit_preempts_signal_on_same_bar() {
        let mut driver = StrategyDriver::new(config(CROSS), None);
        let intent = enter_long(&mut driver);
        fill_for(&mut driver, &intent, "h1", 12.0);

        // low 9.5 breaches the stop at 10; the close also crosses below the slow MA
        let decision = driver.on_bar(&bar(4, 12.0, 10.0), 10_000.0, true);
        let intents = submits(&decision);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].reason, IntentReason::Close(ExitReason::StopLoss));
        assert!(matches!(
            decision.events[0],
            EngineEvent::ExitTriggered { reason: ExitReason::StopLoss, price, .. } if price == 10.0
        ));

        let closed = fill_for(&mut driver, intents[0], "h2", 10.0);
        assert!(driver.position().is_flat());
        assert!(driver.risk_levels().is_none());
        assert!(closed
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::TradeClosed { outcome, .. } if outcome.was_loss())));
    }

    #[test]
    fn opposite_signal_reverses_in_one_order() {
        let mut driver = StrategyDriver::new(config(CROSS), None);
        let intent = enter_long(&mut driver);
        fill_for(&mut driver, &intent, "h1", 12.0);

        // closes above the stop, fast falls below slow
        let decision = driver.on_bar(&bar(4, 12.0, 11.0), 10_000.0, true);
        assert!(submits(&decision).is_empty());
        let decision = driver.on_bar(&bar(5, 11.0, 10.6), 10_000.0, true);
        let intents = submits(&decision);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].reason, IntentReason::Reverse);
        assert_eq!(intents[0].volume, 2.0);
    }

    #[test]
    fn martingale_reversal_sizes_from_the_trade_being_closed() {
        let toml = CROSS.replace(
            "mode = \"fixed\"",
            "mode = \"martingale\"\nmartingale_multiplier = 2.0",
        );
        let mut driver = StrategyDriver::new(config(&toml), None);
        let intent = enter_long(&mut driver);
        fill_for(&mut driver, &intent, "h1", 12.0);
        assert_eq!(driver.orders().last_trade(), None);

        driver.on_bar(&bar(4, 12.0, 11.0), 10_000.0, true);
        // closes at 10.6 against an entry at 12: the long is a loss of 1.4
        let decision = driver.on_bar(&bar(5, 11.0, 10.6), 10_000.0, true);
        let intents = submits(&decision);
        assert_eq!(intents[0].reason, IntentReason::Reverse);
        // 1 to close plus a doubled 2 for the new short
        assert!((intents[0].volume - 3.0).abs() < 1e-9);

        let reversed = fill_for(&mut driver, intents[0], "h2", 10.6);
        assert_eq!(driver.position().direction, Direction::Short);
        assert!((driver.position().volume - 2.0).abs() < 1e-9);
        assert!(reversed
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::TradeClosed { outcome, .. } if outcome.was_loss())));
    }

    #[test]
    fn entry_filled_after_stop_close_is_flattened_not_armed() {
        let toml = CROSS.replace(
            "mode = \"fixed\"",
            "mode = \"pyramid\"\ngrid_step = 0.5\nmax_grid_levels = 2",
        );
        let mut driver = StrategyDriver::new(config(&toml), None);
        let intent = enter_long(&mut driver);
        fill_for(&mut driver, &intent, "h1", 12.0);

        // fast touches slow at 11, then crosses up again: the long is added to
        assert!(submits(&driver.on_bar(&bar(4, 12.0, 11.0), 10_000.0, true)).is_empty());
        let decision = driver.on_bar(&bar(5, 11.0, 13.0), 10_000.0, true);
        let add = submits(&decision)[0].clone();
        assert_eq!(add.reason, IntentReason::Add);
        driver.on_submitted(&add.id, OrderHandle("add".into()));

        // gap down through the stop at 10 while the add is still working
        let decision = driver.on_bar(&bar(6, 9.0, 9.0), 10_000.0, true);
        let close = submits(&decision)[0].clone();
        assert_eq!(close.reason, IntentReason::Close(ExitReason::StopLoss));
        assert_eq!(close.volume, 1.0);

        let closed = fill_for(&mut driver, &close, "close", 9.0);
        assert!(submits(&closed).is_empty());
        assert!(driver.position().is_flat());

        let late = driver.on_fill(&Fill {
            handle: OrderHandle("add".into()),
            instrument: "BTC".into(),
            side: OrderSide::Buy,
            fill_price: 9.0,
            fill_volume: add.volume,
            timestamp: Utc::now(),
        });
        assert!(driver.risk_levels().is_none());
        let residual = submits(&late);
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0].side, OrderSide::Sell);
        assert_eq!(residual[0].reason, IntentReason::Close(ExitReason::StopLoss));
        assert!((residual[0].volume - add.volume).abs() < 1e-9);
    }

    #[test]
    fn paused_driver_emits_nothing_but_keeps_indicators() {
        let mut driver = StrategyDriver::new(config(CROSS), None);
        for i in 0..3 {
            driver.on_bar(&bar(i, 10.0, 10.0), 10_000.0, false);
        }
        let decision = driver.on_bar(&bar(3, 10.0, 12.0), 10_000.0, false);
        assert!(decision.is_empty());
        assert_eq!(driver.bar_index(), 4);
    }

    #[test]
    fn indicator_names_follow_config_order() {
        let driver = StrategyDriver::new(config(CROSS), None);
        assert_eq!(driver.indicator_names(), vec!["sma_1", "sma_3"]);
    }

    #[test]
    fn duplicate_bar_is_ignored() {
        let mut driver = StrategyDriver::new(config(CROSS), None);
        for i in 0..3 {
            driver.on_bar(&bar(i, 10.0, 10.0), 10_000.0, true);
        }
        let first = driver.on_bar(&bar(3, 10.0, 12.0), 10_000.0, true);
        assert_eq!(submits(&first).len(), 1);
        let again = driver.on_bar(&bar(3, 10.0, 12.0), 10_000.0, true);
        assert!(again.is_empty());
        assert_eq!(driver.bar_index(), 4);
    }

    #[test]
    fn short_signal_without_shorting_only_closes() {
        let toml = CROSS.replace("instrument = \"BTC\"", "instrument = \"BTC\"\nallow_short = false");
        let mut driver = StrategyDriver::new(config(&toml), None);
        let intent = enter_long(&mut driver);
        fill_for(&mut driver, &intent, "h1", 12.0);
        driver.on_bar(&bar(4, 12.0, 11.0), 10_000.0, true);
        let decision = driver.on_bar(&bar(5, 11.0, 10.6), 10_000.0, true);
        let intents = submits(&decision);
        assert_eq!(intents[0].reason, IntentReason::Close(ExitReason::Signal));
        assert_eq!(intents[0].volume, 1.0);
    }

    #[test]
    fn seeded_probability_gate_replays_after_reset() {
        let toml = CROSS.replace(
            "instrument = \"BTC\"",
            "instrument = \"BTC\"\nentry_probability = 0.5\nseed = 7",
        );
        let mut driver = StrategyDriver::new(config(&toml), None);
        let closes = [10.0, 10.0, 10.0, 12.0, 9.0, 13.0, 8.0, 14.0, 7.0, 15.0];
        let run = |driver: &mut StrategyDriver| -> Vec<usize> {
            let mut prev = closes[0];
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    let d = driver.on_bar(&bar(i as i64, prev, c), 10_000.0, true);
                    prev = c;
                    // reject every intent so the driver stays flat
                    for intent in submits(&d) {
                        driver.on_rejected(&intent.id, RejectionReason::NoPrice);
                    }
                    submits(&d).len()
                })
                .collect()
        };
        let first = run(&mut driver);
        driver.reset();
        let second = run(&mut driver);
        assert_eq!(first, second);
    }

    #[test]
    fn unplaceable_levels_close_the_position() {
        // ATR stop on a 5-bar ATR that has not formed when the fill arrives
        let toml = CROSS
            .replace(
                "[strategy.risk.levels]\nmethod = \"price_distance\"\nstop = 2.0\ntake = 5.0",
                "[strategy.risk.levels]\nmethod = \"atr\"\nstop_multiplier = 2.0",
            )
            .replace("instrument = \"BTC\"", "instrument = \"BTC\"\natr_input = 2")
            + "\n[[strategy.indicators]]\nkind = \"atr\"\nperiod = 5\n";
        let mut driver = StrategyDriver::new(config(&toml), None);
        let decision = driver.reconcile(PositionState {
            direction: Direction::Long,
            volume: 1.0,
            average_entry_price: 10.0,
            opened_at_bar_index: None,
            realized_pnl_baseline: 0.0,
        });
        assert!(driver.risk_levels().is_none());
        assert_eq!(submits(&decision)[0].side, OrderSide::Sell);
        assert_eq!(
            driver.orders().pending(crate::orders::Purpose::Exit).map(|p| p.intent.reason),
            Some(IntentReason::Close(ExitReason::StopLoss))
        );
    }
}
