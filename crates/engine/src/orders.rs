//! Position / order manager for one instrument.
//!
//! Turns decisions into order intents and keeps the net position in step
//! with confirmed fills. The position changes only on fills or explicit
//! reconciliation, never on submission.

use tracing::{debug, info, warn};

use common::{
    Direction, ExitReason, Fill, IntentReason, OrderHandle, OrderIntent, OrderKind, OrderSide,
    PositionState, RejectionReason, TradeOutcome,
};
use risk::{GridState, VolumeConstraints};

const VOLUME_EPSILON: f64 = 1e-9;

/// Something the driver asks the execution side to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerAction {
    Submit(OrderIntent),
    Cancel(OrderHandle),
}

/// At most one order may be in flight per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Open, add or reverse.
    Entry,
    /// Close or reduce.
    Exit,
}

impl Purpose {
    fn of(reason: IntentReason) -> Self {
        match reason {
            IntentReason::Open | IntentReason::Add | IntentReason::Reverse => Purpose::Entry,
            IntentReason::Reduce(_) | IntentReason::Close(_) => Purpose::Exit,
        }
    }
}

/// An intent that has been emitted and not yet fully filled, rejected or cancelled.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub intent: OrderIntent,
    pub handle: Option<OrderHandle>,
    pub remaining: f64,
}

/// How a fill changed the position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillOutcome {
    Opened { direction: Direction, price: f64 },
    Added { price: f64 },
    Reduced { pnl: f64 },
    Closed(TradeOutcome),
    Reversed { closed: TradeOutcome, direction: Direction, price: f64 },
}

#[derive(Debug)]
pub struct OrderManager {
    instrument: String,
    constraints: VolumeConstraints,
    position: PositionState,
    entry: Option<PendingOrder>,
    exit: Option<PendingOrder>,
    /// Intents cancelled before their acknowledgement arrived.
    cancelled: Vec<String>,
    realized_pnl: f64,
    /// Largest volume held during the current trade.
    trade_volume: f64,
    last_trade: Option<TradeOutcome>,
    grid: GridState,
    /// Set while a full close is in progress. Exposure left by entry fills
    /// that race the close is flattened with the same reason.
    flatten: Option<ExitReason>,
}

impl OrderManager {
    pub fn new(instrument: impl Into<String>, constraints: VolumeConstraints) -> Self {
        Self {
            instrument: instrument.into(),
            constraints,
            position: PositionState::flat(),
            entry: None,
            exit: None,
            cancelled: Vec::new(),
            realized_pnl: 0.0,
            trade_volume: 0.0,
            last_trade: None,
            grid: GridState::default(),
            flatten: None,
        }
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn last_trade(&self) -> Option<TradeOutcome> {
        self.last_trade
    }

    /// The trade the open position would record if it were closed at `price`.
    pub fn prospective_outcome(&self, price: f64) -> Option<TradeOutcome> {
        if self.position.is_flat() {
            return None;
        }
        Some(TradeOutcome {
            volume: self.trade_volume,
            pnl: self.realized_pnl - self.position.realized_pnl_baseline
                + self.position.unrealized_pnl(price),
        })
    }

    /// True while a requested full close has not yet left the book flat.
    pub fn is_flattening(&self) -> bool {
        self.flatten.is_some()
    }

    pub fn grid(&self) -> GridState {
        self.grid
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn pending(&self, purpose: Purpose) -> Option<&PendingOrder> {
        match purpose {
            Purpose::Entry => self.entry.as_ref(),
            Purpose::Exit => self.exit.as_ref(),
        }
    }

    fn slot(&mut self, purpose: Purpose) -> &mut Option<PendingOrder> {
        match purpose {
            Purpose::Entry => &mut self.entry,
            Purpose::Exit => &mut self.exit,
        }
    }

    fn entry_in_flight(&self) -> bool {
        self.entry.as_ref().map_or(false, |p| !p.intent.is_resting())
    }

    fn track(&mut self, intent: OrderIntent) -> ManagerAction {
        let purpose = Purpose::of(intent.reason);
        debug!(
            instrument = %self.instrument,
            intent_id = %intent.id,
            side = %intent.side,
            volume = intent.volume,
            reason = ?intent.reason,
            "Order intent emitted"
        );
        *self.slot(purpose) = Some(PendingOrder {
            remaining: intent.volume,
            intent: intent.clone(),
            handle: None,
        });
        ManagerAction::Submit(intent)
    }

    // ─── Decisions ────────────────────────────────────────────────────────

    /// Open a new position from flat. A pending market entry blocks; a resting
    /// one in the other direction is cancelled and replaced.
    pub fn open(
        &mut self,
        direction: Direction,
        volume: f64,
        resting_price: Option<(OrderKind, f64)>,
    ) -> Vec<ManagerAction> {
        let Some(side) = direction.entry_side() else {
            return Vec::new();
        };
        if !self.position.is_flat() {
            warn!(instrument = %self.instrument, "Open requested while a position is held");
            return Vec::new();
        }
        let mut actions = Vec::new();
        if let Some(pending) = &self.entry {
            let replace = pending.intent.is_resting() && pending.intent.side != side;
            if !replace {
                debug!(instrument = %self.instrument, "Entry already pending; not submitting again");
                return actions;
            }
            actions.extend(self.cancel_resting());
        }
        let intent = match resting_price {
            Some((OrderKind::Stop, price)) => {
                OrderIntent::stop(&self.instrument, side, volume, price, IntentReason::Open)
            }
            Some((OrderKind::Limit, price)) => {
                OrderIntent::limit(&self.instrument, side, volume, price, IntentReason::Open)
            }
            _ => OrderIntent::market(&self.instrument, side, volume, IntentReason::Open),
        };
        actions.push(self.track(intent));
        actions
    }

    /// Pyramid onto the open position with a market order.
    pub fn add(&mut self, volume: f64) -> Vec<ManagerAction> {
        let Some(side) = self.position.direction.entry_side() else {
            return Vec::new();
        };
        if self.entry.is_some() || self.exit.is_some() {
            debug!(instrument = %self.instrument, "Order pending; add skipped");
            return Vec::new();
        }
        let intent = OrderIntent::market(&self.instrument, side, volume, IntentReason::Add);
        vec![self.track(intent)]
    }

    /// Flip the position in one order: close the current volume and open
    /// `volume` the other way. Resting orders are cancelled first.
    pub fn reverse(&mut self, volume: f64) -> Vec<ManagerAction> {
        let Some(side) = self.position.direction.entry_side().map(OrderSide::opposite) else {
            return Vec::new();
        };
        if self.exit.is_some() || self.entry_in_flight() {
            debug!(instrument = %self.instrument, "Order pending; reversal skipped");
            return Vec::new();
        }
        let mut actions = self.cancel_resting();
        let total = self.position.volume + volume;
        let intent = OrderIntent::market(&self.instrument, side, total, IntentReason::Reverse);
        actions.push(self.track(intent));
        actions
    }

    /// Close the whole position. Resting entries are cancelled; a market
    /// entry still in flight is flattened once it fills.
    pub fn close(&mut self, reason: ExitReason) -> Vec<ManagerAction> {
        let Some(side) = self.position.direction.entry_side().map(OrderSide::opposite) else {
            return Vec::new();
        };
        if self.exit.is_some() {
            debug!(instrument = %self.instrument, "Exit already pending; not submitting again");
            return Vec::new();
        }
        let mut actions = self.cancel_resting();
        let intent = OrderIntent::market(
            &self.instrument,
            side,
            self.position.volume,
            IntentReason::Close(reason),
        );
        self.flatten = Some(reason);
        actions.push(self.track(intent));
        actions
    }

    /// Close whatever exposure remains after a full close once nothing is
    /// left in flight. Call after every fill.
    pub fn close_residual(&mut self) -> Vec<ManagerAction> {
        let Some(reason) = self.flatten else {
            return Vec::new();
        };
        if self.position.is_flat() {
            if !self.entry_in_flight() {
                self.flatten = None;
            }
            return Vec::new();
        }
        if self.exit.is_some() || self.entry_in_flight() {
            return Vec::new();
        }
        info!(
            instrument = %self.instrument,
            volume = self.position.volume,
            %reason,
            "Closing exposure left after close"
        );
        self.close(reason)
    }

    /// Close `fraction` of the position, rounded down to the volume step.
    /// Falls back to a full close when the remainder would be below the minimum.
    pub fn reduce(&mut self, fraction: f64, reason: ExitReason) -> Vec<ManagerAction> {
        let Some(side) = self.position.direction.entry_side().map(OrderSide::opposite) else {
            return Vec::new();
        };
        if self.exit.is_some() {
            return Vec::new();
        }
        let volume = self.constraints.floor_to_step(self.position.volume * fraction);
        if volume <= 0.0 {
            debug!(instrument = %self.instrument, fraction, "Reduction below one volume step");
            return Vec::new();
        }
        if self.position.volume - volume < self.constraints.min_volume - VOLUME_EPSILON {
            return self.close(reason);
        }
        let intent =
            OrderIntent::market(&self.instrument, side, volume, IntentReason::Reduce(reason));
        vec![self.track(intent)]
    }

    /// Cancel every resting order. Unacknowledged ones are cancelled on ack.
    pub fn cancel_resting(&mut self) -> Vec<ManagerAction> {
        let mut actions = Vec::new();
        for purpose in [Purpose::Entry, Purpose::Exit] {
            let slot = self.slot(purpose);
            let resting = slot.as_ref().map_or(false, |p| p.intent.is_resting());
            if !resting {
                continue;
            }
            if let Some(pending) = slot.take() {
                info!(instrument = %self.instrument, intent_id = %pending.intent.id, "Cancelling resting order");
                match pending.handle {
                    Some(handle) => actions.push(ManagerAction::Cancel(handle)),
                    None => self.cancelled.push(pending.intent.id),
                }
            }
        }
        actions
    }

    // ─── Execution feedback ───────────────────────────────────────────────

    /// The execution side accepted `intent_id` under `handle`.
    pub fn on_submitted(&mut self, intent_id: &str, handle: OrderHandle) -> Vec<ManagerAction> {
        if let Some(pos) = self.cancelled.iter().position(|id| id == intent_id) {
            self.cancelled.swap_remove(pos);
            return vec![ManagerAction::Cancel(handle)];
        }
        for pending in [self.entry.as_mut(), self.exit.as_mut()].into_iter().flatten() {
            if pending.intent.id == intent_id {
                pending.handle = Some(handle);
                return Vec::new();
            }
        }
        debug!(instrument = %self.instrument, intent_id, "Acknowledgement for unknown intent");
        Vec::new()
    }

    /// The execution side refused `intent_id`. The slot is freed so the
    /// next bar may try again.
    pub fn on_rejected(&mut self, intent_id: &str, reason: &RejectionReason) -> Option<OrderIntent> {
        self.cancelled.retain(|id| id != intent_id);
        for purpose in [Purpose::Entry, Purpose::Exit] {
            let slot = self.slot(purpose);
            if slot.as_ref().map_or(false, |p| p.intent.id == intent_id) {
                let pending = slot.take()?;
                warn!(
                    instrument = %self.instrument,
                    intent_id,
                    reason = %reason,
                    "Order rejected"
                );
                if purpose == Purpose::Exit || self.position.is_flat() {
                    self.flatten = None;
                }
                return Some(pending.intent);
            }
        }
        None
    }

    /// Apply a confirmed fill to the net position.
    ///
    /// Fills for unknown handles still move the position: the account is
    /// the source of truth.
    pub fn on_fill(&mut self, fill: &Fill, bar_index: u64) -> Option<FillOutcome> {
        if fill.instrument != self.instrument || !(fill.fill_volume > 0.0) {
            return None;
        }
        let reason = self.consume_pending(fill);

        let delta = fill.side.sign() * fill.fill_volume;
        let price = fill.fill_price;
        let current = self.position.signed_volume();

        if self.position.is_flat() {
            self.open_position(Direction::from_sign(delta), delta.abs(), price, bar_index);
            return Some(FillOutcome::Opened {
                direction: self.position.direction,
                price,
            });
        }

        if current.signum() == delta.signum() {
            let volume = self.position.volume + fill.fill_volume;
            self.position.average_entry_price = (self.position.average_entry_price
                * self.position.volume
                + price * fill.fill_volume)
                / volume;
            self.position.volume = volume;
            self.trade_volume = self.trade_volume.max(volume);
            if reason == Some(IntentReason::Add) {
                self.grid.record_add(price);
            }
            return Some(FillOutcome::Added { price });
        }

        let closing = fill.fill_volume.min(self.position.volume);
        let pnl = (price - self.position.average_entry_price) * closing * self.position.direction.sign();
        self.realized_pnl += pnl;
        let remaining = self.position.volume - closing;
        let excess = fill.fill_volume - closing;

        if remaining > VOLUME_EPSILON {
            self.position.volume = remaining;
            return Some(FillOutcome::Reduced { pnl });
        }

        let outcome = TradeOutcome {
            volume: self.trade_volume,
            pnl: self.realized_pnl - self.position.realized_pnl_baseline,
        };
        self.last_trade = Some(outcome);
        info!(
            instrument = %self.instrument,
            pnl = outcome.pnl,
            volume = outcome.volume,
            "Trade closed"
        );
        let closed_direction = self.position.direction;
        self.position = PositionState::flat();
        self.grid = GridState::default();
        self.trade_volume = 0.0;

        if excess > VOLUME_EPSILON {
            let direction = closed_direction.opposite();
            self.open_position(direction, excess, price, bar_index);
            return Some(FillOutcome::Reversed {
                closed: outcome,
                direction,
                price,
            });
        }
        Some(FillOutcome::Closed(outcome))
    }

    fn open_position(&mut self, direction: Direction, volume: f64, price: f64, bar_index: u64) {
        self.position = PositionState {
            direction,
            volume,
            average_entry_price: price,
            opened_at_bar_index: Some(bar_index),
            realized_pnl_baseline: self.realized_pnl,
        };
        self.trade_volume = volume;
        self.grid = GridState::opened(price);
    }

    /// Count the fill against its pending order and return that order's reason.
    fn consume_pending(&mut self, fill: &Fill) -> Option<IntentReason> {
        for purpose in [Purpose::Entry, Purpose::Exit] {
            let slot = self.slot(purpose);
            let matches = slot
                .as_ref()
                .map_or(false, |p| p.handle.as_ref() == Some(&fill.handle));
            if !matches {
                continue;
            }
            let pending = slot.as_mut()?;
            let reason = pending.intent.reason;
            pending.remaining -= fill.fill_volume;
            if pending.remaining <= VOLUME_EPSILON {
                *slot = None;
            }
            return Some(reason);
        }
        warn!(instrument = %self.instrument, handle = %fill.handle, "Fill for untracked order");
        None
    }

    /// Overwrite the position with the account's view, e.g. after a restart.
    pub fn reconcile(&mut self, position: PositionState) {
        if position != self.position {
            info!(
                instrument = %self.instrument,
                direction = %position.direction,
                volume = position.volume,
                "Position reconciled from account"
            );
        }
        if position.is_flat() {
            self.grid = GridState::default();
            self.trade_volume = 0.0;
            self.flatten = None;
        } else if self.position.is_flat() || self.position.direction != position.direction {
            self.grid = GridState::opened(position.average_entry_price);
            self.trade_volume = position.volume;
        }
        self.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    
    fn manager() -> OrderManager {
        OrderManager::new(
            "BTC",
            VolumeConstraints { volume_step: 0.1, min_volume: 0.1, max_volume: 100.0 },
        )
    }

    fn submitted(actions: &[ManagerAction]) -> &OrderIntent {
        actions
            .iter()
            .find_map(|a| match a {
                ManagerAction::Submit(i) => Some(i),
                _ => None,
            })
            .expect("no submit action")
    }

    fn fill(handle: &str, side: OrderSide, price: f64, volume: f64) -> Fill {
        Fill {
            handle: OrderHandle(handle.into()),
            instrument: "BTC".into(),
            side,
            fill_price: price,
            fill_volume: volume,
            timestamp: Utc::now(),
        }
    }

    /// Submit, ack as `handle`, fill completely.
    fn execute(m: &mut OrderManager, actions: Vec<ManagerAction>, handle: &str, price: f64) -> FillOutcome {
        let intent = submitted(&actions).clone();
        m.on_submitted(&intent.id, OrderHandle(handle.into()));
        m.on_fill(&fill(handle, intent.side, price, intent.volume), 1).unwrap()
    }

    #[test]
    fn position_moves_only_on_fill() {
        let mut m = manager();
        let actions = m.open(Direction::Long, 1.0, None);
        assert_eq!(submitted(&actions).reason, IntentReason::Open);
        assert!(m.position().is_flat());

        let out = execute(&mut m, actions, "h1", 100.0);
        assert_eq!(out, FillOutcome::Opened { direction: Direction::Long, price: 100.0 });
        assert_eq!(m.position().volume, 1.0);
        assert!(m.pending(Purpose::Entry).is_none());
    }

    #[test]
    fn pending_entry_blocks_second_submit() {
        let mut m = manager();
        assert_eq!(m.open(Direction::Long, 1.0, None).len(), 1);
        assert!(m.open(Direction::Long, 1.0, None).is_empty());
        assert!(m.open(Direction::Short, 1.0, None).is_empty());
    }

    #[test]
    fn rejection_frees_the_slot() {
        let mut m = manager();
        let actions = m.open(Direction::Long, 1.0, None);
        let id = submitted(&actions).id.clone();
        assert!(m.on_rejected(&id, &RejectionReason::NoPrice).is_some());
        assert_eq!(m.open(Direction::Long, 1.0, None).len(), 1);
    }

    #[test]
    fn close_realises_pnl_and_records_trade() {
        let mut m = manager();
        let open = m.open(Direction::Long, 2.0, None);
        execute(&mut m, open, "h1", 100.0);
        let close = m.close(ExitReason::StopLoss);
        assert_eq!(submitted(&close).side, OrderSide::Sell);
        assert_eq!(submitted(&close).volume, 2.0);
        match execute(&mut m, close, "h2", 96.0) {
            FillOutcome::Closed(t) => {
                assert_eq!(t.volume, 2.0);
                assert!((t.pnl + 8.0).abs() < 1e-9);
                assert!(t.was_loss());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(m.position().is_flat());
        assert_eq!(m.last_trade().map(|t| t.volume), Some(2.0));
    }

    #[test]
    fn reverse_nets_through_zero_in_one_order() {
        let mut m = manager();
        let open = m.open(Direction::Long, 1.0, None);
        execute(&mut m, open, "h1", 100.0);
        let rev = m.reverse(1.0);
        assert_eq!(submitted(&rev).volume, 2.0);
        assert_eq!(submitted(&rev).side, OrderSide::Sell);
        match execute(&mut m, rev, "h2", 110.0) {
            FillOutcome::Reversed { closed, direction, price } => {
                assert!((closed.pnl - 10.0).abs() < 1e-9);
                assert_eq!(direction, Direction::Short);
                assert_eq!(price, 110.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(m.position().direction, Direction::Short);
        assert!((m.position().volume - 1.0).abs() < 1e-9);
    }

    #[test]
    fn resting_entry_is_cancelled_before_opposite_entry() {
        let mut m = manager();
        let first = m.open(Direction::Long, 1.0, Some((OrderKind::Stop, 105.0)));
        let id = submitted(&first).id.clone();
        m.on_submitted(&id, OrderHandle("rest".into()));

        let second = m.open(Direction::Short, 1.0, Some((OrderKind::Stop, 95.0)));
        assert_eq!(second[0], ManagerAction::Cancel(OrderHandle("rest".into())));
        assert_eq!(submitted(&second).side, OrderSide::Sell);
    }

    #[test]
    fn unacknowledged_resting_order_is_cancelled_on_ack() {
        let mut m = manager();
        let first = m.open(Direction::Long, 1.0, Some((OrderKind::Limit, 95.0)));
        let id = submitted(&first).id.clone();
        let cancels = m.cancel_resting();
        assert!(cancels.is_empty());
        assert_eq!(
            m.on_submitted(&id, OrderHandle("late".into())),
            vec![ManagerAction::Cancel(OrderHandle("late".into()))]
        );
    }

    #[test]
    fn partial_fills_keep_the_slot_until_complete() {
        let mut m = manager();
        let actions = m.open(Direction::Long, 2.0, None);
        let id = submitted(&actions).id.clone();
        m.on_submitted(&id, OrderHandle("h".into()));
        m.on_fill(&fill("h", OrderSide::Buy, 100.0, 1.0), 1);
        assert!(m.pending(Purpose::Entry).is_some());
        assert_eq!(m.on_fill(&fill("h", OrderSide::Buy, 102.0, 1.0), 1), Some(FillOutcome::Added { price: 102.0 }));
        assert!(m.pending(Purpose::Entry).is_none());
        assert!((m.position().average_entry_price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn reduce_rounds_down_and_keeps_position() {
        let mut m = manager();
        let open = m.open(Direction::Short, 1.0, None);
        execute(&mut m, open, "h1", 50.0);
        let reduce = m.reduce(0.55, ExitReason::PartialTake);
        assert_eq!(submitted(&reduce).volume, 0.5);
        assert_eq!(submitted(&reduce).side, OrderSide::Buy);
        assert!(matches!(execute(&mut m, reduce, "h2", 45.0), FillOutcome::Reduced { .. }));
        assert!((m.position().volume - 0.5).abs() < 1e-9);
    }

    #[test]
    fn trade_pnl_includes_partial_takes() {
        let mut m = manager();
        let open = m.open(Direction::Long, 1.0, None);
        execute(&mut m, open, "h1", 100.0);
        let reduce = m.reduce(0.5, ExitReason::PartialTake);
        execute(&mut m, reduce, "h2", 110.0);
        let close = m.close(ExitReason::StopLoss);
        match execute(&mut m, close, "h3", 100.0) {
            FillOutcome::Closed(t) => {
                assert!((t.pnl - 5.0).abs() < 1e-9);
                assert_eq!(t.volume, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prospective_outcome_marks_open_trade_to_price() {
        let mut m = manager();
        assert_eq!(m.prospective_outcome(100.0), None);
        let open = m.open(Direction::Long, 2.0, None);
        execute(&mut m, open, "h1", 100.0);
        let reduce = m.reduce(0.5, ExitReason::PartialTake);
        execute(&mut m, reduce, "h2", 104.0);

        // 4 realized on the first lot, -3 open on the second
        let outcome = m.prospective_outcome(97.0).unwrap();
        assert_eq!(outcome.volume, 2.0);
        assert!((outcome.pnl - 1.0).abs() < 1e-9);
    }

    /// Long 1 with an add of 1 in flight when the stop fires.
    fn close_with_add_in_flight(m: &mut OrderManager) -> (OrderIntent, OrderIntent) {
        let open = m.open(Direction::Long, 1.0, None);
        execute(m, open, "h1", 100.0);
        let add = submitted(&m.add(1.0)).clone();
        m.on_submitted(&add.id, OrderHandle("add".into()));
        let close = submitted(&m.close(ExitReason::StopLoss)).clone();
        assert_eq!(close.volume, 1.0);
        m.on_submitted(&close.id, OrderHandle("close".into()));
        assert!(m.is_flattening());
        (add, close)
    }

    #[test]
    fn add_filled_before_close_leaves_residual_that_is_closed() {
        let mut m = manager();
        close_with_add_in_flight(&mut m);

        assert!(matches!(m.on_fill(&fill("add", OrderSide::Buy, 101.0, 1.0), 2), Some(FillOutcome::Added { .. })));
        assert!(m.close_residual().is_empty());
        assert!(matches!(m.on_fill(&fill("close", OrderSide::Sell, 99.0, 1.0), 2), Some(FillOutcome::Reduced { .. })));

        let residual = m.close_residual();
        let intent = submitted(&residual);
        assert_eq!(intent.reason, IntentReason::Close(ExitReason::StopLoss));
        assert_eq!(intent.side, OrderSide::Sell);
        assert!((intent.volume - 1.0).abs() < 1e-9);

        let intent = intent.clone();
        m.on_submitted(&intent.id, OrderHandle("rest".into()));
        assert!(matches!(m.on_fill(&fill("rest", OrderSide::Sell, 99.0, 1.0), 2), Some(FillOutcome::Closed(_))));
        assert!(m.close_residual().is_empty());
        assert!(m.position().is_flat());
        assert!(!m.is_flattening());
    }

    #[test]
    fn add_filled_after_close_is_not_left_open() {
        let mut m = manager();
        close_with_add_in_flight(&mut m);

        assert!(matches!(m.on_fill(&fill("close", OrderSide::Sell, 99.0, 1.0), 2), Some(FillOutcome::Closed(_))));
        assert!(m.close_residual().is_empty());
        assert!(m.is_flattening());

        assert!(matches!(m.on_fill(&fill("add", OrderSide::Buy, 101.0, 1.0), 2), Some(FillOutcome::Opened { .. })));
        let residual = m.close_residual();
        assert_eq!(submitted(&residual).side, OrderSide::Sell);
        assert_eq!(submitted(&residual).volume, 1.0);
    }

    #[test]
    fn rejected_add_after_close_ends_the_flatten() {
        let mut m = manager();
        let (add, _) = close_with_add_in_flight(&mut m);

        m.on_fill(&fill("close", OrderSide::Sell, 99.0, 1.0), 2);
        m.on_rejected(&add.id, &RejectionReason::NoPrice);
        assert!(!m.is_flattening());
        assert!(m.close_residual().is_empty());
    }

    #[test]
    fn reconcile_overrides_position() {
        let mut m = manager();
        m.reconcile(PositionState {
            direction: Direction::Short,
            volume: 3.0,
            average_entry_price: 20.0,
            opened_at_bar_index: None,
            realized_pnl_baseline: 0.0,
        });
        assert_eq!(m.position().direction, Direction::Short);
        assert_eq!(m.grid().last_entry_price, Some(20.0));
        m.reconcile(PositionState::flat());
        assert!(m.position().is_flat());
    }
}
