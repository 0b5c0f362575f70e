use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{
    AccountView, Bar, BarObserver, Direction, Error, ExecutionClient, Fill, OrderHandle,
    OrderIntent, OrderKind, OrderSide, PositionState, RejectionReason, Result,
};

/// Netted position for one instrument.
#[derive(Debug, Clone, Default)]
struct Holding {
    /// Positive long, negative short.
    signed_volume: f64,
    average_price: f64,
    baseline: f64,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Latest close per instrument, updated on every observed bar.
    prices: HashMap<String, f64>,
    holdings: HashMap<String, Holding>,
    resting: Vec<(OrderHandle, OrderIntent)>,
    realized_pnl: f64,
}

impl Ledger {
    /// Net a fill into the instrument's holding and book any realised PnL.
    fn apply(&mut self, instrument: &str, side: OrderSide, price: f64, volume: f64) {
        let realized = self.realized_pnl;
        let holding = self.holdings.entry(instrument.to_string()).or_default();
        let delta = side.sign() * volume;
        let before = holding.signed_volume;
        let after = before + delta;

        let mut booked = 0.0;
        if before == 0.0 || before.signum() == delta.signum() {
            let total = before.abs() + volume;
            holding.average_price = (holding.average_price * before.abs() + price * volume) / total;
            if before == 0.0 {
                holding.baseline = realized;
            }
        } else {
            let closed = volume.min(before.abs());
            booked = closed * (price - holding.average_price) * before.signum();
            if after.abs() < 1e-12 {
                holding.average_price = 0.0;
            } else if after.signum() != before.signum() {
                // Flipped through flat: the remainder opens at the fill price.
                holding.average_price = price;
                holding.baseline = realized + booked;
            }
        }
        holding.signed_volume = if after.abs() < 1e-12 { 0.0 } else { after };
        self.realized_pnl += booked;
    }

    fn unrealized_pnl(&self) -> f64 {
        self.holdings
            .iter()
            .map(|(instrument, h)| {
                let mark = self.prices.get(instrument).copied().unwrap_or(h.average_price);
                h.signed_volume * (mark - h.average_price)
            })
            .sum()
    }
}

/// Simulated execution venue and account for paper trading.
///
/// Market orders fill at the latest observed close with configurable
/// slippage. Stop and limit orders rest until a later bar trades through
/// their price. Fills are reported on the channel given at construction.
pub struct PaperClient {
    initial_equity: f64,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    ledger: RwLock<Ledger>,
    fill_tx: mpsc::UnboundedSender<Fill>,
}

impl PaperClient {
    pub fn new(
        initial_equity: f64,
        slippage_bps: f64,
        fill_tx: mpsc::UnboundedSender<Fill>,
    ) -> Self {
        info!(
            equity = initial_equity,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        Self {
            initial_equity,
            slippage_bps,
            ledger: RwLock::new(Ledger::default()),
            fill_tx,
        }
    }

    /// Update the latest price for an instrument without a full bar.
    #[cfg(test)]
    async fn update_price(&self, instrument: &str, price: f64) {
        self.ledger.write().await.prices.insert(instrument.to_string(), price);
    }

    pub async fn realized_pnl(&self) -> f64 {
        self.ledger.read().await.realized_pnl
    }

    /// Number of stop/limit orders waiting to trigger.
    pub async fn resting_orders(&self) -> usize {
        self.ledger.read().await.resting.len()
    }

    /// Buys pay more, sells receive less.
    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        price * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    fn fill(&self, ledger: &mut Ledger, handle: OrderHandle, intent: &OrderIntent, price: f64) {
        let fill_price = self.slipped(intent.side, price);
        ledger.apply(&intent.instrument, intent.side, fill_price, intent.volume);
        debug!(
            instrument = %intent.instrument,
            side = %intent.side,
            reference = price,
            fill = fill_price,
            volume = intent.volume,
            "Paper fill simulated"
        );
        let fill = Fill {
            handle,
            instrument: intent.instrument.clone(),
            side: intent.side,
            fill_price,
            fill_volume: intent.volume,
            timestamp: Utc::now(),
        };
        if self.fill_tx.send(fill).is_err() {
            warn!(instrument = %intent.instrument, "Fill channel closed; fill not reported");
        }
    }
}

/// Price at which a resting order trades on `bar`, if it does.
/// Gaps through the trigger fill at the open.
fn trigger_price(intent: &OrderIntent, bar: &Bar) -> Option<f64> {
    let level = intent.price?;
    match (intent.kind, intent.side) {
        (OrderKind::Stop, OrderSide::Buy) if bar.high >= level => Some(bar.open.max(level)),
        (OrderKind::Stop, OrderSide::Sell) if bar.low <= level => Some(bar.open.min(level)),
        (OrderKind::Limit, OrderSide::Buy) if bar.low <= level => Some(bar.open.min(level)),
        (OrderKind::Limit, OrderSide::Sell) if bar.high >= level => Some(bar.open.max(level)),
        _ => None,
    }
}

#[async_trait]
impl ExecutionClient for PaperClient {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderHandle> {
        if !(intent.volume > 0.0) || !intent.volume.is_finite() {
            return Err(Error::OrderRejected {
                reason: RejectionReason::InvalidVolume,
            });
        }
        let handle = OrderHandle(format!("paper-{}", uuid::Uuid::new_v4()));
        let mut ledger = self.ledger.write().await;

        match intent.kind {
            OrderKind::Market => {
                let price = ledger.prices.get(&intent.instrument).copied().ok_or(
                    Error::OrderRejected {
                        reason: RejectionReason::NoPrice,
                    },
                )?;
                self.fill(&mut ledger, handle.clone(), intent, price);
            }
            OrderKind::Stop | OrderKind::Limit => {
                if intent.price.map_or(true, |p| !(p > 0.0)) {
                    return Err(Error::OrderRejected {
                        reason: RejectionReason::Exchange("resting order needs a positive price".into()),
                    });
                }
                debug!(
                    instrument = %intent.instrument,
                    kind = ?intent.kind,
                    price = ?intent.price,
                    %handle,
                    "Paper order resting"
                );
                ledger.resting.push((handle.clone(), intent.clone()));
            }
        }
        Ok(handle)
    }

    async fn cancel(&self, handle: &OrderHandle) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let before = ledger.resting.len();
        ledger.resting.retain(|(h, _)| h != handle);
        if ledger.resting.len() == before {
            return Err(Error::OrderRejected {
                reason: RejectionReason::UnknownOrder,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BarObserver for PaperClient {
    /// Record the close and fill any resting order the bar trades through.
    async fn on_bar(&self, bar: &Bar) {
        let mut ledger = self.ledger.write().await;
        ledger.prices.insert(bar.instrument.clone(), bar.close);

        let (triggered, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut ledger.resting)
            .into_iter()
            .partition(|(_, intent)| {
                intent.instrument == bar.instrument && trigger_price(intent, bar).is_some()
            });
        ledger.resting = waiting;

        for (handle, intent) in triggered {
            if let Some(price) = trigger_price(&intent, bar) {
                self.fill(&mut ledger, handle, &intent, price);
            }
        }
    }
}

#[async_trait]
impl AccountView for PaperClient {
    async fn current_equity(&self) -> f64 {
        let ledger = self.ledger.read().await;
        self.initial_equity + ledger.realized_pnl + ledger.unrealized_pnl()
    }

    async fn current_position(&self, instrument: &str) -> PositionState {
        let ledger = self.ledger.read().await;
        match ledger.holdings.get(instrument) {
            Some(h) if h.signed_volume != 0.0 => PositionState {
                direction: Direction::from_sign(h.signed_volume),
                volume: h.signed_volume.abs(),
                average_entry_price: h.average_price,
                opened_at_bar_index: None,
                realized_pnl_baseline: h.baseline,
            },
            _ => PositionState::flat(),
        }
    }
}
