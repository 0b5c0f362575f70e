use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle for a single instrument.
///
/// Bars are immutable once emitted with `is_final == true`. Strategies only
/// consume final bars; in-progress updates are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    #[serde(default = "default_final")]
    pub is_final: bool,
}

fn default_final() -> bool {
    true
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of a held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Flat,
    Long,
    Short,
}

impl Direction {
    /// +1 long, -1 short, 0 flat.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Flat => 0.0,
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Direction of a signed volume; zero is flat.
    pub fn from_sign(x: f64) -> Self {
        if x > 0.0 {
            Direction::Long
        } else if x < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        }
    }

    /// Order side that increases exposure in this direction.
    pub fn entry_side(self) -> Option<OrderSide> {
        match self {
            Direction::Flat => None,
            Direction::Long => Some(OrderSide::Buy),
            Direction::Short => Some(OrderSide::Sell),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Flat => Direction::Flat,
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Flat => write!(f, "flat"),
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Discrete decision produced by a signal evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Signal {
    Long,
    Short,
    ExitLong,
    ExitShort,
    /// No actionable condition on this bar.
    #[default]
    Neutral,
}

impl Signal {
    /// Direction an entry signal asks for, if any.
    pub fn entry_direction(self) -> Option<Direction> {
        match self {
            Signal::Long => Some(Direction::Long),
            Signal::Short => Some(Direction::Short),
            _ => None,
        }
    }
}

/// Why a position (or part of it) is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    PartialTake,
    TimeExit,
    Signal,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TakeProfit => write!(f, "take-profit"),
            ExitReason::PartialTake => write!(f, "partial take"),
            ExitReason::TimeExit => write!(f, "time exit"),
            ExitReason::Signal => write!(f, "signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Stop,
    Limit,
}

/// What an order intent is meant to do to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentReason {
    Open,
    Add,
    Reduce(ExitReason),
    Reverse,
    Close(ExitReason),
}

/// An order the engine wants placed. Consumed by an `ExecutionClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub volume: f64,
    pub kind: OrderKind,
    /// Trigger / limit price. `None` for market orders.
    pub price: Option<f64>,
    pub reason: IntentReason,
}

impl OrderIntent {
    pub fn market(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        reason: IntentReason,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instrument: instrument.into(),
            side,
            volume,
            kind: OrderKind::Market,
            price: None,
            reason,
        }
    }

    pub fn stop(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        price: f64,
        reason: IntentReason,
    ) -> Self {
        Self {
            kind: OrderKind::Stop,
            price: Some(price),
            ..Self::market(instrument, side, volume, reason)
        }
    }

    pub fn limit(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        price: f64,
        reason: IntentReason,
    ) -> Self {
        Self {
            kind: OrderKind::Limit,
            price: Some(price),
            ..Self::market(instrument, side, volume, reason)
        }
    }

    /// Market orders are filled or rejected; stop/limit orders may rest.
    pub fn is_resting(&self) -> bool {
        self.kind != OrderKind::Market
    }
}

/// Opaque identifier returned by the execution interface for a live order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle(pub String);

impl std::fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fill confirmation delivered asynchronously by the execution interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub handle: OrderHandle,
    pub instrument: String,
    pub side: OrderSide,
    pub fill_price: f64,
    pub fill_volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Net position on one instrument as seen by the Order Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionState {
    pub direction: Direction,
    pub volume: f64,
    pub average_entry_price: f64,
    pub opened_at_bar_index: Option<u64>,
    /// Cumulative realized PnL at the moment the position was opened.
    pub realized_pnl_baseline: f64,
}

impl PositionState {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }

    /// Signed volume: positive long, negative short.
    pub fn signed_volume(&self) -> f64 {
        self.direction.sign() * self.volume
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.signed_volume() * (price - self.average_entry_price)
    }
}

/// Result of a fully closed trade, fed back into martingale sizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub volume: f64,
    pub pnl: f64,
}

impl TradeOutcome {
    pub fn was_loss(&self) -> bool {
        self.pnl < 0.0
    }
}

/// Reason an order was rejected, either locally or by the execution interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    NoPrice,
    InvalidVolume,
    UnknownOrder,
    Exchange(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NoPrice => write!(f, "no reference price"),
            RejectionReason::InvalidVolume => write!(f, "invalid volume"),
            RejectionReason::UnknownOrder => write!(f, "unknown order"),
            RejectionReason::Exchange(s) => write!(f, "{s}"),
        }
    }
}

/// Current state of the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

/// Notable things that happened inside a driver, broadcast for observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ExitTriggered {
        instrument: String,
        reason: ExitReason,
        price: f64,
    },
    EntrySkipped {
        instrument: String,
        reason: String,
    },
    OrderRejected {
        instrument: String,
        intent_id: String,
        reason: RejectionReason,
    },
    Filled {
        instrument: String,
        fill: Fill,
        position: PositionState,
    },
    TradeClosed {
        instrument: String,
        outcome: TradeOutcome,
    },
}
