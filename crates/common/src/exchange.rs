use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Bar, OrderHandle, OrderIntent, PositionState, Result};

/// Abstraction over order routing.
///
/// Submission only acknowledges the order. Fills are delivered later on the
/// fill channel the client was constructed with, possibly several bars after
/// the intent was emitted.
///
/// Only `OrderExecutor` in `crates/engine` should hold a reference to a
/// `dyn ExecutionClient`.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit an order intent and return its handle.
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderHandle>;

    /// Cancel a resting order. Cancelling an unknown or already filled
    /// order is an error the caller may ignore.
    async fn cancel(&self, handle: &OrderHandle) -> Result<()>;
}

/// Read-only view of the trading account.
#[async_trait]
pub trait AccountView: Send + Sync {
    async fn current_equity(&self) -> f64;

    async fn current_position(&self, instrument: &str) -> PositionState;
}

/// Source of bars for one instrument and timeframe.
#[async_trait]
pub trait BarFeed: Send + Sync {
    async fn subscribe(&self, instrument: &str, timeframe: &str) -> Result<mpsc::Receiver<Bar>>;
}

/// Sees every final bar before any driver does. Simulated venues use this to
/// keep their reference prices and trigger resting orders.
#[async_trait]
pub trait BarObserver: Send + Sync {
    async fn on_bar(&self, bar: &Bar);
}
