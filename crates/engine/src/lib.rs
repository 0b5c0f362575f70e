pub mod driver;
pub mod executor;
pub mod feed;
pub mod lifecycle;
pub mod orders;
pub mod task;

pub use driver::{BarDecision, StrategyDriver};
pub use executor::{ExecutionRequest, OrderExecutor};
pub use feed::JsonLinesFeed;
pub use lifecycle::{Engine, EngineHandle};
pub use orders::{FillOutcome, ManagerAction, OrderManager, PendingOrder, Purpose};
pub use task::{DriverMessage, DriverTask};
