use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{AccountView, Bar, EngineEvent, EngineState, Fill, OrderHandle, RejectionReason};

use crate::driver::{BarDecision, StrategyDriver};
use crate::executor::ExecutionRequest;
use crate::orders::ManagerAction;

/// Execution feedback for one driver, in the order the executor saw it.
#[derive(Debug)]
pub enum DriverMessage {
    Submitted {
        intent_id: String,
        handle: OrderHandle,
    },
    Rejected {
        intent_id: String,
        reason: RejectionReason,
    },
    Fill(Fill),
}

/// Owns one `StrategyDriver` and feeds it bars and execution feedback.
///
/// Bar processing is synchronous inside the driver. The task only reads the
/// account and engine state before each bar and forwards the resulting
/// actions and events. Pending feedback is always applied before the next bar.
pub struct DriverTask {
    driver: StrategyDriver,
    bars: mpsc::Receiver<Bar>,
    feedback: mpsc::UnboundedReceiver<DriverMessage>,
    requests: mpsc::Sender<ExecutionRequest>,
    events: broadcast::Sender<EngineEvent>,
    account: Arc<dyn AccountView>,
    state: Arc<RwLock<EngineState>>,
}

impl DriverTask {
    pub fn new(
        driver: StrategyDriver,
        bars: mpsc::Receiver<Bar>,
        feedback: mpsc::UnboundedReceiver<DriverMessage>,
        requests: mpsc::Sender<ExecutionRequest>,
        events: broadcast::Sender<EngineEvent>,
        account: Arc<dyn AccountView>,
        state: Arc<RwLock<EngineState>>,
    ) -> Self {
        Self {
            driver,
            bars,
            feedback,
            requests,
            events,
            account,
            state,
        }
    }

    /// Run until both the bar stream and the feedback channel close.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        let name = self.driver.name().to_string();
        let instrument = self.driver.instrument().to_string();

        let position = self.account.current_position(&instrument).await;
        if !position.is_flat() {
            info!(
                strategy = %name,
                %instrument,
                direction = %position.direction,
                volume = position.volume,
                "Adopting existing position"
            );
            let decision = self.driver.reconcile(position);
            self.dispatch(decision).await;
        }

        info!(
            strategy = %name,
            %instrument,
            timeframe = %self.driver.timeframe(),
            indicators = ?self.driver.indicator_names(),
            "Driver running"
        );

        loop {
            tokio::select! {
                biased;

                Some(message) = self.feedback.recv() => self.on_feedback(&name, message).await,
                Some(bar) = self.bars.recv() => {
                    let trading = *self.state.read().await == EngineState::Running;
                    let equity = self.account.current_equity().await;
                    let decision = self.driver.on_bar(&bar, equity, trading);
                    self.dispatch(decision).await;
                }
                else => break,
            }
        }

        info!(strategy = %name, "Driver channels closed; task exiting");
    }

    async fn on_feedback(&mut self, name: &str, message: DriverMessage) {
        match message {
            DriverMessage::Submitted { intent_id, handle } => {
                debug!(strategy = %name, %intent_id, %handle, "Order acknowledged");
                let actions = self.driver.on_submitted(&intent_id, handle);
                self.dispatch(BarDecision { actions, events: Vec::new() }).await;
            }
            DriverMessage::Rejected { intent_id, reason } => {
                warn!(strategy = %name, %intent_id, %reason, "Order rejected");
                let events = self.driver.on_rejected(&intent_id, reason);
                self.dispatch(BarDecision { actions: Vec::new(), events }).await;
            }
            DriverMessage::Fill(fill) => {
                let decision = self.driver.on_fill(&fill);
                self.dispatch(decision).await;
            }
        }
    }

    async fn dispatch(&self, decision: BarDecision) {
        let driver = self.driver.name();
        for action in decision.actions {
            let request = match action {
                ManagerAction::Submit(intent) => ExecutionRequest::Submit {
                    driver: driver.to_string(),
                    intent,
                },
                ManagerAction::Cancel(handle) => ExecutionRequest::Cancel {
                    driver: driver.to_string(),
                    handle,
                },
            };
            if self.requests.send(request).await.is_err() {
                warn!(strategy = %driver, "Executor channel closed; action dropped");
            }
        }
        for event in decision.events {
            // Ignore send errors (no active receivers)
            let _ = self.events.send(event);
        }
    }
}
