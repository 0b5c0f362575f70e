use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{Error, ExecutionClient, Fill, OrderHandle, OrderIntent, RejectionReason};

use crate::task::DriverMessage;

/// Work for the executor, sent by driver tasks and the engine.
#[derive(Debug)]
pub enum ExecutionRequest {
    /// Route fills and acknowledgements for `instrument` to `feedback`.
    Attach {
        driver: String,
        instrument: String,
        feedback: mpsc::UnboundedSender<DriverMessage>,
    },
    /// Forget every driver route, e.g. when the engine stops.
    DetachAll,
    Submit {
        driver: String,
        intent: OrderIntent,
    },
    Cancel {
        driver: String,
        handle: OrderHandle,
    },
}

struct Route {
    instrument: String,
    feedback: mpsc::UnboundedSender<DriverMessage>,
}

/// Places and cancels orders on behalf of every driver and routes fills
/// back to the driver that owns the order.
///
/// This is the ONLY component that calls `ExecutionClient::submit`.
/// Acknowledgements are delivered to the driver before any fill for the
/// same handle is routed. Delivery never waits on a driver, so a driver
/// blocked on the request channel cannot stall the executor.
pub struct OrderExecutor {
    request_rx: mpsc::Receiver<ExecutionRequest>,
    fill_rx: mpsc::UnboundedReceiver<Fill>,
    client: Arc<dyn ExecutionClient>,
    routes: HashMap<String, Route>,
    owners: HashMap<OrderHandle, String>,
}

impl OrderExecutor {
    pub fn new(
        request_rx: mpsc::Receiver<ExecutionRequest>,
        fill_rx: mpsc::UnboundedReceiver<Fill>,
        client: Arc<dyn ExecutionClient>,
    ) -> Self {
        Self {
            request_rx,
            fill_rx,
            client,
            routes: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Run the executor loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("OrderExecutor running");
        loop {
            tokio::select! {
                // Requests first, so routes exist before fills that need them.
                biased;

                request = self.request_rx.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => {
                            warn!("Request channel closed; OrderExecutor exiting");
                            break;
                        }
                    }
                }
                fill = self.fill_rx.recv() => {
                    match fill {
                        Some(fill) => self.route_fill(fill),
                        None => {
                            warn!("Fill channel closed; OrderExecutor exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_request(&mut self, request: ExecutionRequest) {
        match request {
            ExecutionRequest::Attach { driver, instrument, feedback } => {
                debug!(%driver, %instrument, "Driver attached");
                self.routes.insert(driver, Route { instrument, feedback });
            }
            ExecutionRequest::DetachAll => {
                self.routes.clear();
                self.owners.clear();
            }
            ExecutionRequest::Submit { driver, intent } => self.submit(driver, intent).await,
            ExecutionRequest::Cancel { driver, handle } => {
                match self.client.cancel(&handle).await {
                    Ok(()) => {
                        info!(%driver, %handle, "Order cancelled");
                        self.owners.remove(&handle);
                    }
                    // The order may have filled already; its fill is still routed.
                    Err(e) => warn!(%driver, %handle, error = %e, "Cancel failed"),
                }
            }
        }
    }

    async fn submit(&mut self, driver: String, intent: OrderIntent) {
        info!(
            %driver,
            instrument = %intent.instrument,
            side = %intent.side,
            volume = intent.volume,
            kind = ?intent.kind,
            price = ?intent.price,
            reason = ?intent.reason,
            "Submitting order"
        );

        let reply = match self.client.submit(&intent).await {
            Ok(handle) => {
                self.owners.insert(handle.clone(), driver.clone());
                DriverMessage::Submitted {
                    intent_id: intent.id,
                    handle,
                }
            }
            Err(e) => {
                error!(%driver, instrument = %intent.instrument, error = %e, "Order submission failed");
                DriverMessage::Rejected {
                    intent_id: intent.id,
                    reason: rejection_reason(e),
                }
            }
        };
        self.deliver(&driver, reply);
    }

    fn route_fill(&mut self, fill: Fill) {
        let owner = match self.owners.get(&fill.handle) {
            Some(driver) => Some(driver.clone()),
            None => {
                // Orders placed before a restart are owned by whoever trades the instrument.
                let mut candidates = self
                    .routes
                    .iter()
                    .filter(|(_, route)| route.instrument == fill.instrument)
                    .map(|(name, _)| name.clone());
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
        };

        match owner {
            Some(driver) => self.deliver(&driver, DriverMessage::Fill(fill)),
            None => warn!(
                instrument = %fill.instrument,
                handle = %fill.handle,
                "Fill has no owning driver; dropped"
            ),
        }
    }

    fn deliver(&self, driver: &str, message: DriverMessage) {
        let Some(route) = self.routes.get(driver) else {
            warn!(%driver, "No route to driver; message dropped");
            return;
        };
        if route.feedback.send(message).is_err() {
            warn!(%driver, "Driver feedback channel closed; message dropped");
        }
    }
}

fn rejection_reason(error: Error) -> RejectionReason {
    match error {
        Error::OrderRejected { reason } => reason,
        other => RejectionReason::Exchange(other.to_string()),
    }
}
