use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use common::{
    AccountView, Bar, BarFeed, BarObserver, EngineCommand, EngineEvent, EngineState,
    ExecutionClient, Fill,
};
use strategy::{SharedSnapshot, StrategyConfig};

use crate::driver::StrategyDriver;
use crate::executor::{ExecutionRequest, OrderExecutor};
use crate::task::DriverTask;

/// Cloneable handle for the binary and any other observer.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    event_tx: broadcast::Sender<EngineEvent>,
    bar_tx: broadcast::Sender<Bar>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Subscribe to exits, skipped entries, rejections and fills.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to every final bar the engine forwards to its drivers.
    pub fn subscribe_bars(&self) -> broadcast::Receiver<Bar> {
        self.bar_tx.subscribe()
    }
}

/// Everything spawned by one `Start`.
#[derive(Default)]
struct Session {
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn abort(&mut self) {
        for h in self.tasks.drain(..) {
            h.abort();
        }
    }
}

/// The main engine: owns the strategy set, spawns one task per driver on
/// `Start` and processes lifecycle commands.
pub struct Engine {
    strategies: Vec<StrategyConfig>,
    feed: Arc<dyn BarFeed>,
    account: Arc<dyn AccountView>,
    observers: Vec<Arc<dyn BarObserver>>,
    state: Arc<RwLock<EngineState>>,
    event_tx: broadcast::Sender<EngineEvent>,
    bar_tx: broadcast::Sender<Bar>,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
    request_tx: mpsc::Sender<ExecutionRequest>,
    executor: Option<OrderExecutor>,
}

impl Engine {
    /// `fill_rx` must be the receiving end of the channel `client` reports fills on.
    pub fn new(
        strategies: Vec<StrategyConfig>,
        feed: Arc<dyn BarFeed>,
        client: Arc<dyn ExecutionClient>,
        account: Arc<dyn AccountView>,
        fill_rx: mpsc::UnboundedReceiver<Fill>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(1024);
        let (bar_tx, _) = broadcast::channel(1024);
        let (request_tx, request_rx) = mpsc::channel(256);
        let state = Arc::new(RwLock::new(EngineState::Stopped));

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
            event_tx: event_tx.clone(),
            bar_tx: bar_tx.clone(),
        };

        let engine = Engine {
            strategies,
            feed,
            account,
            observers: Vec::new(),
            state,
            event_tx,
            bar_tx,
            command_rx,
            command_tx,
            request_tx,
            executor: Some(OrderExecutor::new(request_rx, fill_rx, client)),
        };

        (engine, handle)
    }

    /// Register an observer that sees each bar before the drivers do.
    pub fn observe_bars(&mut self, observer: Arc<dyn BarObserver>) {
        self.observers.push(observer);
    }

    /// Run the engine. This task drives session spawning and command processing.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        if let Some(executor) = self.executor.take() {
            tokio::spawn(executor.run());
        }
        info!(
            strategies = self.strategies.len(),
            "Engine initialized in Stopped state. Waiting for Start command."
        );

        let mut session = Session::default();

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Start) => {
                    let current = *self.state.read().await;
                    if current != EngineState::Stopped {
                        info!(state = %current, "Engine already started");
                        continue;
                    }
                    *self.state.write().await = EngineState::Running;
                    session = self.start_session().await;
                }

                Some(EngineCommand::Stop) => {
                    info!("Engine stopping; aborting driver and feed tasks");
                    *self.state.write().await = EngineState::Stopped;
                    session.abort();
                    let _ = self.request_tx.send(ExecutionRequest::DetachAll).await;
                }

                Some(EngineCommand::Pause) => {
                    let current = *self.state.read().await;
                    if current == EngineState::Running {
                        info!("Engine paused; indicators keep updating, orders suppressed");
                        *self.state.write().await = EngineState::Paused;
                    }
                }

                Some(EngineCommand::Resume) => {
                    let current = *self.state.read().await;
                    if current == EngineState::Paused {
                        info!("Engine resumed");
                        *self.state.write().await = EngineState::Running;
                    }
                }

                None => {
                    warn!("Engine command channel closed; shutting down");
                    session.abort();
                    break;
                }
            }
        }
    }

    /// Build fresh drivers, attach them to the executor and start the feeds.
    async fn start_session(&self) -> Session {
        let mut session = Session::default();
        let snapshot = SharedSnapshot::default();
        let mut inboxes: HashMap<(String, String), Vec<mpsc::Sender<Bar>>> = HashMap::new();

        for config in &self.strategies {
            let driver = StrategyDriver::new(config.clone(), Some(snapshot.clone()));
            let (bar_tx, bar_rx) = mpsc::channel(256);
            let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

            let attach = ExecutionRequest::Attach {
                driver: config.name.clone(),
                instrument: config.instrument.clone(),
                feedback: feedback_tx,
            };
            if self.request_tx.send(attach).await.is_err() {
                error!("Executor is gone; cannot start drivers");
                return session;
            }

            let task = DriverTask::new(
                driver,
                bar_rx,
                feedback_rx,
                self.request_tx.clone(),
                self.event_tx.clone(),
                self.account.clone(),
                self.state.clone(),
            );
            session.tasks.push(tokio::spawn(task.run()));
            inboxes
                .entry((config.instrument.clone(), config.timeframe.clone()))
                .or_default()
                .push(bar_tx);
        }

        for ((instrument, timeframe), targets) in inboxes {
            match self.feed.subscribe(&instrument, &timeframe).await {
                Ok(rx) => {
                    info!(%instrument, %timeframe, drivers = targets.len(), "Bar stream started");
                    let forwarder = BarForwarder {
                        rx,
                        observers: self.observers.clone(),
                        targets,
                        bar_tx: self.bar_tx.clone(),
                    };
                    session.tasks.push(tokio::spawn(forwarder.run()));
                }
                // Other instruments keep trading.
                Err(e) => error!(%instrument, %timeframe, error = %e, "Bar subscription failed"),
            }
        }

        session
    }
}

/// Fans one subscription out to observers, its drivers and the bar broadcast.
struct BarForwarder {
    rx: mpsc::Receiver<Bar>,
    observers: Vec<Arc<dyn BarObserver>>,
    targets: Vec<mpsc::Sender<Bar>>,
    bar_tx: broadcast::Sender<Bar>,
}

impl BarForwarder {
    async fn run(mut self) {
        while let Some(bar) = self.rx.recv().await {
            if !bar.is_final {
                continue;
            }
            for observer in &self.observers {
                observer.on_bar(&bar).await;
            }
            for target in &self.targets {
                if target.send(bar.clone()).await.is_err() {
                    warn!(instrument = %bar.instrument, "Driver inbox closed");
                }
            }
            // Ignore send errors (no active receivers)
            let _ = self.bar_tx.send(bar);
        }
        info!("Bar stream ended");
    }
}
