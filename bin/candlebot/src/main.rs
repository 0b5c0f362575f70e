use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, EngineEvent};
use engine::{Engine, JsonLinesFeed};
use paper::PaperClient;
use strategy::StrategyFileConfig;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Candlebot failed to start");
        std::process::exit(1);
    }
}

async fn run() -> common::Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    info!(
        strategies = strategy_file.strategies.len(),
        path = %cfg.strategy_config_path,
        "Candlebot starting"
    );

    // ── Execution (paper) ─────────────────────────────────────────────────────
    let (fill_tx, fill_rx) = mpsc::unbounded_channel();
    let paper = Arc::new(PaperClient::new(
        cfg.paper_initial_equity,
        cfg.paper_slippage_bps,
        fill_tx,
    ));

    // ── Engine ────────────────────────────────────────────────────────────────
    let feed = Arc::new(JsonLinesFeed::new(&cfg.feed_path));
    let (mut engine, handle) = Engine::new(
        strategy_file.strategies,
        feed,
        paper.clone(),
        paper.clone(),
        fill_rx,
    );
    engine.observe_bars(paper.clone());

    // ── Event log ─────────────────────────────────────────────────────────────
    let mut events = handle.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "Event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Spawn and start ───────────────────────────────────────────────────────
    tokio::spawn(engine.run());
    handle.send(EngineCommand::Start).await;

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    handle.send(EngineCommand::Stop).await;
    info!(
        realized_pnl = paper.realized_pnl().await,
        resting_orders = paper.resting_orders().await,
        "Shutdown signal received. Exiting."
    );
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ExitTriggered { instrument, reason, price } => {
            info!(%instrument, %reason, price, "Exit triggered");
        }
        EngineEvent::EntrySkipped { instrument, reason } => {
            warn!(%instrument, %reason, "Entry skipped");
        }
        EngineEvent::OrderRejected { instrument, intent_id, reason } => {
            warn!(%instrument, %intent_id, %reason, "Order rejected");
        }
        EngineEvent::Filled { instrument, fill, position } => {
            info!(
                %instrument,
                side = %fill.side,
                price = fill.fill_price,
                volume = fill.fill_volume,
                direction = %position.direction,
                net = position.volume,
                "Filled"
            );
        }
        EngineEvent::TradeClosed { instrument, outcome } => {
            info!(%instrument, volume = outcome.volume, pnl = outcome.pnl, "Trade closed");
        }
    }
}
