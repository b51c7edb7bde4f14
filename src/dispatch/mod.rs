//! Per-strategy dispatch.
//!
//! Every strategy owns a market queue and an order queue, each drained by
//! one worker. Both workers take the same engine lock, so one strategy never
//! handles two events at once while different strategies run in parallel.
//! Producers publish through the `EventRouter` and never block.

mod poller;
mod worker;

pub use poller::{spawn_poller, PollTarget};
pub use worker::{spawn_workers, EngineEvent, SharedEngine, WorkerHandles, WorkerSettings};

use crate::exchange::{Candle, DepthUpdate, ExecutionReport, FundingRate, TradeTick};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Event consumed by a strategy's market worker.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Depth(DepthUpdate),
    Trade(TradeTick),
    Candles { symbol: String, candles: Vec<Candle> },
    Funding(FundingRate),
    /// The market stream for `symbol` reconnected; depth diffs were missed.
    Reconnected { symbol: String },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Depth(update) => &update.symbol,
            MarketEvent::Trade(tick) => &tick.symbol,
            MarketEvent::Candles { symbol, .. } | MarketEvent::Reconnected { symbol } => symbol,
            MarketEvent::Funding(rate) => &rate.symbol,
        }
    }
}

/// Event consumed by a strategy's order worker.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    Execution(ExecutionReport),
    /// Any other user data frame, by event type.
    Other(String),
}

/// Queue item. `Shutdown` is the cooperative stop sentinel.
#[derive(Debug, Clone)]
pub enum WorkerMessage<T> {
    Event(T),
    Shutdown,
}

/// Sending half of one strategy's two queues.
#[derive(Debug, Clone)]
pub struct StrategyQueues {
    pub id: String,
    pub market: mpsc::Sender<WorkerMessage<MarketEvent>>,
    pub orders: mpsc::Sender<WorkerMessage<OrderEvent>>,
}

/// Receiving half, handed to the workers.
pub struct StrategyReceivers {
    pub market: mpsc::Receiver<WorkerMessage<MarketEvent>>,
    pub orders: mpsc::Receiver<WorkerMessage<OrderEvent>>,
}

/// Create the bounded queue pair of one strategy.
pub fn strategy_queues(id: impl Into<String>, capacity: usize) -> (StrategyQueues, StrategyReceivers) {
    let (market_tx, market_rx) = mpsc::channel(capacity);
    let (orders_tx, orders_rx) = mpsc::channel(capacity);
    (
        StrategyQueues {
            id: id.into(),
            market: market_tx,
            orders: orders_tx,
        },
        StrategyReceivers {
            market: market_rx,
            orders: orders_rx,
        },
    )
}

/// Non-blocking enqueue. A full queue drops the event.
/// Returns whether the event was queued.
pub fn offer<T>(tx: &mpsc::Sender<WorkerMessage<T>>, event: T, owner: &str, dropped: &AtomicU64) -> bool {
    match tx.try_send(WorkerMessage::Event(event)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!(strategy = %owner, "Queue full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!(strategy = %owner, "Queue closed, dropping event");
            false
        }
    }
}

/// Fans events out to strategy queues.
///
/// Market events go to every strategy subscribed to the event's symbol;
/// order events go to every strategy.
#[derive(Debug, Default)]
pub struct EventRouter {
    by_symbol: HashMap<String, Vec<StrategyQueues>>,
    all: Vec<StrategyQueues>,
    dropped: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, symbol: impl Into<String>, queues: StrategyQueues) {
        self.by_symbol
            .entry(symbol.into())
            .or_default()
            .push(queues.clone());
        self.all.push(queues);
    }

    /// Symbols with at least one subscriber.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.by_symbol.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Returns how many queues accepted the event.
    pub fn route_market(&self, event: &MarketEvent) -> usize {
        let Some(subscribers) = self.by_symbol.get(event.symbol()) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|q| offer(&q.market, event.clone(), &q.id, &self.dropped))
            .count()
    }

    /// Returns how many queues accepted the event.
    pub fn route_order(&self, event: &OrderEvent) -> usize {
        self.all
            .iter()
            .filter(|q| offer(&q.orders, event.clone(), &q.id, &self.dropped))
            .count()
    }

    /// Send the stop sentinel to every worker queue. Waits for room so the
    /// sentinel is never dropped.
    pub async fn shutdown(&self) {
        for queues in &self.all {
            let _ = queues.market.send(WorkerMessage::Shutdown).await;
            let _ = queues.orders.send(WorkerMessage::Shutdown).await;
        }
    }

    /// Events dropped on full queues since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
