//! Queue workers.
//!
//! Each strategy has a market worker and an order worker. A worker takes the
//! strategy lock for every event, so handling stays serialized per strategy.
//! Errors and panics are contained here: the event is logged and skipped,
//! and the worker moves on to the next one.

use super::{MarketEvent, OrderEvent, StrategyReceivers, WorkerMessage};
use crate::persistence::PersistenceWriter;
use crate::strategy::{LifecycleError, StrategyEngine};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A strategy behind its lock, shared by both of its workers.
pub type SharedEngine = Arc<Mutex<dyn StrategyEngine>>;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long a worker waits on an empty queue before re-checking `stop`.
    pub dequeue_timeout: Duration,
    pub stop: Arc<AtomicBool>,
}

/// An event a worker can hand to a strategy.
#[async_trait]
pub trait EngineEvent: Send + Sync + 'static {
    const QUEUE: &'static str;

    async fn deliver(&self, engine: &mut dyn StrategyEngine) -> Result<(), LifecycleError>;
}

#[async_trait]
impl EngineEvent for MarketEvent {
    const QUEUE: &'static str = "market";

    async fn deliver(&self, engine: &mut dyn StrategyEngine) -> Result<(), LifecycleError> {
        engine.on_market_event(self).await
    }
}

#[async_trait]
impl EngineEvent for OrderEvent {
    const QUEUE: &'static str = "orders";

    async fn deliver(&self, engine: &mut dyn StrategyEngine) -> Result<(), LifecycleError> {
        engine.on_order_event(self).await
    }
}

pub struct WorkerHandles {
    pub market: JoinHandle<()>,
    pub orders: JoinHandle<()>,
}

impl WorkerHandles {
    /// Wait for both workers to exit.
    pub async fn join(self) {
        for handle in [self.market, self.orders] {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}

/// Spawn the two workers of one strategy.
pub fn spawn_workers(
    id: impl Into<String>,
    engine: SharedEngine,
    receivers: StrategyReceivers,
    writer: PersistenceWriter,
    settings: WorkerSettings,
) -> WorkerHandles {
    let id = id.into();
    WorkerHandles {
        market: tokio::spawn(run_worker(
            id.clone(),
            Arc::clone(&engine),
            receivers.market,
            writer.clone(),
            settings.clone(),
        )),
        orders: tokio::spawn(run_worker(id, engine, receivers.orders, writer, settings)),
    }
}

async fn run_worker<E: EngineEvent>(
    id: String,
    engine: SharedEngine,
    mut rx: mpsc::Receiver<WorkerMessage<E>>,
    writer: PersistenceWriter,
    settings: WorkerSettings,
) {
    debug!(strategy = %id, queue = E::QUEUE, "Worker started");

    loop {
        if settings.stop.load(Ordering::Relaxed) {
            break;
        }

        let event = match tokio::time::timeout(settings.dequeue_timeout, rx.recv()).await {
            Err(_) => continue,
            Ok(None) | Ok(Some(WorkerMessage::Shutdown)) => break,
            Ok(Some(WorkerMessage::Event(event))) => event,
        };

        let mut guard = engine.lock().await;
        match AssertUnwindSafe(event.deliver(&mut *guard)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(strategy = %id, queue = E::QUEUE, error = %e, "Event skipped");
            }
            Err(panic) => {
                error!(
                    strategy = %id,
                    queue = E::QUEUE,
                    panic_msg = %panic_message(panic.as_ref()),
                    "Strategy panicked handling event, skipping it"
                );
            }
        }

        if let Some(snapshot) = guard.take_snapshot() {
            if let Err(e) = writer.submit(snapshot) {
                error!(strategy = %id, error = %e, "Could not queue snapshot");
            }
        }
    }

    info!(strategy = %id, queue = E::QUEUE, "Worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TraderConfig};
    use crate::dispatch::{strategy_queues, EventRouter};
    use crate::exchange::{MockMarketData, PaperExchange, PriceLevel, TradeTick};
    use crate::orderbook::OrderBook;
    use crate::persistence::{JsonFileStore, PersistedSnapshot, SnapshotStore};
    use crate::strategy::{StrategyKind, StrategyProfile, TraderAccount, TradingEngine};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            dequeue_timeout: Duration::from_millis(20),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn trade(symbol: &str, price: Decimal) -> MarketEvent {
        MarketEvent::Trade(TradeTick {
            symbol: symbol.to_string(),
            price,
            quantity: dec!(1),
            trade_time: 0,
        })
    }

    /// Counts deliveries; panics or fails on chosen prices.
    struct FaultyEngine {
        handled: Arc<AtomicUsize>,
        account: TraderAccount,
    }

    #[async_trait]
    impl StrategyEngine for FaultyEngine {
        fn id(&self) -> &str {
            "faulty"
        }

        fn symbol(&self) -> &str {
            "BTCUSDT"
        }

        fn kind(&self) -> StrategyKind {
            StrategyKind::SecuredCapital
        }

        fn account(&self) -> &TraderAccount {
            &self.account
        }

        async fn bootstrap(&mut self) -> Result<(), LifecycleError> {
            Ok(())
        }

        async fn on_market_event(&mut self, event: &MarketEvent) -> Result<(), LifecycleError> {
            if let MarketEvent::Trade(tick) = event {
                if tick.price == dec!(13) {
                    panic!("unlucky price");
                }
                if tick.price == dec!(7) {
                    return Err(LifecycleError::EmptyFill {
                        order_id: "7".to_string(),
                    });
                }
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_order_event(&mut self, _event: &OrderEvent) -> Result<(), LifecycleError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn snapshot(&self) -> PersistedSnapshot {
            PersistedSnapshot::capture("faulty", StrategyKind::SecuredCapital, "BTCUSDT", &self.account)
        }

        fn take_snapshot(&mut self) -> Option<PersistedSnapshot> {
            None
        }
    }

    fn writer_for(dir: &tempfile::TempDir) -> PersistenceWriter {
        let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
        PersistenceWriter::spawn(store).0
    }

    #[tokio::test]
    async fn test_worker_survives_errors_and_panics() {
        let dir = tempfile::tempdir().unwrap();
        let handled = Arc::new(AtomicUsize::new(0));
        let engine: SharedEngine = Arc::new(Mutex::new(FaultyEngine {
            handled: handled.clone(),
            account: TraderAccount::new(dec!(1000), dec!(0.001)),
        }));
        let (queues, receivers) = strategy_queues("faulty", 16);
        let handles = spawn_workers("faulty", engine, receivers, writer_for(&dir), settings());

        for price in [dec!(1), dec!(13), dec!(7), dec!(2)] {
            queues.market.send(WorkerMessage::Event(trade("BTCUSDT", price))).await.unwrap();
        }
        queues
            .orders
            .send(WorkerMessage::Event(OrderEvent::Other("outboundAccountPosition".into())))
            .await
            .unwrap();
        queues.market.send(WorkerMessage::Shutdown).await.unwrap();
        queues.orders.send(WorkerMessage::Shutdown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handles.join())
            .await
            .expect("workers should stop on the sentinel");
        assert_eq!(handled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_flag_ends_idle_workers() {
        let dir = tempfile::tempdir().unwrap();
        let engine: SharedEngine = Arc::new(Mutex::new(FaultyEngine {
            handled: Arc::new(AtomicUsize::new(0)),
            account: TraderAccount::new(dec!(1000), dec!(0.001)),
        }));
        let (_queues, receivers) = strategy_queues("faulty", 4);
        let settings = settings();
        let handles = spawn_workers("faulty", engine, receivers, writer_for(&dir), settings.clone());

        settings.stop.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), handles.join())
            .await
            .expect("workers should notice the stop flag");
    }

    fn paper_engine(id: &str, capital: Decimal) -> TradingEngine {
        let trader = TraderConfig {
            id: id.to_string(),
            kind: StrategyKind::SecuredCapital,
            symbol: "BTCUSDT".to_string(),
            capital: Some(capital),
            trade_fraction: None,
            target_volume: Some(dec!(10)),
            respected_gap: Some(dec!(1)),
            stop_loss_pct: None,
            max_orders: None,
        };
        let mut book = OrderBook::new("BTCUSDT", 5000, dec!(0.7), dec!(10));
        let bids: Vec<PriceLevel> = (0..40)
            .map(|i| PriceLevel {
                price: dec!(100) - Decimal::from(i),
                quantity: dec!(8),
            })
            .collect();
        book.load_snapshot(1, &bids, &[PriceLevel { price: dec!(101), quantity: dec!(1) }]);

        TradingEngine::new(
            id,
            "BTCUSDT",
            StrategyProfile::resolve(&Config::default(), &trader),
            TraderAccount::new(capital, dec!(0.001)),
            Arc::new(PaperExchange::new()),
            Arc::new(MockMarketData::new()),
        )
        .with_order_book(book, 1000)
    }

    /// Two strategies fed interleaved trades and order frames from
    /// concurrent producers. Every account must balance afterwards and the
    /// last persisted snapshot must match memory.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_strategies_keep_accounts_balanced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
        let (writer, writer_handle) = PersistenceWriter::spawn(store.clone());

        let engines: Vec<(String, Decimal, Arc<Mutex<TradingEngine>>)> = vec![
            ("alpha".to_string(), dec!(1000), Arc::new(Mutex::new(paper_engine("alpha", dec!(1000))))),
            ("beta".to_string(), dec!(2500), Arc::new(Mutex::new(paper_engine("beta", dec!(2500))))),
        ];

        let mut router = EventRouter::new();
        let mut handles = Vec::new();
        for (id, _, engine) in &engines {
            let (queues, receivers) = strategy_queues(id.as_str(), 10_000);
            router.subscribe("BTCUSDT", queues);
            let shared: SharedEngine = engine.clone();
            handles.push(spawn_workers(id.as_str(), shared, receivers, writer.clone(), settings()));
        }
        let router = Arc::new(router);

        // Prices walk down through support levels and bounce, tripping
        // entries, trailing stops and exits.
        let path: Vec<Decimal> = (0..400)
            .map(|i| {
                let phase = i % 40;
                let offset = if phase < 20 { phase } else { 40 - phase };
                dec!(100) - Decimal::from(offset) + Decimal::from(i % 3) / dec!(100)
            })
            .collect();

        let market = {
            let router = router.clone();
            let path = path.clone();
            tokio::spawn(async move {
                for price in path {
                    router.route_market(&trade("BTCUSDT", price));
                    tokio::task::yield_now().await;
                }
            })
        };
        let orders = {
            let router = router.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    router.route_order(&OrderEvent::Other("balanceUpdate".into()));
                    tokio::task::yield_now().await;
                }
            })
        };
        market.await.unwrap();
        orders.await.unwrap();

        router.shutdown().await;
        for handle in handles {
            handle.join().await;
        }
        tokio_test::assert_ok!(writer.flush().await);
        assert_eq!(router.dropped(), 0);

        for (id, initial, engine) in &engines {
            let engine = engine.lock().await;
            let account = engine.account();
            assert_eq!(
                account.capital,
                *initial - account.open_cost() + account.realized_profit(),
                "{} is out of balance",
                id
            );
            assert_eq!(account.reserved_amount, Decimal::ZERO);
            assert!(!account.trade_history.is_empty(), "{} never closed a trade", id);
            assert!(account.trade_history.iter().all(|o| o.is_closed()));

            let persisted = store.load(id).unwrap().expect("snapshot written");
            assert_eq!(persisted, engine.snapshot());
        }

        writer.shutdown().await.unwrap();
        writer_handle.await.unwrap();
    }
}
