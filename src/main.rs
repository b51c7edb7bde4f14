//! Book Trader - Main Entry Point
//!
//! Runs every configured trader against the Binance streams, or prints the
//! persisted state of the traders with `status`.

use anyhow::{Context, Result};
use book_trader::config::{Config, LoggingConfig, TraderConfig};
use book_trader::dispatch::{
    spawn_poller, spawn_workers, strategy_queues, EventRouter, PollTarget, SharedEngine,
    WorkerHandles, WorkerSettings,
};
use book_trader::exchange::{
    BinanceClient, BinanceWebSocket, MarketData, OrderGateway, PaperExchange, UserStreamAuth,
};
use book_trader::orderbook::OrderBook;
use book_trader::persistence::{
    open_store, JsonFileStore, PersistenceWriter, SnapshotStore, SqliteStore,
};
use book_trader::strategy::analytics::{summarize, TraderSummary};
use book_trader::strategy::{
    EntrySignal, OrderState, StrategyEngine, StrategyProfile, TraderAccount, TradingEngine, Venue,
};
use book_trader::stream::{spawn_listen_key_renewal, supervise, MarketStream, UserDataStream};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Interval between account summaries in the log.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Book Trader CLI
#[derive(Parser)]
#[command(name = "book-trader")]
#[command(version, about = "Order-book driven spot trading on Binance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show persisted trader state
    Status {
        /// Directory of JSON snapshots (default: persistence.data_dir)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Read a SQLite snapshot database instead
        #[arg(long)]
        sqlite: Option<PathBuf>,

        /// Show open orders and daily profits
        #[arg(short, long)]
        verbose: bool,
    },
}

/// One running trader.
struct Trader {
    id: String,
    engine: Arc<Mutex<TradingEngine>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    init_logging(&config.logging)?;

    if let Some(Commands::Status {
        data_dir,
        sqlite,
        verbose,
    }) = cli.command
    {
        return show_status(&config, data_dir, sqlite, verbose);
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              Book Trader v{}                            ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    config.validate()?;
    log_config(&config);

    if config.traders.is_empty() {
        warn!("⚠️  No traders configured, nothing to do");
        return Ok(());
    }
    if config.has_live_traders() {
        warn!("⚠️  LIVE TRADING - at least one trader sends real orders");
        anyhow::ensure!(
            !config.binance.api_key.is_empty() && !config.binance.secret_key.is_empty(),
            "live traders need binance.api_key and binance.secret_key"
        );
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let client = Arc::new(BinanceClient::new(&config.binance)?);
    let market: Arc<dyn MarketData> = client.clone();
    let live_gateway: Arc<dyn OrderGateway> = client.clone();
    let paper_gateway: Arc<dyn OrderGateway> = Arc::new(PaperExchange::new());

    let store = open_store(&config.persistence).context("Failed to open snapshot store")?;
    let (writer, writer_handle) = PersistenceWriter::spawn(store.clone());

    // Build and bootstrap every trader.
    let mut router = EventRouter::new();
    let mut traders = Vec::new();
    let mut pending_workers = Vec::new();
    let mut poll_targets = Vec::new();

    for trader_config in &config.traders {
        let profile = StrategyProfile::resolve(&config, trader_config);
        let account = restore_account(store.as_ref(), &config, trader_config)?;
        let gateway = match profile.venue {
            Venue::Live => live_gateway.clone(),
            Venue::Paper => paper_gateway.clone(),
        };

        let mut engine = TradingEngine::new(
            &trader_config.id,
            &trader_config.symbol,
            profile.clone(),
            account,
            gateway,
            market.clone(),
        );
        if let EntrySignal::Support {
            target_volume,
            support_ratio,
            ..
        } = &profile.entry
        {
            let book = OrderBook::new(
                &trader_config.symbol,
                config.order_book.max_levels,
                *support_ratio,
                *target_volume,
            );
            engine = engine.with_order_book(book, config.order_book.snapshot_limit);
        }

        if let Err(e) = engine.bootstrap().await {
            warn!(trader = %trader_config.id, error = %e, "Bootstrap incomplete");
        }
        if let Some(snapshot) = engine.take_snapshot() {
            writer.submit(snapshot)?;
        }

        let (queues, receivers) = strategy_queues(&trader_config.id, config.stream.queue_capacity);
        if let Some(params) = profile.entry.band_params() {
            poll_targets.push((
                PollTarget {
                    symbol: trader_config.symbol.clone(),
                    params: params.clone(),
                    funding: matches!(profile.entry, EntrySignal::FundingGated { .. }),
                },
                queues.clone(),
            ));
        }
        router.subscribe(&trader_config.symbol, queues);

        let engine = Arc::new(Mutex::new(engine));
        pending_workers.push((trader_config.id.clone(), engine.clone(), receivers));
        traders.push(Trader {
            id: trader_config.id.clone(),
            engine,
        });
    }

    let router = Arc::new(router);
    let settings = WorkerSettings {
        dequeue_timeout: Duration::from_millis(config.stream.dequeue_timeout_ms),
        stop: stop.clone(),
    };

    let workers: Vec<WorkerHandles> = pending_workers
        .into_iter()
        .map(|(id, engine, receivers)| {
            let shared: SharedEngine = engine;
            spawn_workers(id, shared, receivers, writer.clone(), settings.clone())
        })
        .collect();

    // Connection tasks are aborted on shutdown.
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    for (target, queues) in poll_targets {
        connections.push(spawn_poller(target, market.clone(), queues));
    }

    let endpoints = BinanceWebSocket::new(config.binance.testnet, config.binance.ws_url.clone());
    let reconnect_delay = Duration::from_secs(config.stream.reconnect_delay_secs);
    let connect_timeout = Duration::from_secs(config.stream.connect_timeout_secs);

    for symbol in router.symbols() {
        info!("📡 Subscribing to {} depth and trades", symbol);
        let stream = MarketStream::new(
            symbol,
            &endpoints,
            connect_timeout,
            config.stream.price_change_threshold,
            router.clone(),
        );
        connections.push(tokio::spawn(supervise(stream, reconnect_delay, stop.clone())));
    }

    let mut user_stream: Option<(Arc<dyn UserStreamAuth>, watch::Receiver<Option<String>>)> = None;
    if config.has_live_traders() {
        let auth: Arc<dyn UserStreamAuth> = client.clone();
        let (stream, listen_key) =
            UserDataStream::new(endpoints.clone(), auth.clone(), router.clone(), connect_timeout);
        connections.push(tokio::spawn(supervise(stream, reconnect_delay, stop.clone())));
        connections.push(spawn_listen_key_renewal(
            auth.clone(),
            listen_key.clone(),
            Duration::from_secs(config.stream.listen_key_renewal_secs),
        ));
        user_stream = Some((auth, listen_key));
    }

    connections.push(spawn_status_log(
        traders
            .iter()
            .map(|t| (t.id.clone(), t.engine.clone()))
            .collect(),
    ));

    info!("🚀 {} trader(s) running", traders.len());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    wait_for_shutdown().await;
    info!("🛑 Shutdown signal received");

    stop.store(true, Ordering::SeqCst);
    for handle in &connections {
        handle.abort();
    }
    router.shutdown().await;
    for worker in workers {
        worker.join().await;
    }

    info!("💾 [PERSISTENCE] Saving final state before shutdown...");
    for trader in &traders {
        let engine = trader.engine.lock().await;
        if let Err(e) = writer.submit(engine.snapshot()) {
            error!(trader = %trader.id, error = %e, "Could not queue final snapshot");
        }
        log_summary(&trader.id, &summarize(engine.account(), engine.last_price()));
    }
    writer.flush().await.context("Final snapshot flush failed")?;

    if let Some((auth, listen_key)) = user_stream {
        let key = listen_key.borrow().clone();
        if let Some(key) = key {
            if let Err(e) = auth.close_listen_key(&key).await {
                warn!(error = %e, "Failed to close listen key");
            }
        }
    }

    writer.shutdown().await?;
    if let Err(e) = writer_handle.await {
        error!(error = %e, "Persistence writer task failed");
    }
    if router.dropped() > 0 {
        warn!(dropped = router.dropped(), "Events dropped on full queues during the run");
    }

    info!("👋 Book Trader shutdown complete");
    Ok(())
}

/// Load a trader's snapshot, or start a fresh account.
fn restore_account(
    store: &dyn SnapshotStore,
    config: &Config,
    trader: &TraderConfig,
) -> Result<TraderAccount> {
    let snapshot = store
        .load(&trader.id)
        .with_context(|| format!("Failed to load snapshot of trader {}", trader.id))?;

    match snapshot {
        Some(snapshot) => {
            if snapshot.strategy != trader.kind {
                warn!(
                    trader = %trader.id,
                    persisted = %snapshot.strategy,
                    configured = %trader.kind,
                    "Snapshot was written by a different strategy kind"
                );
            }
            let account = snapshot.into_account(config.trading.fee_rate);
            info!(
                "📂 [PERSISTENCE] Restored {}: capital ${:.2}, {} open order(s), {} trade(s)",
                trader.id,
                account.capital,
                account.open_orders.len(),
                account.trade_history.len()
            );
            Ok(account)
        }
        None => {
            let capital = trader.capital.unwrap_or(config.trading.capital);
            info!(
                "📂 [PERSISTENCE] No saved state for {}, starting fresh with ${}",
                trader.id, capital
            );
            Ok(TraderAccount::new(capital, config.trading.fee_rate))
        }
    }
}

fn spawn_status_log(traders: Vec<(String, Arc<Mutex<TradingEngine>>)>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (id, engine) in &traders {
                let summary = {
                    let engine = engine.lock().await;
                    summarize(engine.account(), engine.last_price())
                };
                log_summary(id, &summary);
            }
        }
    })
}

fn log_summary(id: &str, summary: &TraderSummary) {
    info!(
        trader = %id,
        capital = %summary.capital.round_dp(2),
        reserved = %summary.reserved.round_dp(2),
        open = summary.open_positions,
        pending = summary.pending_buys + summary.pending_sales,
        trades = summary.closed_trades,
        realized = %summary.realized.round_dp(4),
        potential = %summary.potential().round_dp(4),
        "📊 Status"
    );
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(&config.directory)?;

    let file_appender = tracing_appender::rolling::hourly(&config.directory, "book-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    let filter = EnvFilter::from_default_env()
        .add_directive("book_trader=debug".parse()?)
        .add_directive(Level::INFO.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    if config.json {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Default capital: ${}", config.trading.capital);
    info!(
        "   Trade fraction: {:.1}%",
        config.trading.trade_fraction * Decimal::ONE_HUNDRED
    );
    info!("   Fee rate: {}", config.trading.fee_rate);
    info!(
        "   Stop loss: {:.1}%",
        config.trading.stop_loss_pct * Decimal::ONE_HUNDRED
    );
    info!(
        "   Order book: {} levels, support ratio {}",
        config.order_book.max_levels, config.order_book.support_ratio
    );
    info!(
        "   Reconnect delay: {}s, queue capacity: {}",
        config.stream.reconnect_delay_secs, config.stream.queue_capacity
    );
    info!("   Persistence: {:?}", config.persistence.backend);
    for trader in &config.traders {
        info!("   Trader {} → {} on {}", trader.id, trader.kind, trader.symbol);
    }
}

fn show_status(
    config: &Config,
    data_dir: Option<PathBuf>,
    sqlite: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              BOOK TRADER STATUS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let store: Box<dyn SnapshotStore> = match sqlite {
        Some(path) => {
            if !path.exists() {
                println!("\n❌ Database not found: {}", path.display());
                return Ok(());
            }
            Box::new(SqliteStore::new(&path)?)
        }
        None => {
            let dir = data_dir.unwrap_or_else(|| config.persistence.data_dir.clone());
            if !dir.exists() {
                println!("\n❌ Snapshot directory not found: {}", dir.display());
                println!("   No trader has run yet, or the path is incorrect.");
                return Ok(());
            }
            Box::new(JsonFileStore::new(&dir)?)
        }
    };

    let snapshots = store.list().context("Failed to read snapshots")?;
    if snapshots.is_empty() {
        println!("\n❌ No saved trader state found.");
        return Ok(());
    }

    for snapshot in snapshots {
        let id = snapshot.trader_id.clone();
        let symbol = snapshot.symbol.clone();
        let kind = snapshot.strategy;
        let account = snapshot.into_account(config.trading.fee_rate);
        let summary = summarize(&account, None);

        println!("\n📊 {} ({} on {})", id, kind, symbol);
        println!("   ├─ Capital:          ${:.2}", summary.capital);
        println!("   ├─ Reserved:         ${:.2}", summary.reserved);
        println!("   ├─ Free Slots:       {}", account.free_slots);
        println!("   ├─ Realized P/L:     ${:.4}", summary.realized);
        match summary.win_rate() {
            Some(rate) => println!(
                "   ├─ Trades:           {} ({:.1}% winning)",
                summary.closed_trades,
                rate * Decimal::ONE_HUNDRED
            ),
            None => println!("   ├─ Trades:           0"),
        }
        println!(
            "   ├─ Open Orders:      {} open, {} buying, {} selling",
            summary.open_positions, summary.pending_buys, summary.pending_sales
        );
        println!("   └─ Since:            {}", account.creation_date.format("%Y-%m-%d %H:%M:%S UTC"));

        if verbose {
            if !account.open_orders.is_empty() {
                println!("\n   🔓 Open Orders");
                for order in &account.open_orders {
                    let state = match order.status {
                        OrderState::BuyInProgress => "buying",
                        OrderState::Open if order.secured => "open, secured",
                        OrderState::Open => "open",
                        OrderState::SaleInProgress => "selling",
                        OrderState::Closed => "closed",
                    };
                    println!("   ┌─ #{} ({})", order.id, state);
                    if let (Some(price), Some(quantity)) = (order.buy_price, order.quantity) {
                        println!("   ├─ Bought:   {} @ ${:.4}", quantity, price);
                    }
                    if let Some(stop) = order.stop_loss_price {
                        println!("   ├─ Stop:     ${:.4}", stop);
                    }
                    println!("   └─ Opened:   {}", order.opened_at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }

            if !summary.daily.is_empty() {
                println!("\n   📈 Cumulative Daily Profit");
                for (day, total) in &summary.daily {
                    println!("   ├─ {}: ${:.4}", day, total);
                }
            }
        }
    }

    Ok(())
}
