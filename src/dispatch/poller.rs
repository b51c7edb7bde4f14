//! REST pollers for band strategies.
//!
//! Candles and funding rates are not streamed; a poller fetches them on an
//! interval and feeds the owning strategy's market queue.

use super::{offer, MarketEvent, StrategyQueues};
use crate::exchange::MarketData;
use crate::strategy::BandParams;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one poller fetches.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub symbol: String,
    pub params: BandParams,
    /// Also fetch the perpetual funding rate before each candle batch.
    pub funding: bool,
}

pub fn spawn_poller(
    target: PollTarget,
    market: Arc<dyn MarketData>,
    queues: StrategyQueues,
) -> JoinHandle<()> {
    tokio::spawn(run_poller(target, market, queues))
}

async fn run_poller(target: PollTarget, market: Arc<dyn MarketData>, queues: StrategyQueues) {
    let dropped = AtomicU64::new(0);
    let mut ticker = tokio::time::interval(Duration::from_secs(target.params.poll_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        strategy = %queues.id,
        symbol = %target.symbol,
        interval = %target.params.interval,
        funding = target.funding,
        "📈 Candle poller started"
    );

    loop {
        ticker.tick().await;
        if queues.market.is_closed() {
            break;
        }
        poll_once(&target, market.as_ref(), &queues, &dropped).await;
    }

    debug!(strategy = %queues.id, "Candle poller stopped");
}

/// One fetch round. Fetch failures are logged and retried on the next tick.
async fn poll_once(target: &PollTarget, market: &dyn MarketData, queues: &StrategyQueues, dropped: &AtomicU64) {
    if target.funding {
        match market.funding_rate(&target.symbol).await {
            Ok(rate) => {
                offer(&queues.market, MarketEvent::Funding(rate), &queues.id, dropped);
            }
            Err(e) => warn!(symbol = %target.symbol, error = %e, "Funding rate fetch failed"),
        }
    }

    let params = &target.params;
    match market
        .klines(params.source, &target.symbol, &params.interval, params.limit)
        .await
    {
        Ok(candles) => {
            let event = MarketEvent::Candles {
                symbol: target.symbol.clone(),
                candles,
            };
            offer(&queues.market, event, &queues.id, dropped);
        }
        Err(e) => warn!(symbol = %target.symbol, error = %e, "Kline fetch failed"),
    }
}
