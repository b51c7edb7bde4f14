//! Strategy engine: the order lifecycle driven by market and order events.
//!
//! One `TradingEngine` serves every strategy kind. Its `StrategyProfile`
//! selects the entry signal, slot policy, fee pool and order style; the
//! lifecycle, trailing stop and capital accounting are shared.

use super::account::TraderAccount;
use super::error::LifecycleError;
use super::order::{BuyFee, Order, OrderState, TrailAction, TrailParams};
use super::profile::{BandMode, EntrySignal, OrderStyle, StrategyKind, StrategyProfile, Venue};
use super::signals;
use crate::dispatch::{MarketEvent, OrderEvent};
use crate::exchange::{
    Candle, DepthUpdate, FillReport, MarketData, NewOrder, OrderGateway, OrderSide, OrderStatus,
    SymbolRules,
};
use crate::orderbook::{DepthOutcome, Level, OrderBook};
use crate::persistence::PersistedSnapshot;
use crate::utils::decimal::{round_to_tick, safe_div};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Minimum spacing between two REST snapshot attempts after a failure.
const RESYNC_BACKOFF: Duration = Duration::from_secs(5);

/// A strategy instance as seen by the dispatch workers.
///
/// Every method runs under the strategy's lock, so implementations can
/// assume exclusive access.
#[async_trait]
pub trait StrategyEngine: Send {
    fn id(&self) -> &str;

    fn symbol(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    fn account(&self) -> &TraderAccount;

    /// Load trading rules and the book snapshot, then reconcile orders a
    /// previous run left pending.
    async fn bootstrap(&mut self) -> Result<(), LifecycleError>;

    async fn on_market_event(&mut self, event: &MarketEvent) -> Result<(), LifecycleError>;

    async fn on_order_event(&mut self, event: &OrderEvent) -> Result<(), LifecycleError>;

    fn snapshot(&self) -> PersistedSnapshot;

    /// Snapshot if the state changed since the last call.
    fn take_snapshot(&mut self) -> Option<PersistedSnapshot>;
}

pub struct TradingEngine {
    id: String,
    symbol: String,
    profile: StrategyProfile,
    account: TraderAccount,
    rules: SymbolRules,
    gateway: Arc<dyn OrderGateway>,
    market: Arc<dyn MarketData>,
    book: Option<OrderBook>,
    snapshot_limit: u32,
    next_resync: Option<Instant>,
    last_price: Option<Decimal>,
    funding_rate_pct: Option<Decimal>,
    candles: Vec<Candle>,
    /// Open time of the candle the last band entry fired on.
    last_entry_candle: Option<i64>,
    dirty: bool,
}

impl TradingEngine {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        profile: StrategyProfile,
        account: TraderAccount,
        gateway: Arc<dyn OrderGateway>,
        market: Arc<dyn MarketData>,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            id: id.into(),
            rules: SymbolRules::permissive(symbol.clone()),
            symbol,
            profile,
            account,
            gateway,
            market,
            book: None,
            snapshot_limit: 1000,
            next_resync: None,
            last_price: None,
            funding_rate_pct: None,
            candles: Vec::new(),
            last_entry_candle: None,
            dirty: false,
        }
    }

    /// Track a local order book, resynced from `snapshot_limit` levels.
    pub fn with_order_book(mut self, book: OrderBook, snapshot_limit: u32) -> Self {
        self.book = Some(book);
        self.snapshot_limit = snapshot_limit;
        self
    }

    pub fn profile(&self) -> &StrategyProfile {
        &self.profile
    }

    pub fn order_book(&self) -> Option<&OrderBook> {
        self.book.as_ref()
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    fn trail_params(&self) -> TrailParams {
        TrailParams {
            fee_rate: self.account.fee_rate,
            fee_share: self.account.fees_to_cover,
            smoothing: self.profile.trailing_smoothing,
        }
    }

    /// Slot free and enough uncommitted capital.
    fn can_open(&self) -> bool {
        self.profile.slots.admits(self.account.open_orders.len())
            && self.account.free_capital() >= self.profile.min_free_capital
    }

    fn order_request(&self, side: OrderSide, quantity: Decimal, price: Decimal) -> NewOrder {
        match self.profile.order_style {
            OrderStyle::Market => NewOrder::market(&self.symbol, side, quantity, price),
            OrderStyle::Limit => NewOrder::limit(
                &self.symbol,
                side,
                quantity,
                round_to_tick(price, self.rules.tick_size),
            ),
        }
    }

    async fn resync_book(&mut self) {
        if self.book.is_none() {
            return;
        }
        if self.next_resync.is_some_and(|at| Instant::now() < at) {
            return;
        }

        match self.market.depth_snapshot(&self.symbol, self.snapshot_limit).await {
            Ok(snapshot) => {
                self.next_resync = None;
                if let Some(book) = self.book.as_mut() {
                    book.load_snapshot(snapshot.last_update_id, &snapshot.bids, &snapshot.asks);
                }
            }
            Err(e) => {
                self.next_resync = Some(Instant::now() + RESYNC_BACKOFF);
                warn!(trader = %self.id, error = %e, "Order book snapshot failed");
            }
        }
    }

    async fn reconcile_pending(&mut self) -> Result<(), LifecycleError> {
        let pending: Vec<String> = self
            .account
            .open_orders
            .iter()
            .filter_map(|o| match o.status {
                OrderState::BuyInProgress => Some(o.id.clone()),
                OrderState::SaleInProgress => o.sale_order_id.clone(),
                _ => None,
            })
            .collect();

        for order_id in pending {
            match self.gateway.query_order(&self.symbol, &order_id).await {
                Ok(response) => {
                    debug!(trader = %self.id, order = %order_id, status = ?response.status, "Reconciled order");
                    if let Err(e) = self.apply_fill(&FillReport::from(&response)) {
                        warn!(trader = %self.id, order = %order_id, error = %e, "Reconciled report does not apply, leaving order as is");
                    }
                }
                Err(e) => {
                    warn!(trader = %self.id, order = %order_id, error = %e, "Could not reconcile order, leaving it pending");
                }
            }
        }
        Ok(())
    }

    async fn on_depth(&mut self, update: &DepthUpdate) {
        let Some(book) = self.book.as_mut() else {
            return;
        };
        if let DepthOutcome::Gap { .. } = book.apply_depth_update(update) {
            self.resync_book().await;
        }
    }

    async fn on_price(&mut self, price: Decimal) -> Result<(), LifecycleError> {
        self.last_price = Some(price);

        let params = self.trail_params();
        let mut stop_hits = Vec::new();
        let mut first_error = None;

        for order in self.account.open_orders.iter_mut() {
            match order.trail(price, &params) {
                Ok(TrailAction::Hold) => {}
                Ok(TrailAction::Raised) => self.dirty = true,
                Ok(TrailAction::Secured) => {
                    self.dirty = true;
                    info!(
                        trader = %self.id,
                        order = %order.id,
                        stop = ?order.stop_loss_price,
                        "🔒 Capital secured"
                    );
                }
                Ok(TrailAction::StopHit) => {
                    self.dirty = true;
                    stop_hits.push(order.id.clone());
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        for order_id in stop_hits {
            self.place_sell(&order_id, price).await?;
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if let EntrySignal::Support {
            respected_gap,
            support_band,
            ..
        } = &self.profile.entry
        {
            let (gap, band) = (*respected_gap, *support_band);
            self.evaluate_support_entry(price, gap, band).await?;
        }
        Ok(())
    }

    async fn evaluate_support_entry(
        &mut self,
        price: Decimal,
        gap: Decimal,
        band: Decimal,
    ) -> Result<(), LifecycleError> {
        if !self.can_open() {
            return Ok(());
        }
        let Some(support) = self.book.as_ref().and_then(OrderBook::best_support) else {
            return Ok(());
        };
        if !signals::within_support_band(price, support.price, band)
            || !signals::respects_gap(&self.account.open_orders, price, gap)
        {
            return Ok(());
        }

        debug!(
            trader = %self.id,
            %price,
            support = %support.price,
            support_volume = %support.quantity,
            rank = support.rank,
            "Support entry"
        );
        self.place_buy(price, Some(support)).await
    }

    async fn on_candles(&mut self, candles: &[Candle]) -> Result<(), LifecycleError> {
        self.candles = candles.to_vec();

        let Some((window, num_std)) = self.profile.entry.band_params().map(|p| (p.window, p.num_std)) else {
            return Ok(());
        };
        let Some(last) = self.candles.last() else {
            return Ok(());
        };
        let last_open_time = last.open_time;
        let price = self.last_price.unwrap_or(last.close);

        let mean_reversion = matches!(
            self.profile.entry,
            EntrySignal::Band {
                mode: BandMode::MeanReversion,
                ..
            }
        );
        if mean_reversion && signals::mean_reversion_exit(&self.candles, window, num_std) {
            let open: Vec<String> = self
                .account
                .open_orders
                .iter()
                .filter(|o| o.status == OrderState::Open)
                .map(|o| o.id.clone())
                .collect();
            for order_id in open {
                info!(trader = %self.id, order = %order_id, %price, "Close above the middle band, selling");
                self.place_sell(&order_id, price).await?;
            }
        }

        if self.last_entry_candle == Some(last_open_time) || !self.can_open() {
            return Ok(());
        }

        let entry = match &self.profile.entry {
            EntrySignal::Band {
                mode: BandMode::Reversal,
                ..
            } => signals::reversal_pattern(&self.candles, window, num_std),
            EntrySignal::Band {
                mode: BandMode::MeanReversion,
                ..
            } => signals::mean_reversion_entry(&self.candles, window, num_std),
            EntrySignal::FundingGated { threshold, .. } => {
                signals::funding_gate_open(self.funding_rate_pct, *threshold)
                    && signals::funding_band_entry(&self.candles, window, num_std)
            }
            EntrySignal::Support { .. } => false,
        };

        if entry {
            self.last_entry_candle = Some(last_open_time);
            info!(trader = %self.id, %price, funding = ?self.funding_rate_pct, "Band entry signal");
            self.place_buy(price, None).await?;
        }
        Ok(())
    }

    /// Buy the fee pool when it is exhausted. Returns false if the entry
    /// should be skipped.
    async fn ensure_fee_pool(&mut self, price: Decimal) -> bool {
        let Some(pool) = self.profile.fee_pool else {
            return true;
        };
        if self.account.free_slots > 0 {
            return true;
        }

        let request = NewOrder::market(&self.symbol, OrderSide::Buy, pool.quantity, price);
        match self.gateway.place_order(&request).await {
            Ok(response) => {
                let total = response.cumulative_quote_qty;
                self.account.free_slots = pool.slots;
                self.account.fees_to_cover = safe_div(total, Decimal::from(pool.slots));
                self.account.debit(total);
                self.dirty = true;
                info!(
                    trader = %self.id,
                    %total,
                    slots = pool.slots,
                    fees_to_cover = %self.account.fees_to_cover,
                    "Fee pool bought"
                );
                true
            }
            Err(e) => {
                warn!(trader = %self.id, error = %e, "Fee pool purchase failed, skipping entry");
                false
            }
        }
    }

    async fn place_buy(&mut self, price: Decimal, support: Option<Level>) -> Result<(), LifecycleError> {
        if !self.ensure_fee_pool(price).await {
            return Ok(());
        }

        let size = self
            .account
            .order_size(price, self.profile.trade_fraction, self.profile.quantity_quantum);
        let quantity = self.rules.normalize_quantity(size);
        if !self.rules.accepts(quantity, price) {
            debug!(trader = %self.id, %quantity, %price, "Order size below exchange minimums");
            return Ok(());
        }

        let request = self.order_request(OrderSide::Buy, quantity, price);
        let response = match self.gateway.place_order(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(trader = %self.id, %price, %quantity, error = %e, "Buy order rejected");
                return Ok(());
            }
        };

        let reserved = price * quantity;
        self.account.reserve(reserved);
        self.account.open_orders.push(Order::pending_buy(
            response.order_id.to_string(),
            price,
            quantity,
            reserved,
            support,
        ));
        if self.profile.fee_pool.is_some() {
            self.account.free_slots = self.account.free_slots.saturating_sub(1);
        }
        self.dirty = true;
        info!(
            trader = %self.id,
            order = response.order_id,
            %price,
            %quantity,
            status = ?response.status,
            "🛒 Buy order placed"
        );

        self.apply_fill(&FillReport::from(&response))
    }

    async fn place_sell(&mut self, order_id: &str, price: Decimal) -> Result<(), LifecycleError> {
        let Some(idx) = self.account.position_of(order_id) else {
            return Ok(());
        };
        let quantity = self
            .rules
            .normalize_quantity(self.account.open_orders[idx].held_quantity()?);
        if quantity <= Decimal::ZERO {
            warn!(trader = %self.id, order = %order_id, "Position below the lot size, cannot sell");
            return Ok(());
        }

        let request = self.order_request(OrderSide::Sell, quantity, price);
        let response = match self.gateway.place_order(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(trader = %self.id, order = %order_id, %price, error = %e, "Sell order rejected, position stays open");
                return Ok(());
            }
        };

        self.account.open_orders[idx].begin_sale(response.order_id.to_string())?;
        self.dirty = true;
        info!(
            trader = %self.id,
            order = %order_id,
            sale_order = response.order_id,
            %price,
            %quantity,
            "Sell order placed"
        );

        self.apply_fill(&FillReport::from(&response))
    }

    /// Reconcile a fill report with the order it belongs to. Reports for
    /// unknown orders, non-final statuses and repeats are ignored.
    fn apply_fill(&mut self, fill: &FillReport) -> Result<(), LifecycleError> {
        let Some(idx) = self.account.position_of(&fill.order_id) else {
            return Ok(());
        };
        let state = self.account.open_orders[idx].status;
        let filled = fill.status == OrderStatus::Filled;
        let failed = fill.status.is_failed();

        match (fill.side, state) {
            (OrderSide::Buy, OrderState::BuyInProgress) => {
                if filled || (failed && fill.cumulative_qty > Decimal::ZERO) {
                    self.complete_buy(idx, fill)?;
                } else if failed {
                    if let Some(order) = self.account.discard_pending(idx) {
                        info!(trader = %self.id, order = %order.id, status = ?fill.status, "Buy order ended unfilled");
                    }
                    self.dirty = true;
                }
            }
            (OrderSide::Sell, OrderState::SaleInProgress) => {
                let held = self.account.open_orders[idx].held_quantity()?;
                if filled || (failed && fill.cumulative_qty >= held) {
                    self.complete_sale(idx, fill)?;
                } else if failed && fill.cumulative_qty > Decimal::ZERO {
                    self.complete_partial_sale(idx, fill)?;
                } else if failed {
                    self.account.open_orders[idx].revert_sale()?;
                    self.dirty = true;
                    warn!(trader = %self.id, order = %fill.order_id, status = ?fill.status, "Sale ended unfilled, position reopened");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn complete_buy(&mut self, idx: usize, fill: &FillReport) -> Result<(), LifecycleError> {
        let value = fill.fee_in_quote(&self.rules, self.account.fee_rate);
        let base_commission = !self.rules.base_asset.is_empty()
            && fill.commission_asset.as_deref() == Some(self.rules.base_asset.as_str());
        let fee = if base_commission {
            BuyFee::Base {
                quantity: fill.commission,
                value,
            }
        } else {
            BuyFee::Quote(value)
        };

        let order = &mut self.account.open_orders[idx];
        let reserved = order.reserved_amount;
        let cost = order.confirm_buy_with(fill, fee, self.profile.stop_loss_pct)?;
        if base_commission {
            order.quantity = order.quantity.map(|q| self.rules.normalize_quantity(q));
        }
        let (order_id, buy_price, stop) = (order.id.clone(), order.buy_price, order.stop_loss_price);

        self.account.release(reserved);
        self.account.debit(cost);
        self.dirty = true;
        info!(
            trader = %self.id,
            order = %order_id,
            price = ?buy_price,
            %cost,
            stop = ?stop,
            capital = %self.account.capital,
            "🟢 Buy filled"
        );
        Ok(())
    }

    /// A sale that ended unfilled after a partial execution: book the sold
    /// share and keep the rest open.
    fn complete_partial_sale(&mut self, idx: usize, fill: &FillReport) -> Result<(), LifecycleError> {
        let sale_fee = fill.fee_in_quote(&self.rules, self.account.fee_rate);
        let fees_to_cover = self.account.fees_to_cover;
        let (closed, proceeds) =
            self.account.open_orders[idx].close_filled_share(fill, sale_fee, fees_to_cover, Utc::now())?;

        self.account.credit(proceeds);
        self.dirty = true;
        if let Some(closed) = self.account.record_trade(closed) {
            warn!(
                trader = %self.id,
                order = %closed.id,
                status = ?fill.status,
                sold = ?closed.sailed_quantity,
                profit = ?closed.profit,
                "Sale ended part filled, remainder reopened"
            );
        }
        Ok(())
    }

    fn complete_sale(&mut self, idx: usize, fill: &FillReport) -> Result<(), LifecycleError> {
        let sale_fee = fill.fee_in_quote(&self.rules, self.account.fee_rate);
        let fees_to_cover = self.account.fees_to_cover;
        let proceeds = self.account.open_orders[idx].confirm_sale(fill, sale_fee, fees_to_cover, Utc::now())?;

        self.account.credit(proceeds);
        self.dirty = true;
        if let Some(closed) = self.account.archive(idx) {
            info!(
                trader = %self.id,
                order = %closed.id,
                sale_price = ?closed.sale_price,
                profit = ?closed.profit,
                "🔴 Position closed"
            );
        }
        info!(
            trader = %self.id,
            capital = %self.account.capital,
            realized = %self.account.realized_profit(),
            "Account updated"
        );
        Ok(())
    }
}

#[async_trait]
impl StrategyEngine for TradingEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn kind(&self) -> StrategyKind {
        self.profile.kind
    }

    fn account(&self) -> &TraderAccount {
        &self.account
    }

    async fn bootstrap(&mut self) -> Result<(), LifecycleError> {
        let live = self.profile.venue == Venue::Live;
        if live {
            match self.market.symbol_rules(&self.symbol).await {
                Ok(rules) => {
                    debug!(trader = %self.id, ?rules, "Loaded trading rules");
                    self.rules = rules;
                }
                Err(e) => {
                    warn!(trader = %self.id, error = %e, "Trading rules unavailable, using permissive rules");
                }
            }
        }

        self.resync_book().await;

        if live {
            self.reconcile_pending().await?;
        }

        info!(
            trader = %self.id,
            kind = %self.profile.kind,
            symbol = %self.symbol,
            capital = %self.account.capital,
            open_orders = self.account.open_orders.len(),
            trades = self.account.trade_history.len(),
            "Strategy ready"
        );
        Ok(())
    }

    async fn on_market_event(&mut self, event: &MarketEvent) -> Result<(), LifecycleError> {
        if event.symbol() != self.symbol {
            return Ok(());
        }
        match event {
            MarketEvent::Depth(update) => {
                self.on_depth(update).await;
                Ok(())
            }
            MarketEvent::Trade(tick) => self.on_price(tick.price).await,
            MarketEvent::Candles { candles, .. } => self.on_candles(candles).await,
            MarketEvent::Funding(rate) => {
                self.funding_rate_pct = Some(rate.funding_rate * Decimal::ONE_HUNDRED);
                debug!(trader = %self.id, funding_pct = ?self.funding_rate_pct, "Funding rate updated");
                Ok(())
            }
            MarketEvent::Reconnected { .. } => {
                self.resync_book().await;
                Ok(())
            }
        }
    }

    async fn on_order_event(&mut self, event: &OrderEvent) -> Result<(), LifecycleError> {
        match event {
            OrderEvent::Execution(report) if report.symbol == self.symbol => {
                self.apply_fill(&FillReport::from(report))
            }
            _ => Ok(()),
        }
    }

    fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot::capture(&self.id, self.profile.kind, &self.symbol, &self.account)
    }

    fn take_snapshot(&mut self) -> Option<PersistedSnapshot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.snapshot())
    }
}
