//! Per-strategy capital and order bookkeeping.

use super::order::{Order, OrderState};
use crate::utils::decimal::truncate_to_quantum;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Capital, open orders and trade history of one strategy instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TraderAccount {
    pub capital: Decimal,
    pub fee_rate: Decimal,
    pub open_orders: Vec<Order>,
    /// Append-only.
    pub trade_history: Vec<Order>,
    pub creation_date: DateTime<Utc>,
    /// Capital held back for working buy orders.
    pub reserved_amount: Decimal,
    /// Trades left before the fee pool needs refunding.
    pub free_slots: u32,
    /// Fee-pool share charged to every trade.
    pub fees_to_cover: Decimal,
}

impl TraderAccount {
    pub fn new(capital: Decimal, fee_rate: Decimal) -> Self {
        Self {
            capital,
            fee_rate,
            open_orders: Vec::new(),
            trade_history: Vec::new(),
            creation_date: Utc::now(),
            reserved_amount: Decimal::ZERO,
            free_slots: 0,
            fees_to_cover: Decimal::ZERO,
        }
    }

    /// Capital not held back by working buys.
    pub fn free_capital(&self) -> Decimal {
        self.capital - self.reserved_amount
    }

    /// Order size for `fraction` of capital at `price`, truncated to `quantum`.
    /// Zero when the price is unknown or not positive.
    pub fn order_size(&self, price: Decimal, fraction: Decimal, quantum: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        truncate_to_quantum(self.capital * fraction / price, quantum).max(Decimal::ZERO)
    }

    pub fn reserve(&mut self, amount: Decimal) {
        self.reserved_amount += amount;
    }

    pub fn release(&mut self, amount: Decimal) {
        self.reserved_amount = (self.reserved_amount - amount).max(Decimal::ZERO);
    }

    pub fn debit(&mut self, amount: Decimal) {
        self.capital -= amount;
    }

    pub fn credit(&mut self, amount: Decimal) {
        self.capital += amount;
    }

    /// Index of the open order whose buy or sale id is `exchange_order_id`.
    pub fn position_of(&self, exchange_order_id: &str) -> Option<usize> {
        self.open_orders.iter().position(|o| o.matches(exchange_order_id))
    }

    /// Move a closed order into the trade history.
    pub fn archive(&mut self, index: usize) -> Option<&Order> {
        if index >= self.open_orders.len() || !self.open_orders[index].is_closed() {
            return None;
        }
        let order = self.open_orders.remove(index);
        self.trade_history.push(order);
        self.trade_history.last()
    }

    /// Record a trade that was split off an order still held open.
    pub fn record_trade(&mut self, closed: Order) -> Option<&Order> {
        if !closed.is_closed() {
            return None;
        }
        self.trade_history.push(closed);
        self.trade_history.last()
    }

    /// Drop a buy that never filled and give its reservation back.
    pub fn discard_pending(&mut self, index: usize) -> Option<Order> {
        if self.open_orders.get(index)?.status != OrderState::BuyInProgress {
            return None;
        }
        let order = self.open_orders.remove(index);
        self.release(order.reserved_amount);
        Some(order)
    }

    pub fn count_in(&self, state: OrderState) -> usize {
        self.open_orders.iter().filter(|o| o.status == state).count()
    }

    /// Sum of realized profit over the trade history.
    pub fn realized_profit(&self) -> Decimal {
        self.trade_history.iter().filter_map(|o| o.profit).sum()
    }

    /// Capital currently tied up in filled positions.
    pub fn open_cost(&self) -> Decimal {
        self.open_orders.iter().filter_map(|o| o.cost).sum()
    }
}
