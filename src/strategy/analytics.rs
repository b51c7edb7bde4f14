//! Profit and loss summaries over a trader account.

use super::account::TraderAccount;
use super::order::OrderState;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TraderSummary {
    pub capital: Decimal,
    pub reserved: Decimal,
    pub pending_buys: usize,
    pub open_positions: usize,
    pub pending_sales: usize,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub realized: Decimal,
    /// Unrealized profit of filled positions at the mark price, zero
    /// without one.
    pub unrealized: Decimal,
    /// Running total of realized profit by closing day.
    pub daily: Vec<(NaiveDate, Decimal)>,
}

impl TraderSummary {
    pub fn potential(&self) -> Decimal {
        self.realized + self.unrealized
    }

    pub fn win_rate(&self) -> Option<Decimal> {
        if self.closed_trades == 0 {
            return None;
        }
        Some(Decimal::from(self.winning_trades) / Decimal::from(self.closed_trades))
    }
}

pub fn summarize(account: &TraderAccount, mark_price: Option<Decimal>) -> TraderSummary {
    let unrealized = mark_price
        .map(|mark| {
            account
                .open_orders
                .iter()
                .filter(|o| o.status != OrderState::BuyInProgress)
                .filter_map(|o| {
                    o.potential_profit(mark, account.fee_rate, account.fees_to_cover)
                        .ok()
                })
                .sum()
        })
        .unwrap_or(Decimal::ZERO);

    TraderSummary {
        capital: account.capital,
        reserved: account.reserved_amount,
        pending_buys: account.count_in(OrderState::BuyInProgress),
        open_positions: account.count_in(OrderState::Open),
        pending_sales: account.count_in(OrderState::SaleInProgress),
        closed_trades: account.trade_history.len(),
        winning_trades: account
            .trade_history
            .iter()
            .filter(|o| o.profit.is_some_and(|p| p > Decimal::ZERO))
            .count(),
        realized: account.realized_profit(),
        unrealized,
        daily: cumulative_daily_profits(account),
    }
}

fn cumulative_daily_profits(account: &TraderAccount) -> Vec<(NaiveDate, Decimal)> {
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for order in &account.trade_history {
        if let (Some(closed_at), Some(profit)) = (order.closed_at, order.profit) {
            *by_day.entry(closed_at.date_naive()).or_default() += profit;
        }
    }

    let mut total = Decimal::ZERO;
    by_day
        .into_iter()
        .map(|(day, profit)| {
            total += profit;
            (day, total)
        })
        .collect()
}
