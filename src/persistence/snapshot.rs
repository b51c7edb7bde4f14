//! Serialized trader state.

use crate::strategy::{Order, StrategyKind, TraderAccount};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// On-disk form of a `TraderAccount`. Decimals are written as strings so a
/// reload reproduces them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub trader_id: String,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "currentOrders", default)]
    pub current_orders: Vec<Order>,
    #[serde(with = "rust_decimal::serde::str")]
    pub capital: Decimal,
    #[serde(rename = "tradeHistory", default)]
    pub trade_history: Vec<Order>,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub free_slots: u32,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub reserved_amount: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub fees_to_cover: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
}

impl PersistedSnapshot {
    pub fn capture(
        trader_id: impl Into<String>,
        strategy: StrategyKind,
        symbol: impl Into<String>,
        account: &TraderAccount,
    ) -> Self {
        Self {
            trader_id: trader_id.into(),
            strategy,
            symbol: symbol.into(),
            current_orders: account.open_orders.clone(),
            capital: account.capital,
            trade_history: account.trade_history.clone(),
            creation_date: account.creation_date,
            free_slots: account.free_slots,
            reserved_amount: account.reserved_amount,
            fees_to_cover: account.fees_to_cover,
            fee_rate: account.fee_rate,
        }
    }

    /// Rebuild the account. A snapshot without a fee rate takes `fallback_fee_rate`.
    pub fn into_account(self, fallback_fee_rate: Decimal) -> TraderAccount {
        let fee_rate = if self.fee_rate > Decimal::ZERO {
            self.fee_rate
        } else {
            fallback_fee_rate
        };
        TraderAccount {
            capital: self.capital,
            fee_rate,
            open_orders: self.current_orders,
            trade_history: self.trade_history,
            creation_date: self.creation_date,
            reserved_amount: self.reserved_amount,
            free_slots: self.free_slots,
            fees_to_cover: self.fees_to_cover,
        }
    }
}
