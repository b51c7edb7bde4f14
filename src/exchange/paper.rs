//! Simulated venue for paper trading.
//!
//! Every order fills immediately and completely at its expected price. The
//! acknowledgement carries no fills, so commission is charged by the engine
//! at its configured fee rate. Only the most recent fills are kept for
//! `query_order`.

use super::error::ExchangeError;
use super::traits::OrderGateway;
use super::types::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Fills retained for `query_order`.
const RECENT_FILLS: usize = 1024;

/// Paper trading venue.
#[derive(Debug)]
pub struct PaperExchange {
    order_id_counter: AtomicU64,
    recent: Arc<RwLock<VecDeque<OrderResponse>>>,
    capacity: usize,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::with_capacity(RECENT_FILLS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order_id_counter: AtomicU64::new(1),
            recent: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Number of fills currently retained.
    pub async fn order_count(&self) -> usize {
        self.recent.read().await.len()
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderGateway for PaperExchange {
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError> {
        let price = order.price.unwrap_or(order.expected_price);
        if order.quantity <= rust_decimal::Decimal::ZERO || price <= rust_decimal::Decimal::ZERO {
            return Err(ExchangeError::Api {
                code: -1013,
                message: "Invalid quantity or price".to_string(),
            });
        }

        let order_id = self.order_id_counter.fetch_add(1, Ordering::SeqCst) as i64;
        let response = OrderResponse {
            symbol: order.symbol.clone(),
            order_id,
            client_order_id: order.new_client_order_id.clone().unwrap_or_default(),
            price,
            orig_qty: order.quantity,
            executed_qty: order.quantity,
            cumulative_quote_qty: price * order.quantity,
            status: OrderStatus::Filled,
            order_type: order.order_type,
            side: order.side,
            fills: Vec::new(),
        };

        debug!(
            order_id,
            symbol = %order.symbol,
            side = ?order.side,
            quantity = %order.quantity,
            %price,
            "Paper order filled"
        );

        let mut recent = self.recent.write().await;
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(response.clone());
        Ok(response)
    }

    async fn query_order(&self, _symbol: &str, order_id: &str) -> Result<OrderResponse, ExchangeError> {
        self.recent
            .read()
            .await
            .iter()
            .rev()
            .find(|o| o.order_id.to_string() == order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::Api {
                code: -2013,
                message: "Order does not exist.".to_string(),
            })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<OrderResponse, ExchangeError> {
        // Paper orders fill on placement, so there is never anything to cancel.
        Err(ExchangeError::Api {
            code: -2011,
            message: "Unknown order sent.".to_string(),
        })
    }
}
