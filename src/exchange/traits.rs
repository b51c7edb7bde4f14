//! Venue seams used by the strategy engines and stream tasks.
//!
//! - `OrderGateway`: order placement, status and cancellation
//! - `MarketData`: public REST lookups the live loop depends on
//! - `UserStreamAuth`: listen key lease for the private stream

use super::error::ExchangeError;
use super::types::{Candle, DepthSnapshot, FundingRate, NewOrder, OrderResponse, SymbolRules};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which market a candle series is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    Spot,
    Futures,
}

/// Places and tracks orders. Implemented by the live client and the paper venue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order; market orders come back already filled.
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError>;

    async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ExchangeError>;
}

/// Market data lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError>;

    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, ExchangeError>;

    async fn klines(
        &self,
        source: CandleSource,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Latest funding rate of the perpetual contract for `symbol`.
    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError>;
}

/// Listen key lease management.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStreamAuth: Send + Sync {
    async fn create_listen_key(&self) -> Result<String, ExchangeError>;

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError>;

    async fn close_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError>;
}
