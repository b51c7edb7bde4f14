//! Type definitions for Binance spot API requests, responses and stream frames.

use crate::exchange::ExchangeError;
use crate::utils::decimal::{round_down_to_lot, safe_div};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        }
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// Order status as reported by REST and the user data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    /// The order is done on the exchange without (fully) executing.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::ExpiredInMatch
        )
    }
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub new_client_order_id: Option<String>,
    /// Price the strategy sized the order against. Not sent to the exchange;
    /// the paper venue fills at this price.
    #[serde(skip)]
    pub expected_price: Decimal,
}

impl NewOrder {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, expected_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
            new_client_order_id: None,
            expected_price,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            new_client_order_id: None,
            expected_price: price,
        }
    }
}

/// A single trade fill inside a FULL order response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFill {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Order response from `POST /api/v3/order` (FULL) and `GET /api/v3/order`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cumulative_quote_qty: Decimal,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    #[serde(default)]
    pub fills: Vec<TradeFill>,
}

/// Normalized fill data shared by REST acknowledgements and execution reports.
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub order_id: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Cumulative quote quantity (`Z`).
    pub cumulative_quote_qty: Decimal,
    /// Cumulative filled quantity (`z`).
    pub cumulative_qty: Decimal,
    /// Total commission charged (`n`).
    pub commission: Decimal,
    /// Asset the commission was charged in (`N`).
    pub commission_asset: Option<String>,
    pub last_price: Decimal,
}

impl FillReport {
    /// Average execution price, zero when nothing filled.
    pub fn average_price(&self) -> Decimal {
        safe_div(self.cumulative_quote_qty, self.cumulative_qty)
    }

    /// Commission converted to quote-asset terms.
    ///
    /// Base-asset commission is valued at the average price; quote-asset
    /// commission is taken as is. Anything else (e.g. BNB) falls back to the
    /// configured fee rate applied to the quote quantity.
    pub fn fee_in_quote(&self, rules: &SymbolRules, fee_rate: Decimal) -> Decimal {
        match self.commission_asset.as_deref() {
            Some(asset) if !rules.base_asset.is_empty() && asset == rules.base_asset => {
                self.commission * self.average_price()
            }
            Some(asset) if !rules.quote_asset.is_empty() && asset == rules.quote_asset => {
                self.commission
            }
            _ => self.cumulative_quote_qty * fee_rate,
        }
    }
}

impl From<&OrderResponse> for FillReport {
    fn from(response: &OrderResponse) -> Self {
        let commission: Decimal = response.fills.iter().map(|f| f.commission).sum();
        let commission_asset = response.fills.first().map(|f| f.commission_asset.clone());
        let last_price = response
            .fills
            .last()
            .map(|f| f.price)
            .unwrap_or(response.price);

        Self {
            order_id: response.order_id.to_string(),
            side: response.side,
            status: response.status,
            cumulative_quote_qty: response.cumulative_quote_qty,
            cumulative_qty: response.executed_qty,
            commission,
            commission_asset,
            last_price,
        }
    }
}

impl From<&ExecutionReport> for FillReport {
    fn from(report: &ExecutionReport) -> Self {
        Self {
            order_id: report.order_id.to_string(),
            side: report.side,
            status: report.status,
            cumulative_quote_qty: report.cumulative_quote_qty,
            cumulative_qty: report.cumulative_qty,
            commission: report.commission,
            commission_asset: report.commission_asset.clone(),
            last_price: report.last_price,
        }
    }
}

/// Trading rules for one spot symbol, taken from `exchangeInfo` filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub tick_size: Decimal,
}

impl SymbolRules {
    /// Rules that accept any quantity on the default quantum.
    pub fn permissive(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: String::new(),
            quote_asset: String::new(),
            step_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
            min_notional: Decimal::ZERO,
            tick_size: Decimal::ZERO,
        }
    }

    pub fn normalize_quantity(&self, quantity: Decimal) -> Decimal {
        round_down_to_lot(quantity, self.step_size)
    }

    /// Whether an order of `quantity` at `price` clears the lot and notional minimums.
    pub fn accepts(&self, quantity: Decimal, price: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_qty && quantity * price >= self.min_notional
    }
}

/// Spot `exchangeInfo` response (only the parts we read).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotExchangeInfo {
    pub symbols: Vec<SpotSymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotSymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub min_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub step_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub tick_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub min_notional: Option<Decimal>,
}

impl From<&SpotSymbolInfo> for SymbolRules {
    fn from(info: &SpotSymbolInfo) -> Self {
        let mut rules = SymbolRules::permissive(info.symbol.clone());
        rules.base_asset = info.base_asset.clone();
        rules.quote_asset = info.quote_asset.clone();

        for filter in &info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    rules.step_size = filter.step_size.unwrap_or_default();
                    rules.min_qty = filter.min_qty.unwrap_or_default();
                }
                "PRICE_FILTER" => rules.tick_size = filter.tick_size.unwrap_or_default(),
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    rules.min_notional = filter.min_notional.unwrap_or_default()
                }
                _ => {}
            }
        }
        rules
    }
}

/// `[price, quantity]` pair as sent by depth endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
}

/// `GET /api/v3/depth` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// `depthUpdate` stream payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<PriceLevel>,
}

/// `trade` stream payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeTick {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// `executionReport` user data stream payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: OrderSide,
    #[serde(rename = "X")]
    pub status: OrderStatus,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "Z", with = "rust_decimal::serde::str")]
    pub cumulative_quote_qty: Decimal,
    #[serde(rename = "z", with = "rust_decimal::serde::str")]
    pub cumulative_qty: Decimal,
    #[serde(rename = "n", with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "L", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
}

/// OHLCV candle from `/klines`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Parse one kline row: `[openTime, "open", "high", "low", "close", "volume", ...]`.
    pub fn from_row(row: &[serde_json::Value]) -> Result<Self, ExchangeError> {
        let field = |idx: usize| -> Result<Decimal, ExchangeError> {
            row.get(idx)
                .and_then(|v| v.as_str())
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| ExchangeError::Parse(format!("kline column {} is not a decimal", idx)))
        };

        let open_time = row
            .first()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Parse("kline open time missing".to_string()))?;

        Ok(Self {
            open_time,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        })
    }
}

/// Funding rate information for a perpetual contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: String,
    #[serde(rename = "lastFundingRate", with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
    #[serde(rename = "nextFundingTime")]
    pub funding_time: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
}

/// Listen key response from `POST /api/v3/userDataStream`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_full_order_response_to_fill_report() {
        let body = r#"{
            "symbol": "BTCUSDT", "orderId": 28, "clientOrderId": "abc",
            "transactTime": 1507725176595, "price": "0.00000000",
            "origQty": "0.50000000", "executedQty": "0.50000000",
            "cummulativeQuoteQty": "50.00000000", "status": "FILLED",
            "timeInForce": "GTC", "type": "MARKET", "side": "BUY",
            "fills": [
                {"price": "99.0", "qty": "0.2", "commission": "0.0002", "commissionAsset": "BTC", "tradeId": 1},
                {"price": "100.6666", "qty": "0.3", "commission": "0.0003", "commissionAsset": "BTC", "tradeId": 2}
            ]
        }"#;
        let response: OrderResponse = serde_json::from_str(body).unwrap();
        let report = FillReport::from(&response);

        assert_eq!(report.order_id, "28");
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.commission, dec!(0.0005));
        assert_eq!(report.average_price(), dec!(100));

        let mut rules = SymbolRules::permissive("BTCUSDT");
        rules.base_asset = "BTC".into();
        rules.quote_asset = "USDT".into();
        assert_eq!(report.fee_in_quote(&rules, dec!(0.001)), dec!(0.05));
    }

    #[test]
    fn test_fee_fallback_uses_rate() {
        let report = FillReport {
            order_id: "1".into(),
            side: OrderSide::Sell,
            status: OrderStatus::Filled,
            cumulative_quote_qty: dec!(200),
            cumulative_qty: dec!(2),
            commission: dec!(0.01),
            commission_asset: Some("BNB".into()),
            last_price: dec!(100),
        };
        let rules = SymbolRules::permissive("BTCUSDT");
        assert_eq!(report.fee_in_quote(&rules, dec!(0.001)), dec!(0.2));
    }

    #[test]
    fn test_symbol_rules_from_exchange_info() {
        let body = r#"{"symbols": [{
            "symbol": "ETHUSDT", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000", "tickSize": "0.01"},
                {"filterType": "LOT_SIZE", "minQty": "0.0001", "maxQty": "9000", "stepSize": "0.0001"},
                {"filterType": "NOTIONAL", "minNotional": "5.00", "applyMinToMarket": true},
                {"filterType": "MAX_NUM_ORDERS", "maxNumOrders": 200}
            ]
        }]}"#;
        let info: SpotExchangeInfo = serde_json::from_str(body).unwrap();
        let rules = SymbolRules::from(&info.symbols[0]);

        assert_eq!(rules.step_size, dec!(0.0001));
        assert_eq!(rules.min_notional, dec!(5));
        assert_eq!(rules.tick_size, dec!(0.01));
        assert_eq!(rules.normalize_quantity(dec!(0.123456)), dec!(0.1234));
        assert!(rules.accepts(dec!(0.01), dec!(3000)));
        assert!(!rules.accepts(dec!(0.001), dec!(3000)));
    }

    #[test]
    fn test_kline_row_parsing() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1499040000000, "0.0163", "0.8000", "0.0157", "0.0159", "148976.1", 1499644799999, "2434.1", 308, "1756.8", "28.4", "0"]"#,
        )
        .unwrap();
        let candle = Candle::from_row(&row).unwrap();
        assert_eq!(candle.open, dec!(0.0163));
        assert_eq!(candle.close, dec!(0.0159));

        assert!(Candle::from_row(&row[..3]).is_err());
    }

    #[test]
    fn test_execution_report_parsing() {
        let body = r#"{
            "e": "executionReport", "E": 1499405658658, "s": "ETHBTC", "c": "mUvoqJxFIILMdfAW5iGSOW",
            "S": "BUY", "o": "LIMIT", "f": "GTC", "q": "1.00000000", "p": "0.10264410",
            "x": "TRADE", "X": "FILLED", "r": "NONE", "i": 4293153, "l": "1.0", "z": "1.00000000",
            "L": "0.10264410", "n": "0.001", "N": "ETH", "T": 1499405658657, "Z": "0.10264410"
        }"#;
        let report: ExecutionReport = serde_json::from_str(body).unwrap();
        assert_eq!(report.order_id, 4293153);
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.cumulative_qty, dec!(1));
        assert_eq!(report.commission_asset.as_deref(), Some("ETH"));
    }
}
