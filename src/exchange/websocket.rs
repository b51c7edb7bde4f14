//! Binance WebSocket endpoints and frame decoding.

use super::error::ExchangeError;
use super::types::{DepthUpdate, ExecutionReport, TradeTick};
use serde_json::Value;

const SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
const SPOT_TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision";

/// Decoded market stream frame.
#[derive(Debug, Clone)]
pub enum MarketFrame {
    Depth(DepthUpdate),
    Trade(TradeTick),
    /// Valid JSON with an event type we do not consume.
    Other(String),
}

/// Decoded user data stream frame.
#[derive(Debug, Clone)]
pub enum UserFrame {
    Execution(ExecutionReport),
    ListenKeyExpired,
    Other(String),
}

/// Binance WebSocket endpoint set.
#[derive(Debug, Clone)]
pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    pub fn new(testnet: bool, override_url: Option<String>) -> Self {
        let base_url = override_url.unwrap_or_else(|| {
            if testnet {
                SPOT_TESTNET_WS_URL.to_string()
            } else {
                SPOT_WS_URL.to_string()
            }
        });
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Combined stream of 100ms depth diffs and trades for one symbol.
    pub fn market_stream_url(&self, symbol: &str) -> String {
        let s = symbol.to_lowercase();
        format!("{}/stream?streams={}@depth@100ms/{}@trade", self.base_url, s, s)
    }

    pub fn user_stream_url(&self, listen_key: &str) -> String {
        format!("{}/ws/{}", self.base_url, listen_key)
    }
}

/// Split a frame into its event type and payload.
/// Combined-stream envelopes (`{stream, data}`) are unwrapped.
fn event_payload(text: &str) -> Result<(String, Value), ExchangeError> {
    let mut value: Value = serde_json::from_str(text)?;
    let payload = if value.get("data").is_some_and(Value::is_object) {
        value["data"].take()
    } else {
        value
    };

    let event = payload
        .get("e")
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::Parse("frame has no event type".to_string()))?
        .to_string();
    Ok((event, payload))
}

pub fn parse_market_frame(text: &str) -> Result<MarketFrame, ExchangeError> {
    let (event, payload) = event_payload(text)?;
    match event.as_str() {
        "depthUpdate" => Ok(MarketFrame::Depth(serde_json::from_value(payload)?)),
        "trade" => Ok(MarketFrame::Trade(serde_json::from_value(payload)?)),
        _ => Ok(MarketFrame::Other(event)),
    }
}

pub fn parse_user_frame(text: &str) -> Result<UserFrame, ExchangeError> {
    let (event, payload) = event_payload(text)?;
    match event.as_str() {
        "executionReport" => Ok(UserFrame::Execution(serde_json::from_value(payload)?)),
        "listenKeyExpired" => Ok(UserFrame::ListenKeyExpired),
        _ => Ok(UserFrame::Other(event)),
    }
}
