//! Exchange integrations.
//!
//! ## Binance
//! REST connectivity for spot orders, trading rules, depth snapshots, klines
//! and futures funding rates; WebSocket endpoints and frame decoding for the
//! market and user data streams.
//!
//! ## Paper
//! An in-process venue that fills every order immediately at its expected price.

mod client;
mod error;
mod paper;
mod traits;
mod types;
mod websocket;

pub use client::BinanceClient;
pub use error::ExchangeError;
pub use paper::PaperExchange;
pub use traits::{CandleSource, MarketData, OrderGateway, UserStreamAuth};
#[cfg(test)]
pub use traits::{MockMarketData, MockOrderGateway, MockUserStreamAuth};
pub use types::*;
pub use websocket::{parse_market_frame, parse_user_frame, BinanceWebSocket, MarketFrame, UserFrame};
