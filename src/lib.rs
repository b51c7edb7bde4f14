//! # Book Trader
//!
//! Order-book driven spot trading on Binance. Strategies buy near support
//! levels or Bollinger band signals, ride a trailing stop and persist their
//! accounts after every change.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Binance REST client, WebSocket frames and the paper venue
//! - `orderbook`: Local book with cached support and resistance
//! - `stream`: Supervised market and user data connections
//! - `dispatch`: Per-strategy queues, workers and candle pollers
//! - `strategy`: Order lifecycle, strategy profiles and analytics
//! - `persistence`: Snapshot stores and the single writer task
//! - `utils`: Decimal helpers

pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod orderbook;
pub mod persistence;
pub mod strategy;
pub mod stream;
pub mod utils;

pub use config::Config;
