//! Configuration management for the book trader.
//!
//! Loads settings from an optional `config.{toml,yaml,json}` file and from
//! `BOOKTRADER__*` environment variables (`.env` is honored).

use crate::persistence::StoreBackend;
use crate::strategy::StrategyKind;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials and endpoints
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Account defaults shared by every trader
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub order_book: OrderBookConfig,
    /// Connection and queue tuning
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Strategy instances to run
    #[serde(default)]
    pub traders: Vec<TraderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Spot REST base URL override
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Futures REST base URL override
    #[serde(default)]
    pub futures_rest_url: Option<String>,
    /// WebSocket base URL override
    #[serde(default)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Starting capital of a fresh trader (quote asset)
    #[serde(default = "default_capital")]
    pub capital: Decimal,
    /// Share of capital committed per trade (0.0-1.0)
    #[serde(default = "default_trade_fraction")]
    pub trade_fraction: Decimal,
    /// Commission rate charged when the venue reports none we can value
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Order size quantum
    #[serde(default = "default_quantity_quantum")]
    pub quantity_quantum: Decimal,
    /// No entries while free capital is below this
    #[serde(default = "default_min_free_capital")]
    pub min_free_capital: Decimal,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Fraction of a new high a secured stop follows (0.5 = halfway)
    #[serde(default = "default_trailing_smoothing")]
    pub trailing_smoothing: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookConfig {
    /// Levels kept per side
    #[serde(default = "default_max_levels")]
    pub max_levels: usize,
    /// Support qualifies at `support_ratio * target_volume`
    #[serde(default = "default_support_ratio")]
    pub support_ratio: Decimal,
    /// Depth requested for the REST snapshot
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
    /// Entries allowed up to `support * (1 + support_band)`
    #[serde(default = "default_support_band")]
    pub support_band: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Trades are forwarded only when the price moves by more than this
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: Decimal,
    #[serde(default = "default_listen_key_renewal_secs")]
    pub listen_key_renewal_secs: u64,
    /// Capacity of every per-strategy queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a worker waits on its queue before re-checking the stop flag
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory of the JSON snapshot files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory of the hourly rolling log files
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// One strategy instance. Unset fields fall back to the `trading` section
/// or the kind's preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    pub id: String,
    pub kind: StrategyKind,
    pub symbol: String,
    #[serde(default)]
    pub capital: Option<Decimal>,
    #[serde(default)]
    pub trade_fraction: Option<Decimal>,
    /// Support-based entries: volume a bid level must approach to count as support
    #[serde(default)]
    pub target_volume: Option<Decimal>,
    /// Support-based entries: minimum distance below every live order
    #[serde(default)]
    pub respected_gap: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// Multi-slot kinds: cap on concurrent orders
    #[serde(default)]
    pub max_orders: Option<usize>,
}

// Default value functions
fn default_capital() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_trade_fraction() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001 = 0.1%
}

fn default_quantity_quantum() -> Decimal {
    Decimal::new(1, 5) // 0.00001
}

fn default_min_free_capital() -> Decimal {
    Decimal::new(100, 0)
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_trailing_smoothing() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_max_levels() -> usize {
    5000
}

fn default_support_ratio() -> Decimal {
    Decimal::new(7, 1) // 0.7
}

fn default_snapshot_limit() -> u32 {
    5000
}

fn default_support_band() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_price_change_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_listen_key_renewal_secs() -> u64 {
    30 * 60
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/snapshots.db")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("BOOKTRADER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.trade_fraction > Decimal::ZERO && self.trading.trade_fraction <= Decimal::ONE,
            "trade_fraction must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trading.stop_loss_pct > Decimal::ZERO && self.trading.stop_loss_pct < Decimal::ONE,
            "stop_loss_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trading.trailing_smoothing > Decimal::ZERO
                && self.trading.trailing_smoothing <= Decimal::ONE,
            "trailing_smoothing must be in (0, 1]"
        );

        anyhow::ensure!(
            self.trading.fee_rate >= Decimal::ZERO && self.trading.fee_rate < Decimal::ONE,
            "fee_rate must be in [0, 1)"
        );

        anyhow::ensure!(self.order_book.max_levels > 0, "max_levels must be positive");
        anyhow::ensure!(self.stream.queue_capacity > 0, "queue_capacity must be positive");

        let mut ids = HashSet::new();
        for trader in &self.traders {
            anyhow::ensure!(!trader.symbol.is_empty(), "trader {} has no symbol", trader.id);
            anyhow::ensure!(ids.insert(trader.id.as_str()), "duplicate trader id {}", trader.id);
            if let Some(fraction) = trader.trade_fraction {
                anyhow::ensure!(
                    fraction > Decimal::ZERO && fraction <= Decimal::ONE,
                    "trader {}: trade_fraction must be between 0 and 1",
                    trader.id
                );
            }
        }

        Ok(())
    }

    /// Whether any configured trader sends real orders.
    pub fn has_live_traders(&self) -> bool {
        self.traders.iter().any(|t| t.kind.is_live())
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            capital: default_capital(),
            trade_fraction: default_trade_fraction(),
            fee_rate: default_fee_rate(),
            quantity_quantum: default_quantity_quantum(),
            min_free_capital: default_min_free_capital(),
            stop_loss_pct: default_stop_loss_pct(),
            trailing_smoothing: default_trailing_smoothing(),
        }
    }
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            max_levels: default_max_levels(),
            support_ratio: default_support_ratio(),
            snapshot_limit: default_snapshot_limit(),
            support_band: default_support_band(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            price_change_threshold: default_price_change_threshold(),
            listen_key_renewal_secs: default_listen_key_renewal_secs(),
            queue_capacity: default_queue_capacity(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trader(id: &str) -> TraderConfig {
        TraderConfig {
            id: id.to_string(),
            kind: StrategyKind::SecuredCapital,
            symbol: "BTCUSDT".to_string(),
            capital: None,
            trade_fraction: None,
            target_volume: Some(dec!(10)),
            respected_gap: Some(dec!(50)),
            stop_loss_pct: None,
            max_orders: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.trailing_smoothing, dec!(0.5));
        assert_eq!(config.order_book.support_ratio, dec!(0.7));
        assert_eq!(config.stream.listen_key_renewal_secs, 1800);
    }

    #[test]
    fn test_duplicate_trader_ids_rejected() {
        let mut config = Config::default();
        config.traders = vec![trader("a"), trader("a")];
        assert!(config.validate().is_err());

        config.traders = vec![trader("a"), trader("b")];
        assert!(config.validate().is_ok());
        assert!(!config.has_live_traders());
    }

    #[test]
    fn test_deserialize_trader_section() {
        let json = r#"{
            "trading": {"capital": "500"},
            "traders": [{"id": "t1", "kind": "real_secured_capital", "symbol": "ETHUSDT", "max_orders": 3}]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.trading.capital, dec!(500));
        assert_eq!(config.trading.fee_rate, dec!(0.001));
        assert_eq!(config.traders[0].kind, StrategyKind::RealSecuredCapital);
        assert_eq!(config.traders[0].max_orders, Some(3));
        assert!(config.has_live_traders());
    }
}
