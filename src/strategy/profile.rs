//! Strategy presets and their resolved parameters.
//!
//! A strategy is an entry signal combined with a slot policy, an optional
//! fee pool and an execution venue. `StrategyKind` names the supported
//! combinations; `StrategyProfile::resolve` fills in their parameters.

use crate::config::{Config, TraderConfig};
use crate::exchange::CandleSource;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Supported strategy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Support-anchored entries, unlimited slots, paper venue.
    SecuredCapital,
    /// Support-anchored entries with a fee pool, up to 10 slots, live limit orders.
    RealSecuredCapital,
    /// Three-candle reversal off the lower Bollinger band.
    BollingerReversal,
    /// Buy below the lower band, sell above the middle band.
    BollingerMeanReversion,
    /// Band re-entry gated on the perpetual funding rate (paper venue).
    FundingRate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SecuredCapital => "secured_capital",
            StrategyKind::RealSecuredCapital => "real_secured_capital",
            StrategyKind::BollingerReversal => "bollinger_reversal",
            StrategyKind::BollingerMeanReversion => "bollinger_mean_reversion",
            StrategyKind::FundingRate => "funding_rate",
        }
    }

    pub fn venue(&self) -> Venue {
        match self {
            StrategyKind::SecuredCapital | StrategyKind::FundingRate => Venue::Paper,
            _ => Venue::Live,
        }
    }

    pub fn is_live(&self) -> bool {
        self.venue() == Venue::Live
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStyle {
    Market,
    /// Resting limit at the decision price.
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandMode {
    Reversal,
    MeanReversion,
}

/// Candle window and polling for band-based entries.
#[derive(Debug, Clone, PartialEq)]
pub struct BandParams {
    pub window: usize,
    pub num_std: Decimal,
    pub interval: String,
    pub limit: u32,
    pub source: CandleSource,
    pub poll_secs: u64,
}

impl BandParams {
    fn new(interval: &str, limit: u32, source: CandleSource) -> Self {
        Self {
            window: 20,
            num_std: dec!(2),
            interval: interval.to_string(),
            limit,
            source,
            poll_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntrySignal {
    Support {
        target_volume: Decimal,
        respected_gap: Decimal,
        support_band: Decimal,
        support_ratio: Decimal,
    },
    Band {
        mode: BandMode,
        params: BandParams,
    },
    FundingGated {
        /// Minimum funding rate in percent.
        threshold: Decimal,
        params: BandParams,
    },
}

impl EntrySignal {
    pub fn band_params(&self) -> Option<&BandParams> {
        match self {
            EntrySignal::Support { .. } => None,
            EntrySignal::Band { params, .. } | EntrySignal::FundingGated { params, .. } => Some(params),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// At most one live order.
    Single,
    Multi { max_orders: Option<usize> },
}

impl SlotPolicy {
    pub fn admits(&self, live_orders: usize) -> bool {
        match self {
            SlotPolicy::Single => live_orders == 0,
            SlotPolicy::Multi { max_orders: Some(max) } => live_orders < *max,
            SlotPolicy::Multi { max_orders: None } => true,
        }
    }
}

/// Micro-purchase whose cost is spread over the next `slots` trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePool {
    pub quantity: Decimal,
    pub slots: u32,
}

impl Default for FeePool {
    fn default() -> Self {
        Self {
            quantity: dec!(0.0001),
            slots: 999,
        }
    }
}

/// Fully resolved parameters of one strategy instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyProfile {
    pub kind: StrategyKind,
    pub entry: EntrySignal,
    pub slots: SlotPolicy,
    pub fee_pool: Option<FeePool>,
    pub venue: Venue,
    pub order_style: OrderStyle,
    pub trade_fraction: Decimal,
    pub quantity_quantum: Decimal,
    pub min_free_capital: Decimal,
    pub stop_loss_pct: Decimal,
    pub trailing_smoothing: Decimal,
}

impl StrategyProfile {
    pub fn resolve(config: &Config, trader: &TraderConfig) -> Self {
        let support = || EntrySignal::Support {
            target_volume: trader.target_volume.unwrap_or(dec!(10)),
            respected_gap: trader.respected_gap.unwrap_or(Decimal::ZERO),
            support_band: config.order_book.support_band,
            support_ratio: config.order_book.support_ratio,
        };

        let (entry, slots, fee_pool, order_style) = match trader.kind {
            StrategyKind::SecuredCapital => (
                support(),
                SlotPolicy::Multi { max_orders: trader.max_orders },
                None,
                OrderStyle::Market,
            ),
            StrategyKind::RealSecuredCapital => (
                support(),
                SlotPolicy::Multi {
                    max_orders: Some(trader.max_orders.unwrap_or(10)),
                },
                Some(FeePool::default()),
                OrderStyle::Limit,
            ),
            StrategyKind::BollingerReversal => (
                EntrySignal::Band {
                    mode: BandMode::Reversal,
                    params: BandParams::new("15m", 1000, CandleSource::Spot),
                },
                SlotPolicy::Single,
                Some(FeePool::default()),
                OrderStyle::Market,
            ),
            StrategyKind::BollingerMeanReversion => (
                EntrySignal::Band {
                    mode: BandMode::MeanReversion,
                    params: BandParams::new("15m", 1000, CandleSource::Spot),
                },
                SlotPolicy::Single,
                None,
                OrderStyle::Market,
            ),
            StrategyKind::FundingRate => (
                EntrySignal::FundingGated {
                    threshold: dec!(-0.5),
                    params: BandParams::new("1m", 100, CandleSource::Futures),
                },
                SlotPolicy::Single,
                None,
                OrderStyle::Market,
            ),
        };

        Self {
            kind: trader.kind,
            entry,
            slots,
            fee_pool,
            venue: trader.kind.venue(),
            order_style,
            trade_fraction: trader.trade_fraction.unwrap_or(config.trading.trade_fraction),
            quantity_quantum: config.trading.quantity_quantum,
            min_free_capital: config.trading.min_free_capital,
            stop_loss_pct: trader.stop_loss_pct.unwrap_or(config.trading.stop_loss_pct),
            trailing_smoothing: config.trading.trailing_smoothing,
        }
    }
}
