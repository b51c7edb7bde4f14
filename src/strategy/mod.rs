//! Trading strategies.
//!
//! - `order` / `account`: order lifecycle, trailing stop and capital accounting
//! - `profile`: the five strategy kinds as parameter sets
//! - `indicators` / `signals`: Bollinger bands and entry/exit conditions
//! - `engine`: applies market and order events to one trader
//! - `analytics`: profit summaries for reporting

mod account;
pub mod analytics;
mod engine;
mod error;
pub mod indicators;
mod order;
mod profile;
pub mod signals;

pub use account::TraderAccount;
#[cfg(test)]
pub(crate) use account::fixtures;
pub use engine::{StrategyEngine, TradingEngine};
pub use error::LifecycleError;
pub use order::{BuyFee, Order, OrderState, TrailAction, TrailParams};
pub use profile::{
    BandMode, BandParams, EntrySignal, FeePool, OrderStyle, SlotPolicy, StrategyKind,
    StrategyProfile, Venue,
};
