//! Order book reconstruction from a REST snapshot plus streamed diffs.
//!
//! - `side`: one bounded, price-ordered side
//! - `book`: both sides plus the support/resistance cache

mod book;
mod side;

pub use book::{DepthOutcome, OrderBook};
pub use side::{BookSide, Level, LevelChange, Side};
