//! Local order book with cached support and resistance levels.

use super::side::{BookSide, Level, LevelChange, Side};
use crate::exchange::{DepthUpdate, PriceLevel};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Outcome of applying a streamed depth update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthOutcome {
    Applied,
    /// Update older than the loaded snapshot, ignored.
    Stale,
    /// Updates were missed; the book needs a fresh snapshot.
    Gap { expected: u64, actual: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    price: Decimal,
    quantity: Decimal,
}

/// Bounded bid/ask book for one symbol.
///
/// Support is the best bid whose quantity is at least
/// `support_ratio * target_volume`; resistance is the same on the ask side.
/// Both are cached and only recomputed when the cached level disappears or
/// falls below the threshold, or a better qualifying level shows up in a batch.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
    threshold: Decimal,
    support: Option<Tracked>,
    resistance: Option<Tracked>,
    last_update_id: Option<u64>,
}

impl OrderBook {
    pub fn new(
        symbol: impl Into<String>,
        max_levels: usize,
        support_ratio: Decimal,
        target_volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::new(Side::Bid, max_levels),
            asks: BookSide::new(Side::Ask, max_levels),
            threshold: support_ratio * target_volume,
            support: None,
            resistance: None,
            last_update_id: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Minimum resting quantity for a support/resistance level.
    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.best()
    }

    /// Replace both sides with a REST snapshot and rescan both caches.
    pub fn load_snapshot(&mut self, last_update_id: u64, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            self.bids.apply(level.price, level.quantity);
        }
        for level in asks {
            self.asks.apply(level.price, level.quantity);
        }
        self.bids.trim();
        self.asks.trim();

        self.support = Self::scan(&self.bids, self.threshold);
        self.resistance = Self::scan(&self.asks, self.threshold);
        self.last_update_id = Some(last_update_id);

        debug!(
            symbol = %self.symbol,
            bids = self.bids.len(),
            asks = self.asks.len(),
            support = ?self.support.map(|s| s.price),
            "Order book snapshot loaded"
        );
    }

    /// Apply a single diff as its own batch.
    pub fn apply_diff(&mut self, side: Side, price: Decimal, quantity: Decimal) {
        let diff = [PriceLevel { price, quantity }];
        match side {
            Side::Bid => self.apply_batch(&diff, &[]),
            Side::Ask => self.apply_batch(&[], &diff),
        }
    }

    /// Apply one diff batch: bids, then asks, then eviction and cache resolution.
    pub fn apply_batch(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        Self::apply_side(&mut self.bids, &mut self.support, bids, self.threshold);
        Self::apply_side(&mut self.asks, &mut self.resistance, asks, self.threshold);
    }

    /// Apply a streamed update, checking it against the snapshot sequence.
    pub fn apply_depth_update(&mut self, update: &DepthUpdate) -> DepthOutcome {
        if let Some(last) = self.last_update_id {
            if update.final_update_id <= last {
                return DepthOutcome::Stale;
            }
            if update.first_update_id > last + 1 {
                warn!(
                    symbol = %self.symbol,
                    expected = last + 1,
                    actual = update.first_update_id,
                    "Depth sequence gap"
                );
                return DepthOutcome::Gap {
                    expected: last + 1,
                    actual: update.first_update_id,
                };
            }
            self.last_update_id = Some(update.final_update_id);
        }
        self.apply_batch(&update.bids, &update.asks);
        DepthOutcome::Applied
    }

    /// Cached support level.
    pub fn best_support(&self) -> Option<Level> {
        self.support.map(|t| Level {
            price: t.price,
            quantity: t.quantity,
            rank: self.bids.rank_of(t.price),
        })
    }

    /// Cached resistance level.
    pub fn best_resistance(&self) -> Option<Level> {
        self.resistance.map(|t| Level {
            price: t.price,
            quantity: t.quantity,
            rank: self.asks.rank_of(t.price),
        })
    }

    /// Uncached support lookup for an arbitrary target volume.
    pub fn support_for(&self, target_volume: Decimal, support_ratio: Decimal) -> Option<Level> {
        self.bids
            .first_at_least(Self::floor_threshold(support_ratio * target_volume))
    }

    /// Uncached resistance lookup for an arbitrary target volume.
    pub fn resistance_for(&self, target_volume: Decimal, support_ratio: Decimal) -> Option<Level> {
        self.asks
            .first_at_least(Self::floor_threshold(support_ratio * target_volume))
    }

    fn scan(side: &BookSide, threshold: Decimal) -> Option<Tracked> {
        side.first_at_least(Self::floor_threshold(threshold))
            .map(|l| Tracked {
                price: l.price,
                quantity: l.quantity,
            })
    }

    // A stored level always has a positive quantity, so a zero threshold
    // means "any level".
    fn floor_threshold(threshold: Decimal) -> Decimal {
        threshold.max(Decimal::ZERO)
    }

    fn apply_side(
        side: &mut BookSide,
        cache: &mut Option<Tracked>,
        diffs: &[PriceLevel],
        threshold: Decimal,
    ) {
        if diffs.is_empty() {
            return;
        }

        let mut invalidated = false;
        let mut candidates: Vec<Decimal> = Vec::new();

        for diff in diffs {
            let change = side.apply(diff.price, diff.quantity);
            if change == LevelChange::Noop {
                continue;
            }

            if let Some(tracked) = cache.as_mut() {
                if tracked.price == diff.price {
                    if diff.quantity.is_zero() || diff.quantity < threshold {
                        invalidated = true;
                    } else {
                        tracked.quantity = diff.quantity;
                        invalidated = false;
                    }
                }
            }

            if !diff.quantity.is_zero() && diff.quantity >= threshold {
                candidates.push(diff.price);
            }
        }

        let evicted = side.trim();
        if let Some(tracked) = cache.as_ref() {
            if evicted.contains(&tracked.price) {
                invalidated = true;
            }
        }

        if invalidated {
            *cache = Self::scan(side, threshold);
            return;
        }

        // A later diff in the same batch may have removed or shrunk a candidate.
        let best_candidate = candidates
            .into_iter()
            .filter_map(|price| side.get(price).map(|qty| (price, qty)))
            .filter(|(_, qty)| *qty >= threshold)
            .reduce(|best, next| if side.is_better(next.0, best.0) { next } else { best });

        if let Some((price, quantity)) = best_candidate {
            let replace = match cache {
                None => true,
                Some(tracked) => side.is_better(price, tracked.price),
            };
            if replace {
                *cache = Some(Tracked { price, quantity });
            }
        }
    }
}
