//! One side of a bounded price-indexed book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// A resting price level with its distance from the best price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Number of levels strictly better than this one (0 = best).
    pub rank: usize,
}

/// Result of applying a single price diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// Zero quantity for a price that was not stored.
    Noop,
    Inserted,
    Updated,
    Removed,
}

/// Ordered price -> quantity map, bounded to `max_levels`.
///
/// Keys are stored ascending for both sides; bids are read in reverse.
/// A stored quantity is never zero.
#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Decimal, Decimal>,
    max_levels: usize,
}

impl BookSide {
    pub fn new(side: Side, max_levels: usize) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            max_levels,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn get(&self, price: Decimal) -> Option<Decimal> {
        self.levels.get(&price).copied()
    }

    /// Upsert or delete. Quantities overwrite, they never accumulate.
    pub fn apply(&mut self, price: Decimal, quantity: Decimal) -> LevelChange {
        if quantity.is_zero() {
            return match self.levels.remove(&price) {
                Some(_) => LevelChange::Removed,
                None => LevelChange::Noop,
            };
        }
        match self.levels.insert(price, quantity) {
            Some(_) => LevelChange::Updated,
            None => LevelChange::Inserted,
        }
    }

    /// Best price: highest bid or lowest ask.
    pub fn best(&self) -> Option<(Decimal, Decimal)> {
        let entry = match self.side {
            Side::Bid => self.levels.iter().next_back(),
            Side::Ask => self.levels.iter().next(),
        };
        entry.map(|(p, q)| (*p, *q))
    }

    /// Iterate from the best price outward.
    pub fn iter_from_best(&self) -> Box<dyn Iterator<Item = (Decimal, Decimal)> + '_> {
        let iter = self.levels.iter().map(|(p, q)| (*p, *q));
        match self.side {
            Side::Bid => Box::new(iter.rev()),
            Side::Ask => Box::new(iter),
        }
    }

    /// True when `a` is strictly closer to the best price than `b`.
    pub fn is_better(&self, a: Decimal, b: Decimal) -> bool {
        match self.side {
            Side::Bid => a > b,
            Side::Ask => a < b,
        }
    }

    /// Count of stored levels strictly better than `price`.
    pub fn rank_of(&self, price: Decimal) -> usize {
        match self.side {
            Side::Bid => self
                .levels
                .range((Bound::Excluded(price), Bound::Unbounded))
                .count(),
            Side::Ask => self.levels.range(..price).count(),
        }
    }

    /// First level from the best outward with `quantity >= min_quantity`.
    pub fn first_at_least(&self, min_quantity: Decimal) -> Option<Level> {
        self.iter_from_best()
            .enumerate()
            .find(|(_, (_, qty))| *qty >= min_quantity)
            .map(|(rank, (price, quantity))| Level {
                price,
                quantity,
                rank,
            })
    }

    /// Evict worst levels (lowest bid / highest ask) until within bound.
    /// Returns the evicted prices.
    pub fn trim(&mut self) -> Vec<Decimal> {
        let mut evicted = Vec::new();
        while self.levels.len() > self.max_levels {
            let worst = match self.side {
                Side::Bid => self.levels.pop_first(),
                Side::Ask => self.levels.pop_last(),
            };
            match worst {
                Some((price, _)) => evicted.push(price),
                None => break,
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_quantity_for_absent_price_is_noop() {
        let mut bids = BookSide::new(Side::Bid, 10);
        bids.apply(dec!(100), dec!(1));

        assert_eq!(bids.apply(dec!(99), dec!(0)), LevelChange::Noop);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids.get(dec!(100)), Some(dec!(1)));
    }

    #[test]
    fn test_nonzero_diff_overwrites() {
        let mut asks = BookSide::new(Side::Ask, 10);
        assert_eq!(asks.apply(dec!(101), dec!(2)), LevelChange::Inserted);
        assert_eq!(asks.apply(dec!(101), dec!(5)), LevelChange::Updated);
        assert_eq!(asks.get(dec!(101)), Some(dec!(5)));

        assert_eq!(asks.apply(dec!(101), dec!(0)), LevelChange::Removed);
        assert!(asks.is_empty());
    }

    #[test]
    fn test_best_and_rank() {
        let mut bids = BookSide::new(Side::Bid, 10);
        let mut asks = BookSide::new(Side::Ask, 10);
        for p in [dec!(97), dec!(98), dec!(99)] {
            bids.apply(p, dec!(1));
            asks.apply(p + dec!(3), dec!(1));
        }

        assert_eq!(bids.best(), Some((dec!(99), dec!(1))));
        assert_eq!(asks.best(), Some((dec!(100), dec!(1))));
        assert_eq!(bids.rank_of(dec!(97)), 2);
        assert_eq!(asks.rank_of(dec!(102)), 2);
        assert!(bids.is_better(dec!(99), dec!(98)));
        assert!(asks.is_better(dec!(100), dec!(101)));
    }

    #[test]
    fn test_trim_evicts_worst_levels() {
        let mut bids = BookSide::new(Side::Bid, 2);
        let mut asks = BookSide::new(Side::Ask, 2);
        for p in [dec!(1), dec!(2), dec!(3), dec!(4)] {
            bids.apply(p, dec!(1));
            asks.apply(p, dec!(1));
        }

        assert_eq!(bids.trim(), vec![dec!(1), dec!(2)]);
        assert_eq!(asks.trim(), vec![dec!(4), dec!(3)]);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids.best(), Some((dec!(4), dec!(1))));
        assert_eq!(asks.best(), Some((dec!(1), dec!(1))));
    }

    #[test]
    fn test_first_at_least_scans_from_best() {
        let mut bids = BookSide::new(Side::Bid, 10);
        bids.apply(dec!(100), dec!(1));
        bids.apply(dec!(99), dec!(8));
        bids.apply(dec!(98), dec!(20));

        let level = bids.first_at_least(dec!(7)).unwrap();
        assert_eq!(level.price, dec!(99));
        assert_eq!(level.rank, 1);
        assert!(bids.first_at_least(dec!(50)).is_none());
    }
}
