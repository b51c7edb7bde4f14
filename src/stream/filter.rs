//! Trade price change filter.

use rust_decimal::Decimal;
use std::collections::HashMap;

/// Forwards a trade only when its price moved more than `threshold` from
/// the last forwarded price of the symbol. The first price of a symbol
/// seeds the cache and is not forwarded.
#[derive(Debug, Clone)]
pub struct LastPriceFilter {
    threshold: Decimal,
    last: HashMap<String, Decimal>,
}

impl LastPriceFilter {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            threshold,
            last: HashMap::new(),
        }
    }

    pub fn admit(&mut self, symbol: &str, price: Decimal) -> bool {
        match self.last.get_mut(symbol) {
            None => {
                self.last.insert(symbol.to_string(), price);
                false
            }
            Some(last) if (price - *last).abs() > self.threshold => {
                *last = price;
                true
            }
            Some(_) => false,
        }
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last.get(symbol).copied()
    }
}
