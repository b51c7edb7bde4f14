//! Entry and exit conditions.
//!
//! Pure functions over prices, candles and open orders. The engine decides
//! which of them apply to a given strategy profile.

use super::indicators::{bollinger_tail, BollingerBand};
use super::order::Order;
use crate::exchange::Candle;
use rust_decimal::Decimal;

/// `support <= price <= support * (1 + band)`.
pub fn within_support_band(price: Decimal, support: Decimal, band: Decimal) -> bool {
    support <= price && price <= support * (Decimal::ONE + band)
}

/// A new buy at `price` must sit at least `gap` below every live order.
pub fn respects_gap(orders: &[Order], price: Decimal, gap: Decimal) -> bool {
    orders
        .iter()
        .filter(|o| !o.is_closed())
        .filter_map(Order::reference_price)
        .all(|reference| price < reference && reference - price >= gap)
}

/// The last `n` candles paired with their bands, if all of them have one.
fn banded_tail(candles: &[Candle], window: usize, num_std: Decimal, n: usize) -> Option<Vec<(&Candle, BollingerBand)>> {
    if candles.len() < n {
        return None;
    }
    let bands = bollinger_tail(candles, window, num_std, n);
    let start = candles.len() - n;
    candles[start..]
        .iter()
        .zip(&bands)
        .map(|(candle, band)| band.map(|b| (candle, b)))
        .collect()
}

/// Three-candle reversal off the lower band: the first candle breaks down
/// through it, the second closes back above it, the third confirms higher.
pub fn reversal_pattern(candles: &[Candle], window: usize, num_std: Decimal) -> bool {
    let Some(tail) = banded_tail(candles, window, num_std, 3) else {
        return false;
    };
    let (c1, b1) = tail[0];
    let (c2, b2) = tail[1];
    let (c3, _) = tail[2];

    let breakdown = c1.open > b1.lower && c1.close < b1.lower;
    let recovery = c2.open < b2.lower && c2.close > b2.lower;
    let confirmation = c3.open >= c2.close && c3.close > c2.close;
    breakdown && recovery && confirmation
}

/// Last close below the lower band.
pub fn mean_reversion_entry(candles: &[Candle], window: usize, num_std: Decimal) -> bool {
    banded_tail(candles, window, num_std, 1)
        .is_some_and(|tail| tail[0].0.close < tail[0].1.lower)
}

/// Last close back above the middle band.
pub fn mean_reversion_exit(candles: &[Candle], window: usize, num_std: Decimal) -> bool {
    banded_tail(candles, window, num_std, 1)
        .is_some_and(|tail| tail[0].0.close > tail[0].1.middle)
}

/// Previous close below its lower band and last close back above.
pub fn funding_band_entry(candles: &[Candle], window: usize, num_std: Decimal) -> bool {
    let Some(tail) = banded_tail(candles, window, num_std, 2) else {
        return false;
    };
    let (prev, prev_band) = tail[0];
    let (last, last_band) = tail[1];
    prev.close < prev_band.lower && last.close > last_band.lower
}

/// Funding rate in percent meets the gate.
pub fn funding_gate_open(funding_rate_pct: Option<Decimal>, threshold: Decimal) -> bool {
    funding_rate_pct.is_some_and(|rate| rate >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{FillReport, OrderSide, OrderStatus};
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: 0,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: Decimal::ONE,
        }
    }

    /// Four flat candles around 100 so the band warms up with real width.
    fn base() -> Vec<Candle> {
        vec![
            candle(dec!(100), dec!(101)),
            candle(dec!(101), dec!(99)),
            candle(dec!(99), dec!(100)),
            candle(dec!(100), dec!(100)),
        ]
    }

    #[test]
    fn test_support_band_bounds() {
        assert!(within_support_band(dec!(100), dec!(100), dec!(0.001)));
        assert!(within_support_band(dec!(100.1), dec!(100), dec!(0.001)));
        assert!(!within_support_band(dec!(100.11), dec!(100), dec!(0.001)));
        assert!(!within_support_band(dec!(99.99), dec!(100), dec!(0.001)));
    }

    #[test]
    fn test_gap_guard() {
        let pending = Order::pending_buy("1", dec!(100), dec!(1), dec!(100), None);
        let orders = vec![pending];

        assert!(respects_gap(&[], dec!(100), dec!(5)));
        assert!(respects_gap(&orders, dec!(95), dec!(5)));
        assert!(!respects_gap(&orders, dec!(96), dec!(5)));
        // Never above a live order.
        assert!(!respects_gap(&orders, dec!(110), dec!(5)));
    }

    #[test]
    fn test_gap_guard_uses_fill_price_once_open() {
        let mut order = Order::pending_buy("1", dec!(100), dec!(1), dec!(100), None);
        let fill = FillReport {
            order_id: "1".into(),
            side: OrderSide::Buy,
            status: OrderStatus::Filled,
            cumulative_quote_qty: dec!(90),
            cumulative_qty: dec!(1),
            commission: Decimal::ZERO,
            commission_asset: None,
            last_price: dec!(90),
        };
        order.confirm_buy(&fill, Decimal::ZERO, dec!(0.05)).unwrap();
        assert!(!respects_gap(&[order.clone()], dec!(88), dec!(5)));
        assert!(respects_gap(&[order], dec!(85), dec!(5)));
    }

    #[test]
    fn test_reversal_pattern() {
        let mut candles = base();
        candles.push(candle(dec!(99.5), dec!(90)));
        candles.push(candle(dec!(89), dec!(98)));
        candles.push(candle(dec!(98), dec!(99)));
        assert!(reversal_pattern(&candles, 4, dec!(1)));

        // Third candle fails to confirm.
        let last = candles.len() - 1;
        candles[last] = candle(dec!(98), dec!(97));
        assert!(!reversal_pattern(&candles, 4, dec!(1)));
    }

    #[test]
    fn test_mean_reversion_signals() {
        let mut candles = base();
        candles.push(candle(dec!(100), dec!(90)));
        assert!(mean_reversion_entry(&candles, 4, dec!(1)));
        assert!(!mean_reversion_exit(&candles, 4, dec!(1)));

        candles.push(candle(dec!(90), dec!(105)));
        assert!(!mean_reversion_entry(&candles, 4, dec!(1)));
        assert!(mean_reversion_exit(&candles, 4, dec!(1)));
    }

    #[test]
    fn test_funding_band_entry_and_gate() {
        let mut candles = base();
        candles.push(candle(dec!(100), dec!(90)));
        candles.push(candle(dec!(90), dec!(99)));
        assert!(funding_band_entry(&candles, 4, dec!(1)));

        assert!(funding_gate_open(Some(dec!(0.01)), dec!(-0.5)));
        assert!(funding_gate_open(Some(dec!(-0.5)), dec!(-0.5)));
        assert!(!funding_gate_open(Some(dec!(-0.6)), dec!(-0.5)));
        assert!(!funding_gate_open(None, dec!(-0.5)));
    }

    #[test]
    fn test_too_few_candles() {
        assert!(!reversal_pattern(&base(), 20, dec!(2)));
        assert!(!mean_reversion_entry(&[], 20, dec!(2)));
        assert!(!funding_band_entry(&base()[..1], 2, dec!(2)));
    }
}
