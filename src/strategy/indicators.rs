//! Candle statistics.

use crate::exchange::Candle;
use crate::utils::decimal::{mean, sample_std_dev};
use rust_decimal::Decimal;

/// Moving average with bands `num_std` sample deviations either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerBand {
    pub middle: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
}

/// Band over the last `window` closes, `None` until enough closes exist.
pub fn bollinger(closes: &[Decimal], window: usize, num_std: Decimal) -> Option<BollingerBand> {
    if window < 2 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    let middle = mean(tail)?;
    let deviation = sample_std_dev(tail)? * num_std;
    Some(BollingerBand {
        middle,
        upper: middle + deviation,
        lower: middle - deviation,
    })
}

/// Bands for the last `n` candles only, oldest first; `None` where a
/// candle has fewer than `window` closes behind it.
pub fn bollinger_tail(candles: &[Candle], window: usize, num_std: Decimal, n: usize) -> Vec<Option<BollingerBand>> {
    let n = n.min(candles.len());
    let start = candles.len() - n;
    let first = start.saturating_sub(window.saturating_sub(1));
    let closes: Vec<Decimal> = candles[first..].iter().map(|c| c.close).collect();
    (start..candles.len())
        .map(|end| bollinger(&closes[..=end - first], window, num_std))
        .collect()
}
