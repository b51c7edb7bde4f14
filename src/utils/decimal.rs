//! Decimal arithmetic utilities for money, quantities and candle statistics.
//!
//! Nothing on a path that touches capital or order sizing goes through `f64`.

use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Default quantum for order sizes (5 decimal places).
pub const QUANTITY_QUANTUM: Decimal = dec!(0.00001);

/// Truncate toward zero to a multiple of `quantum`.
///
/// `truncate_to_quantum(1.234567, 0.00001) == 1.23456`. A zero quantum
/// returns the value untouched.
pub fn truncate_to_quantum(value: Decimal, quantum: Decimal) -> Decimal {
    if quantum <= Decimal::ZERO {
        return value;
    }
    (value / quantum).trunc() * quantum
}

/// Round to tick size (e.g., 0.01 for most prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().sum();
    Some(sum / Decimal::from(values.len()))
}

/// Sample standard deviation (n - 1 denominator), `None` below two samples.
pub fn sample_std_dev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let squares: Decimal = values.iter().map(|v| (*v - avg) * (*v - avg)).sum();
    let variance = squares / Decimal::from(values.len() - 1);
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_quantum() {
        assert_eq!(truncate_to_quantum(dec!(1.234567), QUANTITY_QUANTUM), dec!(1.23456));
        assert_eq!(truncate_to_quantum(dec!(0.000009), QUANTITY_QUANTUM), dec!(0));
        assert_eq!(truncate_to_quantum(dec!(3.5), Decimal::ZERO), dec!(3.5));
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(1.00)), dec!(50123.00));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }

    #[test]
    fn test_mean_and_std_dev() {
        let values = [dec!(2), dec!(4), dec!(4), dec!(4), dec!(5), dec!(5), dec!(7), dec!(9)];
        assert_eq!(mean(&values), Some(dec!(5)));

        // Sample variance = 32 / 7
        let std = sample_std_dev(&values).unwrap();
        assert!(std > dec!(2.138) && std < dec!(2.139));

        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std_dev(&[dec!(1)]), None);
    }
}
