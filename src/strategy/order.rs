//! Order record and its lifecycle transitions.
//!
//! `buy_in_progress -> open -> (secured) -> sale_in_progress -> closed`
//!
//! Fields are optional per state and checked at every transition, so a
//! corrupted snapshot surfaces as a `LifecycleError` instead of a panic.

use super::error::LifecycleError;
use crate::exchange::FillReport;
use crate::orderbook::Level;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    BuyInProgress,
    Open,
    SaleInProgress,
    Closed,
}

/// How a buy commission was charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyFee {
    /// Paid on top of the quote spent, valued in the quote asset.
    Quote(Decimal),
    /// Taken out of the bought quantity; `value` is its quote equivalent.
    Base { quantity: Decimal, value: Decimal },
}

/// Result of a trailing-stop evaluation on one price tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailAction {
    /// Nothing changed.
    Hold,
    /// New max price (and possibly a raised stop).
    Raised,
    /// The order just became secured; its stop is pinned to the max price.
    Secured,
    /// Price is at or below the stop; the position should be sold.
    StopHit,
}

/// Trailing stop parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailParams {
    pub fee_rate: Decimal,
    /// Amortized fee-pool share charged to every trade.
    pub fee_share: Decimal,
    /// Fraction of a new high the secured stop follows.
    pub smoothing: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange order id of the buy.
    pub id: String,
    pub status: OrderState,
    #[serde(default)]
    pub secured: bool,
    pub opened_at: DateTime<Utc>,
    /// Price the entry was decided at.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub detected_price: Option<Decimal>,
    /// Capital held back while the buy is working.
    #[serde(default, with = "rust_decimal::serde::str")]
    pub reserved_amount: Decimal,

    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub support: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub support_volume: Option<Decimal>,
    #[serde(default)]
    pub support_index: Option<usize>,

    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub buy_price: Option<Decimal>,
    /// Requested quantity while the buy works, filled quantity once open.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub quantity: Option<Decimal>,
    /// Quote spent including the buy fee.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub cost: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub buy_fee: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub max_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub stop_loss_price: Option<Decimal>,

    #[serde(default)]
    pub sale_order_id: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub sale_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub sale_fee: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub sailed_quantity: Option<Decimal>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub profit: Option<Decimal>,
}

impl Order {
    /// A buy accepted by the exchange and not yet filled.
    pub fn pending_buy(
        id: impl Into<String>,
        detected_price: Decimal,
        quantity: Decimal,
        reserved_amount: Decimal,
        support: Option<Level>,
    ) -> Self {
        Self {
            id: id.into(),
            status: OrderState::BuyInProgress,
            secured: false,
            opened_at: Utc::now(),
            detected_price: Some(detected_price),
            reserved_amount,
            support: support.map(|l| l.price),
            support_volume: support.map(|l| l.quantity),
            support_index: support.map(|l| l.rank),
            buy_price: None,
            quantity: Some(quantity),
            cost: None,
            buy_fee: None,
            max_price: None,
            stop_loss_price: None,
            sale_order_id: None,
            sale_price: None,
            sale_fee: None,
            sailed_quantity: None,
            closed_at: None,
            duration_secs: None,
            profit: None,
        }
    }

    fn require<T: Clone>(&self, value: &Option<T>, field: &'static str) -> Result<T, LifecycleError> {
        value.clone().ok_or_else(|| LifecycleError::MissingField {
            order_id: self.id.clone(),
            field,
        })
    }

    fn expect_state(&self, state: OrderState, action: &'static str) -> Result<(), LifecycleError> {
        if self.status != state {
            return Err(LifecycleError::InvalidTransition {
                order_id: self.id.clone(),
                state: self.status,
                action,
            });
        }
        Ok(())
    }

    /// Matches either the buy id or the sale id.
    pub fn matches(&self, exchange_order_id: &str) -> bool {
        self.id == exchange_order_id || self.sale_order_id.as_deref() == Some(exchange_order_id)
    }

    pub fn is_closed(&self) -> bool {
        self.status == OrderState::Closed
    }

    /// Price used by the entry gap guard: the fill price, or the detected
    /// price while the buy is still working.
    pub fn reference_price(&self) -> Option<Decimal> {
        self.buy_price.or(self.detected_price)
    }

    /// Quantity of the filled position.
    pub fn held_quantity(&self) -> Result<Decimal, LifecycleError> {
        self.require(&self.quantity, "quantity")
    }

    /// Apply a BUY fill with a commission charged on top of the quote spent.
    /// Returns the cost to debit from capital.
    pub fn confirm_buy(
        &mut self,
        fill: &FillReport,
        fee: Decimal,
        stop_loss_pct: Decimal,
    ) -> Result<Decimal, LifecycleError> {
        self.confirm_buy_with(fill, BuyFee::Quote(fee), stop_loss_pct)
    }

    /// Apply a BUY fill. Returns the cost to debit from capital.
    ///
    /// A base-asset commission is already out of the bought quantity, so the
    /// cost is the quote spent and `buy_fee` only records its value.
    pub fn confirm_buy_with(
        &mut self,
        fill: &FillReport,
        fee: BuyFee,
        stop_loss_pct: Decimal,
    ) -> Result<Decimal, LifecycleError> {
        self.expect_state(OrderState::BuyInProgress, "confirm buy")?;
        if fill.cumulative_qty <= Decimal::ZERO {
            return Err(LifecycleError::EmptyFill {
                order_id: self.id.clone(),
            });
        }

        let buy_price = fill.average_price();
        let (quantity, cost, buy_fee) = match fee {
            BuyFee::Quote(fee) => (fill.cumulative_qty, fill.cumulative_quote_qty + fee, fee),
            BuyFee::Base { quantity, value } => {
                (fill.cumulative_qty - quantity, fill.cumulative_quote_qty, value)
            }
        };
        if quantity <= Decimal::ZERO {
            return Err(LifecycleError::EmptyFill {
                order_id: self.id.clone(),
            });
        }

        self.buy_price = Some(buy_price);
        self.quantity = Some(quantity);
        self.cost = Some(cost);
        self.buy_fee = Some(buy_fee);
        self.max_price = Some(buy_price);
        self.stop_loss_price = Some(buy_price * (Decimal::ONE - stop_loss_pct));
        self.secured = false;
        self.reserved_amount = Decimal::ZERO;
        self.status = OrderState::Open;
        Ok(cost)
    }

    /// Unrealized profit if sold at `price`, net of the projected sale fee
    /// and the fee-pool share.
    pub fn potential_profit(
        &self,
        price: Decimal,
        fee_rate: Decimal,
        fee_share: Decimal,
    ) -> Result<Decimal, LifecycleError> {
        let quantity = self.require(&self.quantity, "quantity")?;
        let cost = self.require(&self.cost, "cost")?;
        let proceeds = price * quantity;
        Ok(proceeds - cost - proceeds * fee_rate - fee_share)
    }

    /// Trailing stop evaluation for one price tick. Only `open` orders trail.
    pub fn trail(&mut self, price: Decimal, params: &TrailParams) -> Result<TrailAction, LifecycleError> {
        if self.status != OrderState::Open {
            return Ok(TrailAction::Hold);
        }

        let mut max_price = self.require(&self.max_price, "max_price")?;
        let mut stop = self.require(&self.stop_loss_price, "stop_loss_price")?;
        let mut action = TrailAction::Hold;

        if price > max_price {
            if self.secured {
                stop = (price - max_price) * params.smoothing + max_price;
            }
            max_price = price;
            action = TrailAction::Raised;
        }

        if !self.secured {
            let quantity = self.require(&self.quantity, "quantity")?;
            let buy_fee = self.require(&self.buy_fee, "buy_fee")?;
            let potential = self.potential_profit(price, params.fee_rate, params.fee_share)?;
            let total_fees = buy_fee + price * quantity * params.fee_rate + params.fee_share;

            if potential >= total_fees {
                self.secured = true;
                self.max_price = Some(max_price);
                self.stop_loss_price = Some(max_price);
                // The stop is not checked on the securing tick, otherwise a
                // tick at the new high would sell immediately.
                return Ok(TrailAction::Secured);
            }
        }

        self.max_price = Some(max_price);
        self.stop_loss_price = Some(stop);

        if price <= stop {
            return Ok(TrailAction::StopHit);
        }
        Ok(action)
    }

    /// Record the working sale order.
    pub fn begin_sale(&mut self, sale_order_id: impl Into<String>) -> Result<(), LifecycleError> {
        self.expect_state(OrderState::Open, "begin sale")?;
        self.sale_order_id = Some(sale_order_id.into());
        self.status = OrderState::SaleInProgress;
        Ok(())
    }

    /// The sale was cancelled or rejected; the position is open again.
    pub fn revert_sale(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(OrderState::SaleInProgress, "revert sale")?;
        self.sale_order_id = None;
        self.status = OrderState::Open;
        Ok(())
    }

    /// Apply a SELL fill. Returns the amount to credit to capital.
    pub fn confirm_sale(
        &mut self,
        fill: &FillReport,
        sale_fee: Decimal,
        fees_to_cover: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LifecycleError> {
        self.expect_state(OrderState::SaleInProgress, "confirm sale")?;
        if fill.cumulative_qty <= Decimal::ZERO {
            return Err(LifecycleError::EmptyFill {
                order_id: self.id.clone(),
            });
        }
        let cost = self.require(&self.cost, "cost")?;

        let proceeds = fill.cumulative_quote_qty;
        self.sale_price = Some(fill.average_price());
        self.sale_fee = Some(sale_fee);
        self.sailed_quantity = Some(fill.cumulative_qty);
        self.closed_at = Some(now);
        self.duration_secs = Some((now - self.opened_at).num_seconds());
        self.profit = Some(proceeds - cost - sale_fee - fees_to_cover);
        self.status = OrderState::Closed;
        Ok(proceeds - sale_fee)
    }

    /// The sale ended after filling part of the position. The filled share
    /// becomes a closed trade carrying its share of cost and fees; `self`
    /// keeps the rest and is open again.
    ///
    /// Returns the closed trade and the amount to credit to capital.
    pub fn close_filled_share(
        &mut self,
        fill: &FillReport,
        sale_fee: Decimal,
        fees_to_cover: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Order, Decimal), LifecycleError> {
        self.expect_state(OrderState::SaleInProgress, "close filled share")?;
        let held = self.require(&self.quantity, "quantity")?;
        let cost = self.require(&self.cost, "cost")?;
        let buy_fee = self.require(&self.buy_fee, "buy_fee")?;
        let filled = fill.cumulative_qty;
        if filled <= Decimal::ZERO || filled >= held {
            return Err(LifecycleError::PartialOverfill {
                order_id: self.id.clone(),
                filled,
                held,
            });
        }

        let share = filled / held;
        let filled_cost = cost * share;
        let filled_buy_fee = buy_fee * share;

        let mut closed = self.clone();
        closed.quantity = Some(filled);
        closed.cost = Some(filled_cost);
        closed.buy_fee = Some(filled_buy_fee);
        let proceeds = closed.confirm_sale(fill, sale_fee, fees_to_cover * share, now)?;

        self.quantity = Some(held - filled);
        self.cost = Some(cost - filled_cost);
        self.buy_fee = Some(buy_fee - filled_buy_fee);
        self.revert_sale()?;
        Ok((closed, proceeds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, OrderStatus};
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, quote: Decimal, qty: Decimal) -> FillReport {
        FillReport {
            order_id: "1".into(),
            side,
            status: OrderStatus::Filled,
            cumulative_quote_qty: quote,
            cumulative_qty: qty,
            commission: Decimal::ZERO,
            commission_asset: None,
            last_price: Decimal::ZERO,
        }
    }

    fn params() -> TrailParams {
        TrailParams {
            fee_rate: dec!(0.001),
            fee_share: Decimal::ZERO,
            smoothing: dec!(0.5),
        }
    }

    fn open_order(buy_quote: Decimal, qty: Decimal, fee: Decimal) -> Order {
        let mut order = Order::pending_buy("1", buy_quote / qty, qty, buy_quote, None);
        order
            .confirm_buy(&fill(OrderSide::Buy, buy_quote, qty), fee, dec!(0.05))
            .unwrap();
        order
    }

    #[test]
    fn test_confirm_buy_initializes_position() {
        let mut order = Order::pending_buy("1", dec!(100), dec!(2), dec!(200), None);
        let cost = order
            .confirm_buy(&fill(OrderSide::Buy, dec!(200), dec!(2)), dec!(0.2), dec!(0.05))
            .unwrap();

        assert_eq!(cost, dec!(200.2));
        assert_eq!(order.status, OrderState::Open);
        assert_eq!(order.buy_price, Some(dec!(100)));
        assert_eq!(order.max_price, Some(dec!(100)));
        assert_eq!(order.stop_loss_price, Some(dec!(95)));
        assert!(!order.secured);
        assert_eq!(order.reserved_amount, Decimal::ZERO);
    }

    #[test]
    fn test_secured_trailing_stop_follows_half_the_gain() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.secured = true;
        order.max_price = Some(dec!(110));
        order.stop_loss_price = Some(dec!(100));

        assert_eq!(order.trail(dec!(120), &params()).unwrap(), TrailAction::Raised);
        assert_eq!(order.max_price, Some(dec!(120)));
        assert_eq!(order.stop_loss_price, Some(dec!(115)));
    }

    #[test]
    fn test_unsecured_stop_does_not_move() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        assert_eq!(order.trail(dec!(100.1), &params()).unwrap(), TrailAction::Raised);
        assert_eq!(order.max_price, Some(dec!(100.1)));
        assert_eq!(order.stop_loss_price, Some(dec!(95)));
    }

    #[test]
    fn test_secured_when_profit_covers_fees() {
        // buy fee 1, projected sale fee 100 * 1 * 0.01 = 1, potential = 100 - 97 - 1 = 2
        let mut order = open_order(dec!(96), dec!(1), dec!(1));
        let params = TrailParams {
            fee_rate: dec!(0.01),
            ..params()
        };

        assert_eq!(order.potential_profit(dec!(100), dec!(0.01), Decimal::ZERO).unwrap(), dec!(2));
        assert_eq!(order.trail(dec!(100), &params).unwrap(), TrailAction::Secured);
        assert!(order.secured);
        assert_eq!(order.stop_loss_price, order.max_price);
        assert_eq!(order.max_price, Some(dec!(100)));

        // Next tick at the same price hits the pinned stop.
        assert_eq!(order.trail(dec!(100), &params).unwrap(), TrailAction::StopHit);
    }

    #[test]
    fn test_stop_loss_hit_below_stop() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        assert_eq!(order.trail(dec!(96), &params()).unwrap(), TrailAction::Hold);
        assert_eq!(order.trail(dec!(95), &params()).unwrap(), TrailAction::StopHit);
    }

    #[test]
    fn test_sale_closes_with_profit() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.begin_sale("2").unwrap();
        assert!(order.matches("2"));
        assert_eq!(order.trail(dec!(50), &params()).unwrap(), TrailAction::Hold);

        let credited = order
            .confirm_sale(&fill(OrderSide::Sell, dec!(110), dec!(1)), dec!(0.11), dec!(0.01), Utc::now())
            .unwrap();

        assert_eq!(credited, dec!(109.89));
        assert_eq!(order.profit, Some(dec!(9.78)));
        assert_eq!(order.sale_price, Some(dec!(110)));
        assert!(order.is_closed());
        assert!(order.duration_secs.unwrap() >= 0);
    }

    #[test]
    fn test_closed_requires_open_and_is_final() {
        let mut order = Order::pending_buy("1", dec!(100), dec!(1), dec!(100), None);
        assert!(matches!(
            order.begin_sale("2"),
            Err(LifecycleError::InvalidTransition { .. })
        ));

        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.begin_sale("2").unwrap();
        order
            .confirm_sale(&fill(OrderSide::Sell, dec!(90), dec!(1)), dec!(0.09), Decimal::ZERO, Utc::now())
            .unwrap();
        let closed = order.clone();

        assert!(order.begin_sale("3").is_err());
        assert!(order.revert_sale().is_err());
        assert!(order
            .confirm_buy(&fill(OrderSide::Buy, dec!(10), dec!(1)), Decimal::ZERO, dec!(0.05))
            .is_err());
        assert_eq!(order.trail(dec!(200), &params()).unwrap(), TrailAction::Hold);
        assert_eq!(order, closed);
    }

    #[test]
    fn test_missing_field_is_an_error_not_a_panic() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.max_price = None;
        assert!(matches!(
            order.trail(dec!(101), &params()),
            Err(LifecycleError::MissingField { field: "max_price", .. })
        ));
    }

    #[test]
    fn test_empty_fill_rejected() {
        let mut order = Order::pending_buy("1", dec!(100), dec!(1), dec!(100), None);
        assert!(matches!(
            order.confirm_buy(&fill(OrderSide::Buy, Decimal::ZERO, Decimal::ZERO), Decimal::ZERO, dec!(0.05)),
            Err(LifecycleError::EmptyFill { .. })
        ));
        assert_eq!(order.status, OrderState::BuyInProgress);
    }

    #[test]
    fn test_base_commission_reduces_quantity_not_cost() {
        let mut order = Order::pending_buy("1", dec!(100), dec!(1), dec!(100), None);
        let cost = order
            .confirm_buy_with(
                &fill(OrderSide::Buy, dec!(100), dec!(1)),
                BuyFee::Base {
                    quantity: dec!(0.001),
                    value: dec!(0.1),
                },
                dec!(0.05),
            )
            .unwrap();

        assert_eq!(cost, dec!(100));
        assert_eq!(order.cost, Some(dec!(100)));
        assert_eq!(order.quantity, Some(dec!(0.999)));
        assert_eq!(order.buy_fee, Some(dec!(0.1)));
        assert_eq!(order.buy_price, Some(dec!(100)));
    }

    #[test]
    fn test_partial_sale_splits_off_a_closed_trade() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.begin_sale("2").unwrap();

        let (closed, credited) = order
            .close_filled_share(
                &fill(OrderSide::Sell, dec!(45), dec!(0.5)),
                dec!(0.045),
                dec!(0.02),
                Utc::now(),
            )
            .unwrap();

        assert!(closed.is_closed());
        assert_eq!(closed.sailed_quantity, Some(dec!(0.5)));
        assert_eq!(closed.cost, Some(dec!(50.05)));
        assert_eq!(closed.sale_order_id.as_deref(), Some("2"));
        assert_eq!(closed.profit, Some(dec!(45) - dec!(50.05) - dec!(0.045) - dec!(0.01)));
        assert_eq!(credited, dec!(44.955));

        assert_eq!(order.status, OrderState::Open);
        assert!(order.sale_order_id.is_none());
        assert_eq!(order.quantity, Some(dec!(0.5)));
        assert_eq!(order.cost, Some(dec!(50.05)));
        assert_eq!(order.buy_fee, Some(dec!(0.05)));
    }

    #[test]
    fn test_partial_sale_rejects_full_or_empty_fills() {
        let mut order = open_order(dec!(100), dec!(1), dec!(0.1));
        order.begin_sale("2").unwrap();
        for qty in [Decimal::ZERO, dec!(1)] {
            assert!(matches!(
                order.close_filled_share(&fill(OrderSide::Sell, dec!(90), qty), Decimal::ZERO, Decimal::ZERO, Utc::now()),
                Err(LifecycleError::PartialOverfill { .. })
            ));
        }
        assert_eq!(order.status, OrderState::SaleInProgress);
        assert_eq!(order.quantity, Some(dec!(1)));
    }
}
