//! Strategy error types.

use super::order::OrderState;
use crate::exchange::ExchangeError;
use thiserror::Error;

/// Errors raised while driving an order through its lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A field required by the transition is absent.
    #[error("order {order_id}: missing required field `{field}`")]
    MissingField {
        order_id: String,
        field: &'static str,
    },

    #[error("order {order_id}: cannot {action} while {state:?}")]
    InvalidTransition {
        order_id: String,
        state: OrderState,
        action: &'static str,
    },

    /// Fill report with zero executed quantity.
    #[error("order {order_id}: fill report has zero quantity")]
    EmptyFill { order_id: String },

    /// A partial sale report outside `(0, held)`.
    #[error("order {order_id}: partial sale of {filled} against {held} held")]
    PartialOverfill {
        order_id: String,
        filled: rust_decimal::Decimal,
        held: rust_decimal::Decimal,
    },

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}
