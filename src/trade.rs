use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{instrument::Pair, orders::Side};

/// A trade is one execution recorded against a resting order.
///
/// # Behavior
/// - Every operator fill produces exactly one trade, at the fill's execution price.
/// - Partial fills may occur: multiple trades can be generated from one order.
/// - `side` is the side of the filled order; the counterparty is external.
///
/// Example:
/// - A limit buy of 0.01 @ 50000 is filled for 0.004 at 49900.
/// - A trade of 0.004 @ 49900 (value 199.6) is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub order_id: String,
    pub pair: Pair,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
    /// `amount × price` in the quote asset.
    pub value: Decimal,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}
