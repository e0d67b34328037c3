use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::{Asset, Pair};

/// Represents which side of the market the order is on.
///
/// # Intuition
/// - `Buy` (Bid): The trader wants to purchase the base asset and pays in quote.
///   Bids rank from **highest to lowest price** because a higher price is more aggressive.
/// - `Sell` (Ask): The trader gives up the base asset for quote.
///   Asks rank from **lowest to highest price**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

/// Specifies whether an order is a Limit or Market order.
///
/// - `Limit`: carries a client price and rests in the book at that level
/// - `Market`: carries no limit price and never appears in book levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Active orders still hold a balance lock and may be filled or cancelled.
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::Partial)
    }
}

/// An order submitted by a trader.
///
/// - `price` is only present for limit orders
/// - `reference_price` sizes the quote lock of a market buy
/// - `locked` is what this order still holds in the owner's wallet, in [`Order::locked_asset`]
/// - `sequence` breaks ties between equal `created_at` values (FIFO within price level)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub owner: String,
    pub pair: Pair,
    pub side: Side,
    pub kind: OrderKind,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub locked: Decimal,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Buys lock quote, sells lock base.
    pub fn locked_asset(&self) -> &Asset {
        match self.side {
            Side::Buy => &self.pair.quote,
            Side::Sell => &self.pair.base,
        }
    }

    /// Per-unit quote price the order was sized at: the limit price, or the
    /// reference price of a market buy.
    pub fn unit_price(&self) -> Option<Decimal> {
        self.price.or(self.reference_price)
    }

    /// Notional value of the executed part; `None` on overflow.
    pub fn executed_value(&self) -> Option<Decimal> {
        self.unit_price().unwrap_or(Decimal::ZERO).checked_mul(self.filled)
    }

    pub fn filled_percentage(&self) -> Decimal {
        if self.amount.is_zero() {
            return Decimal::ZERO;
        }
        (self.filled / self.amount * Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Status as a pure function of the fill state; cancellation is sticky.
    pub fn derived_status(&self) -> OrderStatus {
        if self.status == OrderStatus::Cancelled {
            OrderStatus::Cancelled
        } else if self.remaining.is_zero() {
            OrderStatus::Filled
        } else if self.filled.is_zero() {
            OrderStatus::Open
        } else {
            OrderStatus::Partial
        }
    }

    /// Returns a description of the first broken invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        if self.filled + self.remaining != self.amount {
            return Some(format!(
                "order {}: filled {} + remaining {} != amount {}",
                self.id, self.filled, self.remaining, self.amount
            ));
        }
        if self.filled.is_sign_negative() || self.remaining.is_sign_negative() {
            return Some(format!("order {}: negative fill state", self.id));
        }
        if self.locked.is_sign_negative() {
            return Some(format!("order {}: negative lock {}", self.id, self.locked));
        }
        if self.status != self.derived_status() {
            return Some(format!(
                "order {}: status {:?} does not match fill state",
                self.id, self.status
            ));
        }
        if !self.is_active() && !self.locked.is_zero() {
            return Some(format!(
                "order {}: inactive order still locks {}",
                self.id, self.locked
            ));
        }
        None
    }
}

/// A placement request as received from a caller. Nothing here is trusted
/// until the engine validates it.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub pair: String,
    pub side: Side,
    #[serde(alias = "type")]
    pub kind: OrderKind,
    pub amount: Decimal,
    pub price: Option<Decimal>,
}

/// Filters for listing an owner's orders.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub pair: Option<String>,
    pub limit: Option<usize>,
    /// Opaque cursor returned as `next` by the previous page.
    pub after: Option<String>,
}

impl OrderFilter {
    pub const DEFAULT_LIMIT: usize = 50;
}
