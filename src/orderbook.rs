use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::orders::{Order, OrderKind, Side};

/// An [`OrderBook`] indexes the **resting** limit orders of one trading pair
/// in two separate [`BTreeMap`]s:
/// - `bids` (buy orders)
/// - `asks` (sell orders)
///
/// Each price level (key) has a FIFO queue of order ids stored in a
/// [`VecDeque`] to maintain **price-time** priority. The orders themselves
/// live in the store; the book only holds their ids.
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Buy order ids, keyed by price in ascending order.
    ///
    /// Iterate **in reverse** to see the highest bid first.
    pub bids: BTreeMap<Decimal, VecDeque<String>>,

    /// Sell order ids, keyed by price in ascending order.
    ///
    /// Iterate **forwards** to see the lowest ask first.
    pub asks: BTreeMap<Decimal, VecDeque<String>>,
}

/// Unifies forward (`Iter`) and reverse (`Rev<Iter>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] walks asks, lowest price first.
/// - [`EitherIter::Rev`] walks bids, highest price first.
pub enum EitherIter<'a> {
    Fwd(std::collections::btree_map::Iter<'a, Decimal, VecDeque<String>>),
    Rev(std::iter::Rev<std::collections::btree_map::Iter<'a, Decimal, VecDeque<String>>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a Decimal, &'a VecDeque<String>);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

impl OrderBook {
    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, VecDeque<String>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Rests a **limit** order at the back of its price level.
    ///
    /// Market orders have no price and never rest; they are ignored.
    pub fn add_order(&mut self, order: &Order) {
        match (order.kind, order.price) {
            (OrderKind::Limit, Some(price)) => {
                self.side_mut(order.side)
                    .entry(price)
                    .or_default()
                    .push_back(order.id.clone());
            }
            _ => debug!(order_id = %order.id, "not resting an unpriced order"),
        }
    }

    /// Removes an order from its level, pruning the level when it empties.
    /// Returns `false` if the order was not resting.
    pub fn remove_order(&mut self, side: Side, price: Decimal, order_id: &str) -> bool {
        let book_side = self.side_mut(side);
        let Some(queue) = book_side.get_mut(&price) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|id| id == order_id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            book_side.remove(&price);
        }
        true
    }

    /// Price levels of one side in priority order: bids highest first, asks lowest first.
    pub fn levels(&self, side: Side) -> EitherIter<'_> {
        match side {
            Side::Buy => EitherIter::Rev(self.bids.iter().rev()),
            Side::Sell => EitherIter::Fwd(self.asks.iter()),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
