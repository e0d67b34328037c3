use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use std::collections::{BTreeMap, HashMap};

use crate::{
    errors::{EngineError, EngineResult},
    instrument::Pair,
    orderbook::OrderBook,
    orders::Order,
    trade::Trade,
    transaction::Transaction,
    wallet::Wallet,
};

//Cursor (opaque to clients)
#[derive(serde::Serialize, serde::Deserialize)]
struct Cursor {
    seq: u64,
}

/// Encodes the position after which the next page starts.
pub fn encode_cursor(seq: u64) -> String {
    // serializing a single integer field cannot fail
    let raw = serde_json::to_vec(&Cursor { seq }).unwrap_or_default();
    B64.encode(raw)
}

pub fn decode_cursor(s: &str) -> EngineResult<u64> {
    let bad = || EngineError::Validation("invalid cursor".into());
    let bytes = B64.decode(s).map_err(|_| bad())?;
    let c: Cursor = serde_json::from_slice(&bytes).map_err(|_| bad())?;
    Ok(c.seq)
}

/// In-memory repository for orders, wallets and funding transactions.
///
/// One instance per process; tests build a fresh one each. Orders are
/// indexed three ways: by id, by owner (placement order) and by pair, and
/// resting limit orders are additionally queued in the pair's [`OrderBook`].
#[derive(Debug, Default)]
pub struct Store {
    sequence: u64,
    orders: HashMap<String, Order>,
    orders_by_owner: HashMap<String, BTreeMap<u64, String>>,
    orders_by_pair: HashMap<Pair, BTreeMap<u64, String>>,
    books: HashMap<Pair, OrderBook>,
    wallets: HashMap<String, Wallet>,
    transactions: HashMap<String, Transaction>,
    transactions_by_owner: HashMap<String, BTreeMap<u64, String>>,
    trades: HashMap<Pair, BTreeMap<u64, Trade>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic insertion counter shared by orders and transactions.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn insert_order(&mut self, order: Order) {
        self.orders_by_owner
            .entry(order.owner.clone())
            .or_default()
            .insert(order.sequence, order.id.clone());
        self.orders_by_pair
            .entry(order.pair.clone())
            .or_default()
            .insert(order.sequence, order.id.clone());
        if order.is_active() {
            self.books
                .entry(order.pair.clone())
                .or_default()
                .add_order(&order);
        }
        self.orders.insert(order.id.clone(), order);
    }

    /// Replaces a stored order; orders that are no longer active leave the book.
    pub fn update_order(&mut self, order: Order) {
        if !order.is_active() {
            if let (Some(price), Some(book)) = (order.price, self.books.get_mut(&order.pair)) {
                book.remove_order(order.side, price, &order.id);
            }
        }
        self.orders.insert(order.id.clone(), order);
    }

    /// The owner's orders in placement order, strictly after `after_seq`.
    pub fn orders_for_owner<'a>(
        &'a self,
        owner: &str,
        after_seq: Option<u64>,
    ) -> impl Iterator<Item = &'a Order> + use<'a> {
        let start = after_seq.map_or(0, |s| s.saturating_add(1));
        self.orders_by_owner
            .get(owner)
            .into_iter()
            .flat_map(move |ids| ids.range(start..))
            .filter_map(move |(_, id)| self.orders.get(id))
    }

    pub fn orders_for_pair<'a>(&'a self, pair: &Pair) -> impl Iterator<Item = &'a Order> + use<'a> {
        self.orders_by_pair
            .get(pair)
            .into_iter()
            .flat_map(|ids| ids.values())
            .filter_map(move |id| self.orders.get(id))
    }

    pub fn book(&self, pair: &Pair) -> Option<&OrderBook> {
        self.books.get(pair)
    }

    pub fn wallet(&self, owner: &str) -> Option<&Wallet> {
        self.wallets.get(owner)
    }

    /// Creates an empty wallet on first use.
    pub fn wallet_mut(&mut self, owner: &str) -> &mut Wallet {
        self.wallets
            .entry(owner.to_string())
            .or_insert_with(|| Wallet::new(owner))
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn insert_transaction(&mut self, tx: Transaction) {
        self.transactions_by_owner
            .entry(tx.owner.clone())
            .or_default()
            .insert(tx.sequence, tx.id.clone());
        self.transactions.insert(tx.id.clone(), tx);
    }

    pub fn update_transaction(&mut self, tx: Transaction) {
        self.transactions.insert(tx.id.clone(), tx);
    }

    pub fn insert_trade(&mut self, trade: Trade) {
        self.trades
            .entry(trade.pair.clone())
            .or_default()
            .insert(trade.sequence, trade);
    }

    /// Trades of one pair, newest first.
    pub fn trades_for_pair<'a>(&'a self, pair: &Pair) -> impl Iterator<Item = &'a Trade> + use<'a> {
        self.trades
            .get(pair)
            .into_iter()
            .flat_map(|trades| trades.values().rev())
    }

    pub fn transactions_for_owner<'a>(
        &'a self,
        owner: &str,
    ) -> impl Iterator<Item = &'a Transaction> + use<'a> {
        self.transactions_by_owner
            .get(owner)
            .into_iter()
            .flat_map(|ids| ids.values())
            .filter_map(move |id| self.transactions.get(id))
    }
}
