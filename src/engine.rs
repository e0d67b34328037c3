//! Order lifecycle and balance-locking bookkeeping.
//!
//! [`OrderBookEngine`] owns a [`Store`] and is the only thing that mutates it.
//! Every operation either applies completely or returns an error with the
//! store untouched. There is no matching: bids are never crossed against
//! asks, and fills arrive from an operator through [`OrderBookEngine::fill_order`].
//!
//! ## Locking rule
//! - buy: the quote asset is locked, `amount × unit price`
//! - sell: the base asset is locked, `amount`
//!
//! The unit price of a limit buy is its limit price. A market buy uses the
//! caller's reference price, else the best resting ask, else it is rejected.
//!
//! ## Bounds
//! Amounts are capped at [`MAX_AMOUNT`] and prices at [`MAX_PRICE`] on intake,
//! so a single notional always fits in a `Decimal`. Credits that would push a
//! balance past the `Decimal` range are rejected before anything changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    errors::{EngineError, EngineResult},
    instrument::{Asset, Pair},
    orders::{NewOrder, Order, OrderFilter, OrderKind, OrderStatus, Side},
    store::{Store, decode_cursor, encode_cursor},
    trade::Trade,
    transaction::{
        NewDeposit, NewWithdrawal, Transaction, TxFilter, TxKind, TxStatus, TxStatusUpdate,
    },
    wallet::{Balance, Wallet},
};

pub const DEFAULT_DEPTH: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_TRADES_LIMIT: usize = 50;
/// Largest order, deposit or withdrawal amount accepted (10^15).
pub const MAX_AMOUNT: u64 = 1_000_000_000_000_000;
/// Largest limit, reference or execution price accepted (10^12).
pub const MAX_PRICE: u64 = 1_000_000_000_000;
const MIN_ADDRESS_LEN: usize = 10;

/// One aggregated price level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    /// Summed remaining amount of every order resting at this price.
    pub amount: Decimal,
    pub total: Decimal,
    pub orders: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub pair: Pair,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingStats {
    pub pair: Pair,
    pub total_orders: usize,
    pub open_orders: usize,
    pub partial_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub total_volume: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    /// Cursor for the next page; absent when this page was not full.
    pub next: Option<String>,
}

pub struct OrderBookEngine {
    store: Store,
}

impl OrderBookEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validates, locks the required balance and records a new `open` order.
    pub fn place_order(&mut self, owner: &str, req: NewOrder) -> EngineResult<Order> {
        let pair: Pair = req.pair.parse()?;
        ensure_amount(req.amount)?;
        match (req.kind, req.price) {
            (OrderKind::Limit, None) => {
                return Err(EngineError::Validation(
                    "price is required for limit orders".into(),
                ));
            }
            (_, Some(p)) => ensure_price(p)?,
            _ => {}
        }

        let (price, reference_price) = match req.kind {
            OrderKind::Limit => (req.price, None),
            OrderKind::Market => (
                None,
                req.price
                    .or_else(|| self.implied_reference(&pair, req.side)),
            ),
        };

        let (asset, required) = match req.side {
            Side::Buy => {
                let unit = price.or(reference_price).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "market buy on {} needs a reference price: no asks are resting",
                        pair
                    ))
                })?;
                (pair.quote.clone(), checked_notional(req.amount, unit)?)
            }
            Side::Sell => (pair.base.clone(), req.amount),
        };

        let available = self.available(owner, &asset);
        if available < required {
            info!(%owner, %pair, %asset, %required, %available, "order rejected: insufficient balance");
            return Err(EngineError::InsufficientBalance {
                asset,
                required,
                available,
            });
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            pair,
            side: req.side,
            kind: req.kind,
            amount: req.amount,
            price,
            reference_price,
            status: OrderStatus::Open,
            filled: Decimal::ZERO,
            remaining: req.amount,
            locked: required,
            sequence: self.store.next_sequence(),
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
        };

        // checked above under the same exclusive borrow, so this cannot fail
        if let Err(e) = self.store.wallet_mut(owner).lock(&asset, required) {
            invariant_broken(&format!("lock after balance check failed: {}", e));
        }
        self.store.insert_order(order.clone());
        self.check_invariants(&order);

        info!(
            order_id = %order.id,
            %owner,
            pair = %order.pair,
            side = ?order.side,
            kind = ?order.kind,
            amount = %order.amount,
            locked = %required,
            "order placed"
        );
        Ok(order)
    }

    /// Cancels an active order and returns its remaining lock to `available`.
    pub fn cancel_order(&mut self, order_id: &str, owner: &str) -> EngineResult<Order> {
        let mut order = self.owned_order(order_id, owner)?.clone();
        if !order.is_active() {
            return Err(EngineError::InvalidState(format!(
                "cannot cancel order {} with status {:?}",
                order_id, order.status
            )));
        }

        let asset = order.locked_asset().clone();
        if let Err(e) = self.store.wallet_mut(owner).unlock(&asset, order.locked) {
            invariant_broken(&format!("unlock of order {} failed: {}", order_id, e));
        }

        let now = Utc::now();
        let released = order.locked;
        order.locked = Decimal::ZERO;
        order.status = OrderStatus::Cancelled;
        order.cancelled_at = Some(now);
        order.updated_at = now;
        self.store.update_order(order.clone());
        self.check_invariants(&order);

        info!(order_id, %owner, %asset, %released, "order cancelled");
        Ok(order)
    }

    /// Records an execution of `filled_amount` against an active order and
    /// settles the owner's side of it.
    ///
    /// `execution_price` defaults to the order's unit price. A buy pays
    /// `amount × execution price` out of its lock and gets any price
    /// improvement back; a sell gives up base and is credited quote.
    pub fn fill_order(
        &mut self,
        order_id: &str,
        filled_amount: Decimal,
        execution_price: Option<Decimal>,
    ) -> EngineResult<Order> {
        let mut order = self
            .store
            .order(order_id)
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?
            .clone();
        if !order.is_active() {
            return Err(EngineError::InvalidState(format!(
                "cannot fill order {} with status {:?}",
                order_id, order.status
            )));
        }
        if filled_amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "fill amount must be positive, got {}",
                filled_amount
            )));
        }
        if filled_amount > order.remaining {
            return Err(EngineError::Validation(format!(
                "fill of {} exceeds remaining {}",
                filled_amount, order.remaining
            )));
        }
        let exec = execution_price.or(order.unit_price()).ok_or_else(|| {
            EngineError::Validation(format!(
                "order {} has no price; an execution price is required",
                order_id
            ))
        })?;
        ensure_price(exec)?;
        match (order.side, order.unit_price()) {
            (Side::Buy, Some(limit)) if exec > limit => {
                return Err(EngineError::Validation(format!(
                    "execution price {} is above the buy price {}",
                    exec, limit
                )));
            }
            (Side::Sell, _) if order.price.is_some_and(|limit| exec < limit) => {
                return Err(EngineError::Validation(format!(
                    "execution price {} is below the sell limit {:?}",
                    exec, order.price
                )));
            }
            _ => {}
        }

        let final_fill = filled_amount == order.remaining;
        let (nominal, spent, proceeds, received) = match order.side {
            Side::Buy => {
                // unit price is always present for buys
                let unit = order.unit_price().unwrap_or(exec);
                (
                    checked_notional(filled_amount, unit)?,
                    checked_notional(filled_amount, exec)?,
                    filled_amount,
                    order.pair.base.clone(),
                )
            }
            Side::Sell => (
                filled_amount,
                filled_amount,
                checked_notional(filled_amount, exec)?,
                order.pair.quote.clone(),
            ),
        };
        // the final fill also returns any rounding dust left in the lock
        let release = if final_fill {
            order.locked
        } else {
            nominal.min(order.locked)
        };
        let spent = spent.min(release);
        let value = checked_notional(filled_amount, exec)?;
        // the refund only moves funds already counted in the total
        self.ensure_creditable(&order.owner, &received, proceeds)?;

        let asset = order.locked_asset().clone();
        let wallet = self.store.wallet_mut(&order.owner);
        let settled = wallet
            .debit_locked(&asset, release)
            .and_then(|_| wallet.credit(&asset, release - spent))
            .and_then(|_| wallet.credit(&received, proceeds));
        if let Err(e) = settled {
            invariant_broken(&format!("settlement of order {} failed: {}", order_id, e));
        }

        let now = Utc::now();
        order.filled += filled_amount;
        order.remaining -= filled_amount;
        order.locked -= release;
        order.status = order.derived_status();
        if order.status == OrderStatus::Filled {
            order.filled_at = Some(now);
        }
        order.updated_at = now;
        self.store.update_order(order.clone());
        self.check_invariants(&order);

        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side: order.side,
            amount: filled_amount,
            price: exec,
            value,
            sequence: self.store.next_sequence(),
            timestamp: now,
        };
        self.store.insert_trade(trade);

        info!(
            order_id,
            filled = %filled_amount,
            price = %exec,
            status = ?order.status,
            "order filled"
        );
        Ok(order)
    }

    /// Aggregated price levels, best first, each side truncated to `depth` levels.
    pub fn get_order_book(&self, pair: &str, depth: usize) -> EngineResult<BookSnapshot> {
        let pair: Pair = pair.parse()?;
        let snapshot = BookSnapshot {
            bids: self.levels(&pair, Side::Buy, depth)?,
            asks: self.levels(&pair, Side::Sell, depth)?,
            timestamp: Utc::now(),
            pair,
        };
        debug!(pair = %snapshot.pair, bids = snapshot.bids.len(), asks = snapshot.asks.len(), "book snapshot");
        Ok(snapshot)
    }

    fn levels(&self, pair: &Pair, side: Side, depth: usize) -> EngineResult<Vec<BookLevel>> {
        let Some(book) = self.store.book(pair) else {
            return Ok(Vec::new());
        };
        book.levels(side)
            .take(depth)
            .map(|(price, ids)| {
                let overflow =
                    || EngineError::InvalidState(format!("{} level {} overflows", pair, price));
                let amount = ids
                    .iter()
                    .filter_map(|id| self.store.order(id))
                    .try_fold(Decimal::ZERO, |sum, o| sum.checked_add(o.remaining))
                    .ok_or_else(overflow)?;
                Ok(BookLevel {
                    price: *price,
                    amount,
                    total: price.checked_mul(amount).ok_or_else(overflow)?,
                    orders: ids.len(),
                })
            })
            .collect()
    }

    /// Individual resting orders of one side in price-time priority.
    pub fn resting_orders(&self, pair: &str, side: Side, depth: usize) -> EngineResult<Vec<Order>> {
        let pair: Pair = pair.parse()?;
        let Some(book) = self.store.book(&pair) else {
            return Ok(Vec::new());
        };
        Ok(book
            .levels(side)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.store.order(id))
            .take(depth)
            .cloned()
            .collect())
    }

    pub fn get_trading_stats(&self, pair: &str) -> EngineResult<TradingStats> {
        let pair: Pair = pair.parse()?;
        let mut stats = TradingStats {
            pair: pair.clone(),
            total_orders: 0,
            open_orders: 0,
            partial_orders: 0,
            filled_orders: 0,
            cancelled_orders: 0,
            total_volume: Decimal::ZERO,
        };
        for order in self.store.orders_for_pair(&pair) {
            stats.total_orders += 1;
            match order.status {
                OrderStatus::Open => stats.open_orders += 1,
                OrderStatus::Partial => stats.partial_orders += 1,
                OrderStatus::Filled => {
                    stats.filled_orders += 1;
                    stats.total_volume = order
                        .executed_value()
                        .and_then(|v| stats.total_volume.checked_add(v))
                        .ok_or_else(|| {
                            EngineError::InvalidState(format!("{} volume overflows", pair))
                        })?;
                }
                OrderStatus::Cancelled => stats.cancelled_orders += 1,
            }
        }
        Ok(stats)
    }

    /// Latest executions on a pair, newest first.
    pub fn recent_trades(&self, pair: &str, limit: Option<usize>) -> EngineResult<Vec<Trade>> {
        let pair: Pair = pair.parse()?;
        Ok(self
            .store
            .trades_for_pair(&pair)
            .take(limit.unwrap_or(DEFAULT_TRADES_LIMIT))
            .cloned()
            .collect())
    }

    pub fn get_order(&self, order_id: &str, owner: &str) -> EngineResult<Order> {
        self.owned_order(order_id, owner).cloned()
    }

    /// The owner's orders in placement order, filtered and paged.
    pub fn user_orders(&self, owner: &str, filter: &OrderFilter) -> EngineResult<OrderPage> {
        let pair = filter.pair.as_deref().map(str::parse::<Pair>).transpose()?;
        let after = filter.after.as_deref().map(decode_cursor).transpose()?;
        let limit = filter.limit.unwrap_or(OrderFilter::DEFAULT_LIMIT);

        let orders: Vec<Order> = self
            .store
            .orders_for_owner(owner, after)
            .filter(|o| filter.status.is_none_or(|s| s == o.status))
            .filter(|o| pair.as_ref().is_none_or(|p| *p == o.pair))
            .take(limit)
            .cloned()
            .collect();
        let next = match orders.last() {
            Some(last) if limit > 0 && orders.len() == limit => Some(encode_cursor(last.sequence)),
            _ => None,
        };
        Ok(OrderPage { orders, next })
    }

    /// The owner's fully filled orders.
    pub fn trading_history(
        &self,
        owner: &str,
        pair: Option<&str>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Order>> {
        let pair = pair.map(str::parse::<Pair>).transpose()?;
        Ok(self
            .store
            .orders_for_owner(owner, None)
            .filter(|o| o.status == OrderStatus::Filled)
            .filter(|o| pair.as_ref().is_none_or(|p| *p == o.pair))
            .take(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .cloned()
            .collect())
    }

    /// An empty wallet is returned for owners that never held anything.
    pub fn wallet(&self, owner: &str) -> Wallet {
        self.store
            .wallet(owner)
            .cloned()
            .unwrap_or_else(|| Wallet::new(owner))
    }

    pub fn balance(&self, owner: &str, asset: &str) -> EngineResult<Balance> {
        let asset: Asset = asset.parse()?;
        Ok(self
            .store
            .wallet(owner)
            .map(|w| w.balance(&asset))
            .unwrap_or_default())
    }

    /// Records a pending deposit. The wallet is credited once it completes.
    pub fn deposit(&mut self, owner: &str, req: NewDeposit) -> EngineResult<Transaction> {
        let asset: Asset = req.asset.parse()?;
        ensure_amount(req.amount)?;
        ensure_present("network", &req.network)?;
        let tx = self.new_transaction(
            owner,
            TxKind::Deposit,
            asset,
            req.amount,
            req.network,
            None,
            req.tx_hash,
        );
        self.store.insert_transaction(tx.clone());
        info!(tx_id = %tx.id, %owner, asset = %tx.asset, amount = %tx.amount, "deposit pending");
        Ok(tx)
    }

    /// Records a pending withdrawal and locks its amount until it resolves.
    pub fn withdraw(&mut self, owner: &str, req: NewWithdrawal) -> EngineResult<Transaction> {
        let asset: Asset = req.asset.parse()?;
        ensure_amount(req.amount)?;
        ensure_present("network", &req.network)?;
        if req.address.trim().len() < MIN_ADDRESS_LEN {
            return Err(EngineError::Validation(format!(
                "address must be at least {} characters",
                MIN_ADDRESS_LEN
            )));
        }
        let available = self.available(owner, &asset);
        if available < req.amount {
            return Err(EngineError::InsufficientBalance {
                asset,
                required: req.amount,
                available,
            });
        }

        let tx = self.new_transaction(
            owner,
            TxKind::Withdraw,
            asset,
            req.amount,
            req.network,
            Some(req.address),
            None,
        );
        if let Err(e) = self.store.wallet_mut(owner).lock(&tx.asset, tx.amount) {
            invariant_broken(&format!("withdrawal lock after balance check failed: {}", e));
        }
        self.store.insert_transaction(tx.clone());
        self.check_wallet(owner);
        info!(tx_id = %tx.id, %owner, asset = %tx.asset, amount = %tx.amount, "withdrawal pending");
        Ok(tx)
    }

    /// Operator transition of a pending transaction to a terminal status.
    pub fn update_transaction_status(
        &mut self,
        tx_id: &str,
        update: TxStatusUpdate,
    ) -> EngineResult<Transaction> {
        let mut tx = self
            .store
            .transaction(tx_id)
            .ok_or_else(|| EngineError::NotFound(format!("transaction {}", tx_id)))?
            .clone();
        if tx.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "transaction {} is already {:?}",
                tx_id, tx.status
            )));
        }
        if update.status == TxStatus::Pending {
            return Err(EngineError::Validation(
                "status must be completed, failed or cancelled".into(),
            ));
        }
        if (tx.kind, update.status) == (TxKind::Deposit, TxStatus::Completed) {
            self.ensure_creditable(&tx.owner, &tx.asset, tx.amount)?;
        }

        let wallet = self.store.wallet_mut(&tx.owner);
        let applied = match (tx.kind, update.status) {
            (TxKind::Deposit, TxStatus::Completed) => wallet.credit(&tx.asset, tx.amount),
            (TxKind::Withdraw, TxStatus::Completed) => wallet.debit_locked(&tx.asset, tx.amount),
            (TxKind::Withdraw, _) => wallet.unlock(&tx.asset, tx.amount),
            (TxKind::Deposit, _) => Ok(()),
        };
        if let Err(e) = applied {
            invariant_broken(&format!("transaction {} settlement failed: {}", tx_id, e));
        }

        tx.status = update.status;
        if let Some(hash) = update.tx_hash {
            tx.tx_hash = hash;
        }
        if let Some(c) = update.confirmations {
            tx.confirmations = c;
        }
        tx.updated_at = Utc::now();
        self.store.update_transaction(tx.clone());
        self.check_wallet(&tx.owner);

        info!(tx_id, kind = ?tx.kind, status = ?tx.status, "transaction resolved");
        Ok(tx)
    }

    pub fn transaction(&self, tx_id: &str, owner: &str) -> EngineResult<Transaction> {
        let tx = self
            .store
            .transaction(tx_id)
            .ok_or_else(|| EngineError::NotFound(format!("transaction {}", tx_id)))?;
        if tx.owner != owner {
            return Err(EngineError::Unauthorized(
                "unauthorized to view this transaction".into(),
            ));
        }
        Ok(tx.clone())
    }

    pub fn transactions(&self, owner: &str, filter: &TxFilter) -> Vec<Transaction> {
        self.store
            .transactions_for_owner(owner)
            .filter(|tx| filter.matches(tx))
            .take(filter.limit.unwrap_or(TxFilter::DEFAULT_LIMIT))
            .cloned()
            .collect()
    }

    fn owned_order(&self, order_id: &str, owner: &str) -> EngineResult<&Order> {
        let order = self
            .store
            .order(order_id)
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
        if order.owner != owner {
            return Err(EngineError::Unauthorized(format!(
                "order {} belongs to another owner",
                order_id
            )));
        }
        Ok(order)
    }

    /// Rejects a credit that the owner's balance could not absorb, before any mutation.
    fn ensure_creditable(&self, owner: &str, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        match self.store.wallet(owner) {
            Some(wallet) => wallet.ensure_can_credit(asset, amount),
            None => Ok(()),
        }
    }

    fn available(&self, owner: &str, asset: &Asset) -> Decimal {
        self.store
            .wallet(owner)
            .map(|w| w.balance(asset).available)
            .unwrap_or_default()
    }

    /// Best-price estimate for a market order: the opposite side's top of book.
    fn implied_reference(&self, pair: &Pair, side: Side) -> Option<Decimal> {
        let book = self.store.book(pair)?;
        match side {
            Side::Buy => book.best_ask(),
            Side::Sell => book.best_bid(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn new_transaction(
        &mut self,
        owner: &str,
        kind: TxKind,
        asset: Asset,
        amount: Decimal,
        network: String,
        address: Option<String>,
        tx_hash: Option<String>,
    ) -> Transaction {
        let id = Uuid::new_v4();
        let prefix = match kind {
            TxKind::Deposit => "dep",
            TxKind::Withdraw => "wit",
        };
        let now = Utc::now();
        Transaction {
            id: id.to_string(),
            owner: owner.to_string(),
            kind,
            asset,
            amount,
            network,
            address,
            tx_hash: tx_hash.unwrap_or_else(|| format!("{}_{}", prefix, id.simple())),
            status: TxStatus::Pending,
            confirmations: 0,
            sequence: self.store.next_sequence(),
            created_at: now,
            updated_at: now,
        }
    }

    fn check_invariants(&self, order: &Order) {
        if let Some(v) = order.invariant_violation() {
            invariant_broken(&v);
        }
        self.check_wallet(&order.owner);
    }

    fn check_wallet(&self, owner: &str) {
        if let Some(v) = self.store.wallet(owner).and_then(Wallet::invariant_violation) {
            invariant_broken(&v);
        }
    }
}

/// A broken invariant is an engine bug, never a caller error.
fn invariant_broken(msg: &str) -> ! {
    error!("engine invariant violated: {}", msg);
    panic!("engine invariant violated: {}", msg);
}

fn checked_notional(amount: Decimal, price: Decimal) -> EngineResult<Decimal> {
    amount
        .checked_mul(price)
        .ok_or_else(|| EngineError::Validation(format!("notional of {} × {} overflows", amount, price)))
}

fn ensure_amount(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount > Decimal::from(MAX_AMOUNT) {
        return Err(EngineError::Validation(format!(
            "amount {} exceeds the maximum of {}",
            amount, MAX_AMOUNT
        )));
    }
    Ok(())
}

fn ensure_price(price: Decimal) -> EngineResult<()> {
    if price <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "price must be positive, got {}",
            price
        )));
    }
    if price > Decimal::from(MAX_PRICE) {
        return Err(EngineError::Validation(format!(
            "price {} exceeds the maximum of {}",
            price, MAX_PRICE
        )));
    }
    Ok(())
}

fn ensure_present(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} is required", field)));
    }
    Ok(())
}
