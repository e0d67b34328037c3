use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    errors::{EngineError, EngineResult},
    instrument::Asset,
};

/// Balance for a single asset.
///
/// `available` can be spent or locked; `locked` is reserved by open orders
/// and pending withdrawals. Neither side ever goes negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_zero() && self.locked.is_zero()
    }
}

/// Per-owner collection of asset balances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub owner: String,
    pub balances: BTreeMap<Asset, Balance>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            balances: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Zero balance for assets the wallet has never held.
    pub fn balance(&self, asset: &Asset) -> Balance {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    fn entry(&mut self, asset: &Asset) -> &mut Balance {
        self.updated_at = Utc::now();
        self.balances.entry(asset.clone()).or_default()
    }

    /// Checks that crediting `amount` keeps `available + locked` representable.
    /// Nothing is changed.
    pub fn ensure_can_credit(&self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        ensure_non_negative(amount)?;
        let b = self.balance(asset);
        b.available
            .checked_add(b.locked)
            .and_then(|total| total.checked_add(amount))
            .map(|_| ())
            .ok_or_else(|| EngineError::Validation(format!("{} balance would overflow", asset)))
    }

    /// Deposit or settlement proceeds into `available`.
    pub fn credit(&mut self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        self.ensure_can_credit(asset, amount)?;
        // total fits, so available alone does too
        self.entry(asset).available += amount;
        Ok(())
    }

    /// Moves `amount` from available to locked.
    pub fn lock(&mut self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        ensure_non_negative(amount)?;
        let available = self.balance(asset).available;
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                asset: asset.clone(),
                required: amount,
                available,
            });
        }
        let b = self.entry(asset);
        b.available -= amount;
        b.locked += amount;
        Ok(())
    }

    /// Moves `amount` from locked back to available.
    pub fn unlock(&mut self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        let available = self
            .balance(asset)
            .available
            .checked_add(amount)
            .ok_or_else(|| EngineError::InvalidState(format!("{} balance would overflow", asset)))?;
        self.take_locked(asset, amount)?;
        self.entry(asset).available = available;
        Ok(())
    }

    /// Removes `amount` from locked for good (withdrawal or trade settlement).
    pub fn debit_locked(&mut self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        self.take_locked(asset, amount)
    }

    fn take_locked(&mut self, asset: &Asset, amount: Decimal) -> EngineResult<()> {
        ensure_non_negative(amount)?;
        let locked = self.balance(asset).locked;
        if locked < amount {
            return Err(EngineError::InvalidState(format!(
                "cannot release {} {}: only {} locked",
                amount, asset, locked
            )));
        }
        self.entry(asset).locked -= amount;
        Ok(())
    }

    pub fn invariant_violation(&self) -> Option<String> {
        self.balances.iter().find_map(|(asset, b)| {
            (b.available.is_sign_negative() || b.locked.is_sign_negative()).then(|| {
                format!(
                    "wallet {}: negative {} balance (available {}, locked {})",
                    self.owner, asset, b.available, b.locked
                )
            })
        })
    }
}

fn ensure_non_negative(amount: Decimal) -> EngineResult<()> {
    if amount.is_sign_negative() {
        return Err(EngineError::Validation(format!(
            "amount must not be negative, got {}",
            amount
        )));
    }
    Ok(())
}
