use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::Asset;

/// Wallet funding movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// A deposit or withdrawal record.
///
/// Created `pending`; an operator moves it to a terminal status. Only a
/// `completed` transition changes the wallet total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub owner: String,
    pub kind: TxKind,
    pub asset: Asset,
    pub amount: Decimal,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub tx_hash: String,
    pub status: TxStatus,
    pub confirmations: u32,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filters for listing an owner's transactions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxFilter {
    pub kind: Option<TxKind>,
    pub status: Option<TxStatus>,
    pub limit: Option<usize>,
}

impl TxFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.kind.is_none_or(|k| k == tx.kind) && self.status.is_none_or(|s| s == tx.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDeposit {
    pub asset: String,
    pub amount: Decimal,
    pub network: String,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWithdrawal {
    pub asset: String,
    pub amount: Decimal,
    pub address: String,
    pub network: String,
}

/// Operator update of a pending transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TxStatusUpdate {
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    pub confirmations: Option<u32>,
}
