//! Ledger capabilities consumed by the corrector.
//!
//! Reads and writes are split into two traits so a caller can hand the
//! corrector a read-only view and a separate mutating client. Token refresh,
//! HTTP retries and timeouts belong to the implementations, never to the
//! corrector.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, PotId};

mod memory;
pub use memory::{CallCounts, MemoryLedger, Transfer};

/// Failure reported by a ledger implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    #[error("unknown pot {0}")]
    UnknownPot(PotId),
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Amount, requested: Amount },
    #[error("transfer amount must be positive, got {0}")]
    InvalidAmount(Amount),
    #[error("balance {balance} cannot absorb {amount}")]
    Overflow { balance: Amount, amount: Amount },
}

/// A pot as listed for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pot {
    pub id: PotId,
    pub balance: Amount,
}

/// A settled transaction on an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: String,
    pub account_id: AccountId,
    pub amount: Amount,
}

/// Move money from an account into one of its pots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotDeposit {
    pub amount: Amount,
    pub dedupe_id: String,
    pub source_account_id: AccountId,
}

/// Move money out of a pot into an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotWithdrawal {
    pub amount: Amount,
    pub dedupe_id: String,
    pub destination_account_id: AccountId,
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn balance(&self, account_id: &str) -> Result<Amount, LedgerError>;

    async fn pots(&self, account_id: &str) -> Result<Vec<Pot>, LedgerError>;

    async fn transaction(&self, transaction_id: &str) -> Result<TransactionRecord, LedgerError>;
}

/// Mutating ledger operations. Implementations must collapse requests that
/// repeat a `dedupe_id` into a single effect.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn deposit_into_pot(&self, pot_id: &str, request: PotDeposit) -> Result<(), LedgerError>;

    async fn withdraw_from_pot(
        &self,
        pot_id: &str,
        request: PotWithdrawal,
    ) -> Result<(), LedgerError>;
}

#[async_trait]
impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    async fn balance(&self, account_id: &str) -> Result<Amount, LedgerError> {
        (**self).balance(account_id).await
    }

    async fn pots(&self, account_id: &str) -> Result<Vec<Pot>, LedgerError> {
        (**self).pots(account_id).await
    }

    async fn transaction(&self, transaction_id: &str) -> Result<TransactionRecord, LedgerError> {
        (**self).transaction(transaction_id).await
    }
}

#[async_trait]
impl<T: LedgerWriter + ?Sized> LedgerWriter for Arc<T> {
    async fn deposit_into_pot(&self, pot_id: &str, request: PotDeposit) -> Result<(), LedgerError> {
        (**self).deposit_into_pot(pot_id, request).await
    }

    async fn withdraw_from_pot(
        &self,
        pot_id: &str,
        request: PotWithdrawal,
    ) -> Result<(), LedgerError> {
        (**self).withdraw_from_pot(pot_id, request).await
    }
}
