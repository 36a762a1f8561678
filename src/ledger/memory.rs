//! In-process ledger.
//!
//! Holds account and pot balances plus the transactions applied to them, and
//! implements both ledger capabilities. Transfers that repeat a dedupe id are
//! accepted without effect, the way the banking API collapses them.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    LedgerError, LedgerReader, LedgerWriter, Pot, PotDeposit, PotWithdrawal, TransactionRecord,
};
use crate::Amount;
use crate::model::{AccountId, Direction, PotId};

/// Number of calls received per ledger operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub balance: usize,
    pub pots: usize,
    pub transaction: usize,
    pub deposits: usize,
    pub withdrawals: usize,
}

impl CallCounts {
    pub fn reads(&self) -> usize {
        self.balance + self.pots + self.transaction
    }

    pub fn writes(&self) -> usize {
        self.deposits + self.withdrawals
    }
}

/// A transfer that changed balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub account_id: AccountId,
    pub pot_id: PotId,
    pub amount: Amount,
    pub dedupe_id: String,
}

#[derive(Debug)]
struct PotAccount {
    account_id: AccountId,
    balance: Amount,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Amount>,
    pots: HashMap<PotId, PotAccount>,
    transactions: HashMap<String, TransactionRecord>,
    /// Dedupe ids of transfers already applied
    dedupe_ids: HashSet<String>,
    transfers: Vec<Transfer>,
    calls: CallCounts,
    unavailable: bool,
}

impl State {
    fn ensure_available(&self) -> Result<(), LedgerError> {
        if self.unavailable {
            return Err(LedgerError::Unavailable("ledger marked unavailable".into()));
        }
        Ok(())
    }

    /// Apply a pot transfer:
    /// - Skip it if its dedupe id was already applied
    /// - Ensure the pot belongs to the account
    /// - Ensure the source side holds enough funds
    /// - Move the amount and remember the dedupe id
    ///
    /// Returns whether balances changed.
    fn apply_transfer(
        &mut self,
        direction: Direction,
        pot_id: &str,
        account_id: &str,
        amount: Amount,
        dedupe_id: String,
    ) -> Result<bool, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        if self.dedupe_ids.contains(&dedupe_id) {
            return Ok(false);
        }

        let pot = self
            .pots
            .get_mut(pot_id)
            .filter(|pot| pot.account_id == account_id)
            .ok_or_else(|| LedgerError::UnknownPot(pot_id.to_string()))?;

        let account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;

        let (account_after, pot_after) = match direction {
            Direction::DepositToPot => {
                if *account < amount {
                    return Err(LedgerError::InsufficientFunds {
                        available: *account,
                        requested: amount,
                    });
                }
                (
                    checked_sub(*account, amount)?,
                    checked_add(pot.balance, amount)?,
                )
            }
            Direction::WithdrawFromPot => {
                if pot.balance < amount {
                    return Err(LedgerError::InsufficientFunds {
                        available: pot.balance,
                        requested: amount,
                    });
                }
                (
                    checked_add(*account, amount)?,
                    checked_sub(pot.balance, amount)?,
                )
            }
        };
        *account = account_after;
        pot.balance = pot_after;

        self.dedupe_ids.insert(dedupe_id.clone());
        self.transfers.push(Transfer {
            direction,
            account_id: account_id.to_string(),
            pot_id: pot_id.to_string(),
            amount,
            dedupe_id,
        });

        Ok(true)
    }
}

fn checked_add(balance: Amount, amount: Amount) -> Result<Amount, LedgerError> {
    balance
        .checked_add(amount)
        .ok_or(LedgerError::Overflow { balance, amount })
}

fn checked_sub(balance: Amount, amount: Amount) -> Result<Amount, LedgerError> {
    balance
        .checked_sub(amount)
        .ok_or(LedgerError::Overflow { balance, amount })
}

/// Ledger kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

/// Setup
impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with the given balance.
    pub fn with_account(mut self, account_id: impl Into<AccountId>, balance: Amount) -> Self {
        self.state.get_mut().accounts.insert(account_id.into(), balance);
        self
    }

    /// Open a pot belonging to `account_id` with the given balance.
    pub fn with_pot(
        mut self,
        account_id: impl Into<AccountId>,
        pot_id: impl Into<PotId>,
        balance: Amount,
    ) -> Self {
        self.state.get_mut().pots.insert(
            pot_id.into(),
            PotAccount {
                account_id: account_id.into(),
                balance,
            },
        );
        self
    }

    /// Make every subsequent read and write fail with
    /// [`LedgerError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Apply a settled transaction to an account. A transaction id seen before
    /// is a redelivery: it is not applied again and `false` is returned.
    pub async fn record_transaction(
        &self,
        account_id: &str,
        transaction_id: &str,
        amount: Amount,
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;

        if state.transactions.contains_key(transaction_id) {
            debug!(transaction = transaction_id, "transaction already recorded");
            return Ok(false);
        }

        let balance = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;
        *balance = checked_add(*balance, amount)?;

        state.transactions.insert(
            transaction_id.to_string(),
            TransactionRecord {
                id: transaction_id.to_string(),
                account_id: account_id.to_string(),
                amount,
            },
        );

        Ok(true)
    }
}

/// Inspection
impl MemoryLedger {
    pub async fn balance_of(&self, account_id: &str) -> Option<Amount> {
        self.state.lock().await.accounts.get(account_id).copied()
    }

    pub async fn pot_balance(&self, pot_id: &str) -> Option<Amount> {
        self.state.lock().await.pots.get(pot_id).map(|pot| pot.balance)
    }

    /// Transfers that changed balances, in the order they were applied.
    pub async fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().await.transfers.clone()
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn balance(&self, account_id: &str) -> Result<Amount, LedgerError> {
        let mut state = self.state.lock().await;
        state.calls.balance += 1;
        state.ensure_available()?;

        state
            .accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))
    }

    async fn pots(&self, account_id: &str) -> Result<Vec<Pot>, LedgerError> {
        let mut state = self.state.lock().await;
        state.calls.pots += 1;
        state.ensure_available()?;

        if !state.accounts.contains_key(account_id) {
            return Err(LedgerError::UnknownAccount(account_id.to_string()));
        }

        let mut pots: Vec<Pot> = state
            .pots
            .iter()
            .filter(|(_, pot)| pot.account_id == account_id)
            .map(|(id, pot)| Pot {
                id: id.clone(),
                balance: pot.balance,
            })
            .collect();
        pots.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(pots)
    }

    async fn transaction(&self, transaction_id: &str) -> Result<TransactionRecord, LedgerError> {
        let mut state = self.state.lock().await;
        state.calls.transaction += 1;
        state.ensure_available()?;

        state
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownTransaction(transaction_id.to_string()))
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn deposit_into_pot(&self, pot_id: &str, request: PotDeposit) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.calls.deposits += 1;
        state.ensure_available()?;

        let applied = state.apply_transfer(
            Direction::DepositToPot,
            pot_id,
            &request.source_account_id,
            request.amount,
            request.dedupe_id.clone(),
        )?;
        log_transfer(Direction::DepositToPot, pot_id, request.amount, &request.dedupe_id, applied);

        Ok(())
    }

    async fn withdraw_from_pot(
        &self,
        pot_id: &str,
        request: PotWithdrawal,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.calls.withdrawals += 1;
        state.ensure_available()?;

        let applied = state.apply_transfer(
            Direction::WithdrawFromPot,
            pot_id,
            &request.destination_account_id,
            request.amount,
            request.dedupe_id.clone(),
        )?;
        log_transfer(
            Direction::WithdrawFromPot,
            pot_id,
            request.amount,
            &request.dedupe_id,
            applied,
        );

        Ok(())
    }
}

fn log_transfer(direction: Direction, pot: &str, amount: Amount, dedupe_id: &str, applied: bool) {
    if applied {
        info!(pot, amount = %amount, dedupe_id, "{direction} applied");
    } else {
        debug!(pot, amount = %amount, dedupe_id, "{direction} collapsed by dedupe id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MemoryLedger {
        MemoryLedger::new()
            .with_account("acc_1", Amount::from_minor(1_000))
            .with_pot("acc_1", "pot_1", Amount::from_minor(500))
    }

    fn deposit(amount: i64, dedupe_id: &str) -> PotDeposit {
        PotDeposit {
            amount: Amount::from_minor(amount),
            dedupe_id: dedupe_id.to_string(),
            source_account_id: "acc_1".to_string(),
        }
    }

    fn withdrawal(amount: i64, dedupe_id: &str) -> PotWithdrawal {
        PotWithdrawal {
            amount: Amount::from_minor(amount),
            dedupe_id: dedupe_id.to_string(),
            destination_account_id: "acc_1".to_string(),
        }
    }

    // Reads

    #[tokio::test]
    async fn reads_balance_and_pots() {
        let ledger = ledger().with_pot("acc_2", "pot_other", Amount::from_minor(9));

        assert_eq!(ledger.balance("acc_1").await, Ok(Amount::from_minor(1_000)));
        assert_eq!(
            ledger.pots("acc_1").await,
            Ok(vec![Pot {
                id: "pot_1".to_string(),
                balance: Amount::from_minor(500),
            }])
        );

        let calls = ledger.calls().await;
        assert_eq!(calls.balance, 1);
        assert_eq!(calls.pots, 1);
        assert_eq!(calls.writes(), 0);
    }

    #[tokio::test]
    async fn unknown_account_fails() {
        let ledger = ledger();
        assert_eq!(
            ledger.balance("acc_x").await,
            Err(LedgerError::UnknownAccount("acc_x".to_string()))
        );
        assert_eq!(
            ledger.pots("acc_x").await,
            Err(LedgerError::UnknownAccount("acc_x".to_string()))
        );
    }

    // Transactions

    #[tokio::test]
    async fn record_transaction_applies_once() {
        let ledger = ledger();

        assert_eq!(
            ledger.record_transaction("acc_1", "tx_1", Amount::from_minor(-300)).await,
            Ok(true)
        );
        assert_eq!(
            ledger.record_transaction("acc_1", "tx_1", Amount::from_minor(-300)).await,
            Ok(false)
        );

        assert_eq!(ledger.balance_of("acc_1").await, Some(Amount::from_minor(700)));
        let record = ledger.transaction("tx_1").await.unwrap();
        assert_eq!(record.amount, Amount::from_minor(-300));
        assert_eq!(record.account_id, "acc_1");
    }

    #[tokio::test]
    async fn overflowing_transaction_is_rejected() {
        let ledger = MemoryLedger::new().with_account("acc_1", Amount::from_minor(i64::MAX));

        let result = ledger
            .record_transaction("acc_1", "tx_1", Amount::from_minor(1))
            .await;

        assert_eq!(
            result,
            Err(LedgerError::Overflow {
                balance: Amount::from_minor(i64::MAX),
                amount: Amount::from_minor(1),
            })
        );
        assert_eq!(ledger.balance_of("acc_1").await, Some(Amount::from_minor(i64::MAX)));
        assert!(matches!(
            ledger.transaction("tx_1").await,
            Err(LedgerError::UnknownTransaction(_))
        ));
    }

    #[tokio::test]
    async fn unknown_transaction_fails() {
        let ledger = ledger();
        assert_eq!(
            ledger.transaction("tx_missing").await,
            Err(LedgerError::UnknownTransaction("tx_missing".to_string()))
        );
    }

    // Transfers

    #[tokio::test]
    async fn deposit_moves_funds_into_pot() {
        let ledger = ledger();
        ledger.deposit_into_pot("pot_1", deposit(200, "d1")).await.unwrap();

        assert_eq!(ledger.balance_of("acc_1").await, Some(Amount::from_minor(800)));
        assert_eq!(ledger.pot_balance("pot_1").await, Some(Amount::from_minor(700)));
        assert_eq!(ledger.transfers().await.len(), 1);
    }

    #[tokio::test]
    async fn withdrawal_moves_funds_out_of_pot() {
        let ledger = ledger();
        ledger.withdraw_from_pot("pot_1", withdrawal(500, "w1")).await.unwrap();

        assert_eq!(ledger.balance_of("acc_1").await, Some(Amount::from_minor(1_500)));
        assert_eq!(ledger.pot_balance("pot_1").await, Some(Amount::ZERO));
    }

    #[tokio::test]
    async fn repeated_dedupe_id_is_collapsed() {
        let ledger = ledger();
        ledger.deposit_into_pot("pot_1", deposit(200, "same")).await.unwrap();
        ledger.deposit_into_pot("pot_1", deposit(200, "same")).await.unwrap();

        assert_eq!(ledger.pot_balance("pot_1").await, Some(Amount::from_minor(700)));
        assert_eq!(ledger.transfers().await.len(), 1);
        assert_eq!(ledger.calls().await.deposits, 2);
    }

    #[tokio::test]
    async fn withdrawal_beyond_pot_balance_fails() {
        let ledger = ledger();
        let result = ledger.withdraw_from_pot("pot_1", withdrawal(501, "w1")).await;
        assert_eq!(
            result,
            Err(LedgerError::InsufficientFunds {
                available: Amount::from_minor(500),
                requested: Amount::from_minor(501),
            })
        );

        // Balances unchanged
        assert_eq!(ledger.pot_balance("pot_1").await, Some(Amount::from_minor(500)));
        assert!(ledger.transfers().await.is_empty());
    }

    #[tokio::test]
    async fn deposit_beyond_account_balance_fails() {
        let ledger = ledger();
        let result = ledger.deposit_into_pot("pot_1", deposit(1_001, "d1")).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn overflowing_transfers_leave_balances_untouched() {
        let ledger = MemoryLedger::new()
            .with_account("acc_1", Amount::from_minor(i64::MAX))
            .with_pot("acc_1", "pot_1", Amount::from_minor(500));

        let result = ledger.withdraw_from_pot("pot_1", withdrawal(10, "w1")).await;
        assert!(matches!(result, Err(LedgerError::Overflow { .. })));

        let full_pot = MemoryLedger::new()
            .with_account("acc_1", Amount::from_minor(1_000))
            .with_pot("acc_1", "pot_1", Amount::from_minor(i64::MAX));
        let result = full_pot.deposit_into_pot("pot_1", deposit(10, "d1")).await;
        assert!(matches!(result, Err(LedgerError::Overflow { .. })));

        assert_eq!(ledger.pot_balance("pot_1").await, Some(Amount::from_minor(500)));
        assert_eq!(full_pot.balance_of("acc_1").await, Some(Amount::from_minor(1_000)));
        assert!(ledger.transfers().await.is_empty());
        assert!(full_pot.transfers().await.is_empty());
    }

    #[tokio::test]
    async fn zero_amount_transfer_is_rejected() {
        let ledger = ledger();
        let result = ledger.deposit_into_pot("pot_1", deposit(0, "d1")).await;
        assert_eq!(result, Err(LedgerError::InvalidAmount(Amount::ZERO)));
    }

    #[tokio::test]
    async fn pot_of_another_account_is_unknown() {
        let ledger = ledger().with_pot("acc_2", "pot_2", Amount::from_minor(100));
        let result = ledger.withdraw_from_pot("pot_2", withdrawal(10, "w1")).await;
        assert_eq!(result, Err(LedgerError::UnknownPot("pot_2".to_string())));
    }

    #[tokio::test]
    async fn unavailable_ledger_fails_every_call() {
        let ledger = ledger();
        ledger.set_unavailable(true).await;

        assert!(matches!(
            ledger.balance("acc_1").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(matches!(
            ledger.deposit_into_pot("pot_1", deposit(10, "d1")).await,
            Err(LedgerError::Unavailable(_))
        ));

        ledger.set_unavailable(false).await;
        assert!(ledger.balance("acc_1").await.is_ok());
    }
}
