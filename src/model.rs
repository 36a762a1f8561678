//! Core domain types for balance correction.

use std::fmt;

use thiserror::Error;

use crate::Amount;

/// Bank account identifier.
pub type AccountId = String;

/// Pot identifier.
pub type PotId = String;

const IDEMPOTENCY_PREFIX: &str = "balance-correction-";

/// Rejected [`CorrectionConfig`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("account id must not be empty")]
    EmptyAccountId,
    #[error("pot id must not be empty")]
    EmptyPotId,
    #[error("target balance must not be negative, got {0}")]
    NegativeTarget(Amount),
}

/// The paired (account, pot) a correction keeps in balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionConfig {
    account_id: AccountId,
    pot_id: PotId,
    target_balance: Amount,
    dry_run: bool,
}

impl CorrectionConfig {
    pub fn new(
        account_id: impl Into<AccountId>,
        pot_id: impl Into<PotId>,
        target_balance: Amount,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        let account_id = account_id.into();
        let pot_id = pot_id.into();

        if account_id.is_empty() {
            return Err(ConfigError::EmptyAccountId);
        }
        if pot_id.is_empty() {
            return Err(ConfigError::EmptyPotId);
        }
        if target_balance.is_negative() {
            return Err(ConfigError::NegativeTarget(target_balance));
        }

        Ok(Self {
            account_id,
            pot_id,
            target_balance,
            dry_run,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn pot_id(&self) -> &str {
        &self.pot_id
    }

    pub fn target_balance(&self) -> Amount {
        self.target_balance
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// What the caller knows about the transaction that triggered a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Signed amount of the triggering transaction: positive entered the
    /// account, negative left it.
    KnownAmount(Amount),
    /// Amount unavailable; derive the correction from a balance snapshot.
    Unknown,
}

/// A single request to correct the balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub triggering_id: String,
    pub trigger: Trigger,
}

impl TriggerEvent {
    pub fn known(triggering_id: impl Into<String>, amount: Amount) -> Self {
        Self {
            triggering_id: triggering_id.into(),
            trigger: Trigger::KnownAmount(amount),
        }
    }

    pub fn unknown(triggering_id: impl Into<String>) -> Self {
        Self {
            triggering_id: triggering_id.into(),
            trigger: Trigger::Unknown,
        }
    }

    /// Dedupe key for the transfer this event causes. Depends on the
    /// triggering id only, so redeliveries of the same event share it.
    pub fn idempotency_key(&self) -> String {
        format!("{IDEMPOTENCY_PREFIX}{}", self.triggering_id)
    }
}

/// Pot balance as read from the ledger. Stale as soon as it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotSnapshot {
    pub pot_id: PotId,
    pub available: Amount,
}

/// Which way a corrective transfer moves money.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DepositToPot,
    WithdrawFromPot,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::DepositToPot => f.write_str("deposit"),
            Direction::WithdrawFromPot => f.write_str("withdrawal"),
        }
    }
}

/// A decided transfer. `amount` is always strictly positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub direction: Direction,
    pub amount: Amount,
    pub idempotency_key: String,
    pub account_id: AccountId,
    pub pot_id: PotId,
}
