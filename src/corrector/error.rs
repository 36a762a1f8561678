//! Error types for balance correction.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::model::PotId;

/// Error returned by [`BalanceCorrector`](super::BalanceCorrector).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrectionError {
    /// The configured pot is not among the account's pots. Not retryable.
    #[error("pot {0} not found")]
    PotNotFound(PotId),

    #[error("ledger request failed: {0}")]
    Ledger(#[from] LedgerError),
}
