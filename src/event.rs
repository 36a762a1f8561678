//! Webhook admission.
//!
//! Turns a `transaction.created` webhook body into a [`TriggerEvent`], or
//! explains why the delivery should not trigger a correction. Pot transfers
//! made by the corrector come back as webhooks of their own; those are
//! recognised by the pot id and ignored so a correction never corrects itself.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, CorrectionConfig, TriggerEvent};

pub const TRANSACTION_CREATED: &str = "transaction.created";

/// A webhook body that cannot be admitted.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed webhook body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("webhook body is missing account_id")]
    MissingAccountId,

    #[error("webhook body is missing the transaction id")]
    MissingTransactionId,

    #[error("webhook for account {received} delivered to configuration of {expected}")]
    AccountMismatch {
        expected: AccountId,
        received: AccountId,
    },
}

/// Webhook body as sent by the banking API.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<TransactionData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TransactionData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    /// Signed amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Why a well-formed delivery does not trigger a correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedType(String),
    /// The transaction is a transfer to or from the managed pot.
    ManagedPot,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnsupportedType(kind) => write!(f, "unsupported event type {kind}"),
            IgnoreReason::ManagedPot => f.write_str("transaction concerns the managed pot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Correct(TriggerEvent),
    Ignored(IgnoreReason),
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// A `transaction.created` event as the banking API would deliver it.
    pub fn transaction_created(
        id: impl Into<String>,
        account_id: impl Into<AccountId>,
        amount: Option<Amount>,
        description: Option<String>,
    ) -> Self {
        Self {
            kind: TRANSACTION_CREATED.to_string(),
            data: Some(TransactionData {
                id: Some(id.into()),
                account_id: Some(account_id.into()),
                amount: amount.map(Amount::minor),
                description,
                metadata: HashMap::new(),
            }),
        }
    }

    /// Decide whether this delivery should trigger a correction for `config`:
    /// - Only `transaction.created` events are considered
    /// - The event must name the configured account and carry a transaction id
    /// - Transactions moving money to or from the managed pot are ignored
    ///
    /// The trigger is amount-aware when the body carries the amount.
    pub fn admit(&self, config: &CorrectionConfig) -> Result<Admission, EventError> {
        if self.kind != TRANSACTION_CREATED {
            return Ok(Admission::Ignored(IgnoreReason::UnsupportedType(
                self.kind.clone(),
            )));
        }

        let data = self.data.as_ref().ok_or(EventError::MissingAccountId)?;
        let account_id = data
            .account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(EventError::MissingAccountId)?;
        if account_id != config.account_id() {
            return Err(EventError::AccountMismatch {
                expected: config.account_id().to_string(),
                received: account_id.to_string(),
            });
        }

        let id = data
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(EventError::MissingTransactionId)?;

        if data.concerns_pot(config.pot_id()) {
            return Ok(Admission::Ignored(IgnoreReason::ManagedPot));
        }

        let event = match data.amount {
            Some(amount) => TriggerEvent::known(id, Amount::from_minor(amount)),
            None => TriggerEvent::unknown(id),
        };
        Ok(Admission::Correct(event))
    }
}

impl TransactionData {
    /// Pot transfers are described by the pot id and tag it in metadata.
    fn concerns_pot(&self, pot_id: &str) -> bool {
        self.description.as_deref() == Some(pot_id)
            || self.metadata.get("pot_id").map(String::as_str) == Some(pot_id)
    }
}
